//! Per-session admission control.
//!
//! The gate holds the moderator, whitelist and blacklist sets, an optional
//! password and an optional session secret. Admission is a pure check over
//! that state; nothing here touches the roster.

use shared::AccountId;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone)]
pub struct AccessGate {
    moderators: BTreeSet<AccountId>,
    whitelist: BTreeSet<AccountId>,
    blacklist: BTreeSet<AccountId>,
    password: String,
    session_secret: String,
}

impl AccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    /// Installs the secret that lets its holder in regardless of other rules.
    /// An empty secret leaves the current one in place.
    pub fn set_session_secret(&mut self, secret: &str) {
        if !secret.is_empty() {
            self.session_secret = secret.to_string();
        }
    }

    pub fn add_moderator(&mut self, account: &str) {
        self.moderators.insert(account.to_string());
    }

    pub fn remove_moderator(&mut self, account: &str) {
        self.moderators.remove(account);
    }

    pub fn clear_moderators(&mut self) {
        self.moderators.clear();
    }

    pub fn add_to_whitelist(&mut self, account: &str) {
        self.whitelist.insert(account.to_string());
    }

    pub fn remove_from_whitelist(&mut self, account: &str) {
        self.whitelist.remove(account);
    }

    pub fn clear_whitelist(&mut self) {
        self.whitelist.clear();
    }

    pub fn add_to_blacklist(&mut self, account: &str) {
        self.blacklist.insert(account.to_string());
    }

    pub fn remove_from_blacklist(&mut self, account: &str) {
        self.blacklist.remove(account);
    }

    pub fn clear_blacklist(&mut self) {
        self.blacklist.clear();
    }

    pub fn is_moderator(&self, account: &str) -> bool {
        self.moderators.contains(account)
    }

    /// Decides whether a connection presenting these credentials may join.
    ///
    /// Rules apply in order and the first that matches wins:
    /// 1. moderators are always admitted
    /// 2. a matching session secret is admitted
    /// 3. blacklisted accounts are rejected
    /// 4. a wrong password is rejected
    /// 5. whitelisted accounts are admitted
    /// 6. everyone else is admitted only when `allow_by_default` is set
    pub fn is_admissible(
        &self,
        account: &str,
        password: &str,
        secret: &str,
        allow_by_default: bool,
    ) -> bool {
        if self.is_moderator(account) {
            return true;
        }

        if !self.session_secret.is_empty() && secret == self.session_secret {
            return true;
        }

        if self.blacklist.contains(account) {
            return false;
        }

        if self.requires_password() && password != self.password {
            return false;
        }

        if self.whitelist.contains(account) {
            return true;
        }

        allow_by_default
    }

    pub fn is_private(&self) -> bool {
        self.requires_password() || !self.whitelist.is_empty()
    }

    pub fn requires_password(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn whitelist(&self) -> Vec<AccountId> {
        self.whitelist.iter().cloned().collect()
    }

    pub fn blacklist(&self) -> Vec<AccountId> {
        self.blacklist.iter().cloned().collect()
    }
}
