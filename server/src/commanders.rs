//! Read-only commander catalogue and the ownership seam.

use rand::seq::SliceRandom;
use rand::Rng;

/// Entitlement check owned by the connection host: does this client own the
/// catalogue item?
pub trait Entitlements: Send {
    fn is_item_owned(&self, client_id: u32, object_name: &str) -> bool;
}

/// Grants every item. Used when the host has no store backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnsEverything;

impl Entitlements for OwnsEverything {
    fn is_item_owned(&self, _client_id: u32, _object_name: &str) -> bool {
        true
    }
}

struct CommanderEntry {
    spec: &'static str,
    object_name: &'static str,
}

const CATALOGUE: &[CommanderEntry] = &[
    CommanderEntry {
        spec: "/pa/units/commanders/raptor_centurion/raptor_centurion.json",
        object_name: "RaptorCenturion",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/raptor_rallus/raptor_rallus.json",
        object_name: "RaptorRallus",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/tank_aeson/tank_aeson.json",
        object_name: "TankAeson",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/quad_osiris/quad_osiris.json",
        object_name: "QuadOsiris",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/raptor_nemicus/raptor_nemicus.json",
        object_name: "RaptorNemicus",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/imperial_invictus/imperial_invictus.json",
        object_name: "ImperialInvictus",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/imperial_alpha/imperial_alpha.json",
        object_name: "ImperialAlpha",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/imperial_delta/imperial_delta.json",
        object_name: "ImperialDelta",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/quad_spiderofmean/quad_spiderofmean.json",
        object_name: "QuadSpiderOfMean",
    },
    CommanderEntry {
        spec: "/pa/units/commanders/tank_base/tank_base.json",
        object_name: "TankBase",
    },
];

/// Commanders handed out to players who have not picked one. The first six
/// catalogue entries.
const DEFAULT_COUNT: usize = 6;

#[derive(Debug, Default, Clone, Copy)]
pub struct Commanders;

impl Commanders {
    pub fn object_name(&self, spec: &str) -> Option<&'static str> {
        CATALOGUE
            .iter()
            .find(|entry| entry.spec == spec)
            .map(|entry| entry.object_name)
    }

    pub fn spec_for(&self, object_name: &str) -> Option<&'static str> {
        CATALOGUE
            .iter()
            .find(|entry| entry.object_name == object_name)
            .map(|entry| entry.spec)
    }

    pub fn is_known(&self, spec: &str) -> bool {
        self.object_name(spec).is_some()
    }

    pub fn random_default(&self) -> &'static str {
        self.random_default_with(&mut rand::thread_rng())
    }

    pub fn random_default_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &'static str {
        CATALOGUE[..DEFAULT_COUNT]
            .choose(rng)
            .map_or(CATALOGUE[0].spec, |entry| entry.spec)
    }

    pub fn defaults(&self) -> impl Iterator<Item = &'static str> {
        CATALOGUE[..DEFAULT_COUNT].iter().map(|entry| entry.spec)
    }
}
