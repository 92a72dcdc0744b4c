//! Player color allocation.
//!
//! The catalogue is a fixed, read-only table of primary colors, each with its
//! own list of secondary colors. A `ColorPool` tracks which primaries are in
//! use for one session; a primary is held by at most one player at a time.

use rand::seq::IteratorRandom;
use rand::Rng;
use shared::{ColorInfo, Rgb};

#[derive(Debug)]
pub struct ColorEntry {
    pub primary: Rgb,
    pub secondary: &'static [Rgb],
}

/// A player's color: index of the primary in the catalogue and of the
/// secondary within that primary's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorChoice {
    pub primary: usize,
    pub secondary: usize,
}

const BRIGHT_WHITE: Rgb = [230, 230, 230];
const WHITE: Rgb = [200, 200, 200];
const SILVER: Rgb = [150, 150, 155];
const BLACK: Rgb = [60, 60, 60];
const DARK_BLACK: Rgb = [40, 40, 40];
const JUST_RED: Rgb = [255, 0, 0];
const LIGHT_RED: Rgb = [235, 60, 54];
const RED: Rgb = [210, 50, 44];
const DARK_RED: Rgb = [186, 26, 26];
const BURGUNDY: Rgb = [123, 22, 33];
const GOLD: Rgb = [200, 150, 30];
const DARK_GOLD: Rgb = [175, 140, 0];
const ICE_WHITE: Rgb = [215, 238, 228];
const ICE_BLUE: Rgb = [180, 234, 255];
const LIGHT_BLUE: Rgb = [51, 151, 197];
const BLUE: Rgb = [59, 54, 182];
const NAVY_BLUE: Rgb = [0, 51, 102];
const LIGHT_YELLOW: Rgb = [219, 220, 47];
const YELLOW: Rgb = [255, 190, 20];
const ORANGE: Rgb = [255, 144, 47];
const DARK_ORANGE: Rgb = [197, 83, 0];
const SKIN_PINK: Rgb = [240, 194, 170];
const LIGHT_PINK: Rgb = [255, 122, 204];
const VIOLET: Rgb = [153, 153, 255];
const MELON_PINK: Rgb = [255, 50, 100];
const PINK: Rgb = [206, 51, 145];
const PURPLE: Rgb = [113, 52, 165];
const DARK_PURPLE: Rgb = [79, 47, 79];
const CYAN: Rgb = [93, 242, 255];
const DARK_CYAN: Rgb = [0, 139, 149];
const MINT_GREEN: Rgb = [180, 255, 180];
const LIME_GREEN: Rgb = [110, 225, 10];
const OLIVE_GREEN: Rgb = [105, 120, 0];
const LIGHT_GREEN: Rgb = [50, 220, 110];
const GREEN: Rgb = [83, 159, 48];
const DARK_GREEN: Rgb = [0, 70, 0];
const FLUORESCENT: Rgb = [209, 255, 56];
const SLATE: Rgb = [47, 79, 79];
const BONE: Rgb = [255, 250, 205];
const TAN: Rgb = [210, 180, 140];
const BROWN: Rgb = [142, 107, 68];
const GIRAFFE_BROWN: Rgb = [130, 80, 10];

const fn entry(primary: Rgb, secondary: &'static [Rgb]) -> ColorEntry {
    ColorEntry { primary, secondary }
}

pub static COLOR_TABLE: [ColorEntry; 32] = [
    entry(BLACK, &[RED, PINK, LIGHT_BLUE, GREEN, ORANGE, GOLD, SILVER]),
    entry(SILVER, &[RED, DARK_BLACK, LIGHT_BLUE, LIME_GREEN]),
    entry(SLATE, &[DARK_PURPLE, ORANGE, BROWN]),
    entry(NAVY_BLUE, &[LIME_GREEN, MELON_PINK, TAN]),
    entry(BROWN, &[TAN, PURPLE, PINK, MINT_GREEN]),
    entry(PURPLE, &[LIGHT_BLUE, GOLD, WHITE]),
    entry(BLUE, &[YELLOW, ORANGE, ICE_WHITE]),
    entry(DARK_GREEN, &[LIGHT_YELLOW, WHITE, PINK]),
    entry(DARK_RED, &[GOLD, WHITE, PURPLE, BLACK]),
    entry(RED, &[LIGHT_BLUE, GREEN, YELLOW]),
    entry(BURGUNDY, &[CYAN, BONE, LIME_GREEN]),
    entry(MELON_PINK, &[LIGHT_GREEN, JUST_RED, PURPLE]),
    entry(PINK, &[ORANGE, LIGHT_BLUE, YELLOW]),
    entry(LIGHT_PINK, &[BLACK, BURGUNDY, BRIGHT_WHITE]),
    entry(CYAN, &[PURPLE, NAVY_BLUE, YELLOW]),
    entry(BONE, &[DARK_GREEN, DARK_RED, PURPLE]),
    entry(YELLOW, &[GIRAFFE_BROWN, DARK_BLACK, BURGUNDY, SLATE]),
    entry(ORANGE, &[BLACK, SLATE, LIGHT_BLUE]),
    entry(WHITE, &[RED, LIGHT_BLUE, GREEN, ORANGE, BLACK]),
    entry(LIME_GREEN, &[DARK_RED, DARK_GREEN, NAVY_BLUE]),
    entry(TAN, &[OLIVE_GREEN, BLUE, PURPLE]),
    entry(ICE_BLUE, &[BRIGHT_WHITE, DARK_RED, ORANGE]),
    entry(LIGHT_BLUE, &[GOLD, RED, MELON_PINK]),
    entry(VIOLET, &[LIGHT_PINK, LIGHT_RED, PURPLE]),
    entry(GREEN, &[YELLOW, PINK, PURPLE]),
    entry(OLIVE_GREEN, &[PURPLE, BONE, VIOLET]),
    entry(MINT_GREEN, &[BROWN, NAVY_BLUE, VIOLET]),
    entry(DARK_GOLD, &[PURPLE, LIGHT_BLUE, SILVER]),
    entry(DARK_CYAN, &[BLACK, BRIGHT_WHITE]),
    entry(SKIN_PINK, &[DARK_RED, PURPLE, DARK_CYAN]),
    entry(DARK_ORANGE, &[DARK_GREEN, PURPLE, DARK_CYAN]),
    entry(FLUORESCENT, &[BLACK, LIGHT_BLUE, PURPLE, SILVER]),
];

#[derive(Debug, Clone)]
pub struct ColorPool {
    catalogue: &'static [ColorEntry],
    taken: Vec<bool>,
}

impl Default for ColorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorPool {
    pub fn new() -> Self {
        Self::with_catalogue(&COLOR_TABLE)
    }

    pub fn with_catalogue(catalogue: &'static [ColorEntry]) -> Self {
        Self {
            catalogue,
            taken: vec![false; catalogue.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.catalogue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogue.is_empty()
    }

    pub fn is_taken(&self, primary: usize) -> bool {
        self.taken.get(primary).copied().unwrap_or(false)
    }

    pub fn taken_count(&self) -> usize {
        self.taken.iter().filter(|taken| **taken).count()
    }

    pub fn take_random(&mut self) -> Option<ColorChoice> {
        self.take_random_with(&mut rand::thread_rng())
    }

    /// Picks a free primary uniformly at random together with a random
    /// secondary for it, and marks the primary taken.
    pub fn take_random_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<ColorChoice> {
        let primary = (0..self.len())
            .filter(|index| !self.taken[*index])
            .choose(rng)?;
        let secondary = rng.gen_range(0..self.secondary_count(primary).max(1));
        self.taken[primary] = true;
        Some(ColorChoice { primary, secondary })
    }

    /// Takes the first free primary after `from`, wrapping around the
    /// catalogue. `from` itself is the last candidate. With no `from` the
    /// scan starts at index 0.
    pub fn take_next(&mut self, from: Option<usize>) -> Option<usize> {
        let len = self.len();
        if len == 0 {
            return None;
        }

        let next = match from {
            Some(from) => (1..=len)
                .map(|step| (from + step) % len)
                .find(|index| !self.taken[*index]),
            None => (0..len).find(|index| !self.taken[*index]),
        }?;

        self.taken[next] = true;
        Some(next)
    }

    /// Frees a primary. Out-of-range or already free indices are ignored.
    pub fn release(&mut self, primary: usize) {
        if let Some(taken) = self.taken.get_mut(primary) {
            *taken = false;
        }
    }

    /// Moves a holder from `old` to `new` if `new` exists and is free.
    ///
    /// Returns the primary now held: `new` on success, `old` unchanged
    /// otherwise. Callers compare the result to see whether anything moved.
    pub fn reassign(&mut self, old: Option<usize>, new: usize) -> Option<usize> {
        if new >= self.len() || self.taken[new] {
            return old;
        }

        if let Some(old) = old {
            self.release(old);
        }
        self.taken[new] = true;
        Some(new)
    }

    pub fn color_for(&self, choice: Option<ColorChoice>) -> Option<[Rgb; 2]> {
        let choice = choice?;
        let entry = self.catalogue.get(choice.primary)?;
        let secondary = entry
            .secondary
            .get(choice.secondary)
            .or_else(|| entry.secondary.first())
            .copied()
            .unwrap_or(entry.primary);
        Some([entry.primary, secondary])
    }

    pub fn secondary_count(&self, primary: usize) -> usize {
        self.catalogue
            .get(primary)
            .map_or(0, |entry| entry.secondary.len())
    }

    pub fn is_valid_primary(&self, primary: usize) -> bool {
        primary < self.len()
    }

    pub fn is_valid_pair(&self, primary: usize, secondary: usize) -> bool {
        secondary < self.secondary_count(primary)
    }

    /// Secondary index following `choice.secondary`, wrapping around.
    pub fn next_secondary(&self, choice: ColorChoice) -> usize {
        match self.secondary_count(choice.primary) {
            0 => 0,
            count => (choice.secondary + 1) % count,
        }
    }

    pub fn snapshot(&self) -> Vec<ColorInfo> {
        self.catalogue
            .iter()
            .zip(&self.taken)
            .map(|(entry, taken)| ColorInfo {
                primary: entry.primary,
                secondary: entry.secondary.to_vec(),
                taken: *taken,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_pool() -> ColorPool {
        ColorPool::with_catalogue(&COLOR_TABLE[..5])
    }

    #[test]
    fn test_catalogue_is_well_formed() {
        let pool = ColorPool::new();
        assert_eq!(pool.len(), 32);
        for index in 0..pool.len() {
            assert!(pool.secondary_count(index) >= 2);
        }
    }

    #[test]
    fn test_take_next_wraps_around() {
        let mut pool = small_pool();
        for index in [0, 1, 3, 4] {
            pool.taken[index] = true;
        }

        assert_eq!(pool.take_next(Some(4)), Some(2));
        assert!(pool.is_taken(2));
        assert_eq!(pool.take_next(Some(4)), None);
    }

    #[test]
    fn test_take_next_returns_own_index_last() {
        let mut pool = small_pool();
        for index in 0..5 {
            pool.taken[index] = index != 3;
        }
        assert_eq!(pool.take_next(Some(3)), Some(3));
    }

    #[test]
    fn test_take_next_without_origin_starts_at_zero() {
        let mut pool = small_pool();
        assert_eq!(pool.take_next(None), Some(0));
        assert_eq!(pool.take_next(None), Some(1));
        assert_eq!(pool.take_next(Some(1)), Some(2));
    }

    #[test]
    fn test_take_random_never_collides() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pool = small_pool();
        let mut seen = Vec::new();

        while let Some(choice) = pool.take_random_with(&mut rng) {
            assert!(!seen.contains(&choice.primary));
            assert!(pool.is_valid_pair(choice.primary, choice.secondary));
            seen.push(choice.primary);
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(pool.taken_count(), 5);
    }

    #[test]
    fn test_release_then_take_random_yields_released() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut pool = small_pool();
        while pool.take_random_with(&mut rng).is_some() {}

        pool.release(3);
        let choice = pool.take_random_with(&mut rng).unwrap();
        assert_eq!(choice.primary, 3);
    }

    #[test]
    fn test_release_is_total() {
        let mut pool = small_pool();
        pool.release(99);
        pool.release(0);
        assert_eq!(pool.taken_count(), 0);
    }

    #[test]
    fn test_reassign() {
        let mut pool = small_pool();
        let held = pool.take_next(None);
        assert_eq!(held, Some(0));

        pool.taken[2] = true;
        assert_eq!(pool.reassign(held, 2), Some(0));
        assert_eq!(pool.reassign(held, 42), Some(0));

        assert_eq!(pool.reassign(held, 4), Some(4));
        assert!(!pool.is_taken(0));
        assert!(pool.is_taken(4));

        assert_eq!(pool.reassign(None, 1), Some(1));
    }

    #[test]
    fn test_color_for() {
        let pool = ColorPool::new();
        assert_eq!(pool.color_for(None), None);

        let color = pool.color_for(Some(ColorChoice {
            primary: 9,
            secondary: 0,
        }));
        assert_eq!(color, Some([RED, LIGHT_BLUE]));
    }

    #[test]
    fn test_next_secondary_wraps() {
        let pool = ColorPool::new();
        let choice = ColorChoice {
            primary: 28,
            secondary: 1,
        };
        assert_eq!(pool.next_secondary(choice), 0);
    }

    #[test]
    fn test_snapshot_reflects_taken() {
        let mut pool = small_pool();
        pool.take_next(Some(1));

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 5);
        assert!(snapshot[2].taken);
        assert_eq!(snapshot.iter().filter(|c| c.taken).count(), 1);
    }
}
