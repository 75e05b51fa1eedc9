//! Random choice of the object served to clients that did not ask for one.

use rand::Rng;
use rand::seq::IndexedRandom;

/// There was nothing to choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no keys to choose from")]
pub struct EmptySelection;

/// Picks one of `keys` uniformly at random using the thread-local generator.
///
/// Every call is an independent draw, so the same key may be returned repeatedly.
pub fn pick_random(keys: &[String]) -> Result<&str, EmptySelection> {
    pick_random_with(keys, &mut rand::rng())
}

/// Like [`pick_random`], with a caller-provided random number generator.
pub fn pick_random_with<'a, R: Rng + ?Sized>(
    keys: &'a [String],
    rng: &mut R,
) -> Result<&'a str, EmptySelection> {
    keys.choose(rng).map(String::as_str).ok_or(EmptySelection)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("track-{i}.mp3")).collect()
    }

    #[test]
    fn test_empty() {
        assert_eq!(pick_random(&[]), Err(EmptySelection));
    }

    #[test]
    fn test_single() {
        let keys = keys(1);
        for _ in 0..10 {
            assert_eq!(pick_random(&keys), Ok("track-0.mp3"));
        }
    }

    #[test]
    fn test_covers_all_keys() {
        let keys = keys(5);
        let mut rng = StdRng::seed_from_u64(0x6d65_6469_61);
        let mut counts = BTreeMap::new();

        for _ in 0..1000 {
            let key = pick_random_with(&keys, &mut rng).unwrap();
            *counts.entry(key).or_insert(0usize) += 1;
        }

        assert_eq!(counts.len(), keys.len());
        // 200 expected per key, this bound is far outside of any plausible deviation
        assert!(counts.values().all(|&count| count > 100), "{counts:?}");
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let keys = keys(50);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| pick_random_with(&keys, &mut rng).unwrap().to_owned())
                .collect::<Vec<_>>()
        };

        assert_eq!(draw(7), draw(7));
    }
}
