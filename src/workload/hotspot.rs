// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::keygen::{KeyGenerator, KeyGeneratorParams};
use super::ProfileError;
use ahash::{HashSet, HashSetExt};
use rand::Rng;
use rand::RngCore;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro512PlusPlus;
use std::sync::Arc;

/// Cold draws that land on hot keys are retried this many times before the
/// selector walks the key range for the next cold key.
const MAX_COLD_RETRIES: usize = 64;

/// How the hot keys of a profile are chosen.
#[derive(Clone, Debug, PartialEq)]
pub enum HotSelection {
    /// Use exactly these keys.
    Explicit(Vec<i64>),
    /// Pick this many distinct keys at random, seeded by the key generator.
    Random(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct HotObjectConfig {
    pub hot_traffic_fraction: f64,
    pub selection: HotSelection,
}

/// A small set of keys that receives a fixed share of the traffic.
#[derive(Clone, Debug)]
pub struct HotObjectSet {
    hot_traffic_fraction: f64,
    keys: Vec<i64>,
    members: HashSet<i64>,
}

impl HotObjectSet {
    /// Resolves the hot keys for a key space.
    pub fn new(config: &HotObjectConfig, keyspace: &KeyGeneratorParams) -> Result<Self, ProfileError> {
        let fraction = config.hot_traffic_fraction;
        if !(0.0..1.0).contains(&fraction) {
            return Err(ProfileError::HotTrafficFraction(fraction));
        }

        let set = match &config.selection {
            HotSelection::Explicit(keys) => Self::from_keys(keys.clone(), fraction)?,
            HotSelection::Random(count) => Self::pick(*count, fraction, keyspace)?,
        };

        // cold draws skip hot keys, so some key must stay cold
        let range = keyspace.range()?;
        let covered = set
            .keys
            .iter()
            .filter(|k| (keyspace.min_key..=keyspace.max_key).contains(*k))
            .count() as u64;
        if covered >= range {
            return Err(ProfileError::TooManyHotObjects {
                requested: set.len(),
                available: range,
            });
        }

        Ok(set)
    }

    fn from_keys(keys: Vec<i64>, fraction: f64) -> Result<Self, ProfileError> {
        let mut members = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !members.insert(*key) {
                return Err(ProfileError::DuplicateHotKey(*key));
            }
        }

        Ok(Self {
            hot_traffic_fraction: fraction,
            keys,
            members,
        })
    }

    /// Draws `count` distinct keys from `[min_key, max_key)`.
    fn pick(count: usize, fraction: f64, keyspace: &KeyGeneratorParams) -> Result<Self, ProfileError> {
        let available = (keyspace.max_key as i128 - keyspace.min_key as i128).max(0) as u64;
        if count as u64 >= available {
            return Err(ProfileError::TooManyHotObjects {
                requested: count,
                available,
            });
        }

        let mut rng = Xoshiro512PlusPlus::seed_from_u64(keyspace.seed);
        let mut members = HashSet::with_capacity(count);
        let mut keys = Vec::with_capacity(count);
        while keys.len() < count {
            let key = rng.random_range(keyspace.min_key..keyspace.max_key);
            if members.insert(key) {
                keys.push(key);
            }
        }

        Ok(Self {
            hot_traffic_fraction: fraction,
            keys,
            members,
        })
    }

    pub fn hot_traffic_fraction(&self) -> f64 {
        self.hot_traffic_fraction
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn contains(&self, key: i64) -> bool {
        self.members.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Result of a key draw, tagged with whether it came from the hot set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Draw {
    Hot(i64),
    Cold(i64),
}

impl Draw {
    pub fn key(&self) -> i64 {
        match self {
            Self::Hot(k) | Self::Cold(k) => *k,
        }
    }

    pub fn is_hot(&self) -> bool {
        matches!(self, Self::Hot(_))
    }
}

/// Per-thread key source for one installed profile. Not shareable across
/// threads; build one per request generator.
pub struct KeySelector {
    generator: KeyGenerator,
    hot: Option<Arc<HotObjectSet>>,
}

impl KeySelector {
    pub fn new(generator: KeyGenerator, hot: Option<Arc<HotObjectSet>>) -> Self {
        Self { generator, hot }
    }

    /// With probability `hot_traffic_fraction` returns a uniformly chosen hot
    /// key, otherwise a key from the generator that is not in the hot set.
    ///
    /// A generator that keeps landing on hot keys (a narrow Zipf peak, or a
    /// scatter that folds every rank onto one key) is retried a bounded
    /// number of times. After that the cold key is the first non-hot key
    /// following the last draw, wrapping around the range.
    pub fn next_key(&mut self, rng: &mut dyn RngCore) -> Draw {
        let hot = match &self.hot {
            Some(hot) if !hot.is_empty() => hot,
            _ => return Draw::Cold(self.generator.generate_key()),
        };

        if rng.random::<f64>() < hot.hot_traffic_fraction() {
            let index = rng.random_range(0..hot.len());
            return Draw::Hot(hot.keys()[index]);
        }

        let mut key = self.generator.generate_key();
        for _ in 0..MAX_COLD_RETRIES {
            if !hot.contains(key) {
                return Draw::Cold(key);
            }
            key = self.generator.generate_key();
        }

        // the hot set never covers the whole range, so this ends within
        // `hot.len()` steps
        let (min_key, range) = self.generator.bounds();
        let mut offset = (key as i128 - min_key as i128) as u64;
        while hot.contains(key) {
            offset = (offset + 1) % range;
            key = min_key.wrapping_add(offset as i64);
        }
        Draw::Cold(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::keygen::ZipfMethod;

    fn keyspace() -> KeyGeneratorParams {
        KeyGeneratorParams::zipf(1.1, 3.456, 1, 1000, 7, ZipfMethod::Rejection)
    }

    #[test]
    fn random_selection_is_seeded() {
        let config = HotObjectConfig {
            hot_traffic_fraction: 0.6,
            selection: HotSelection::Random(5),
        };
        let a = HotObjectSet::new(&config, &keyspace()).unwrap();
        let b = HotObjectSet::new(&config, &keyspace()).unwrap();

        assert_eq!(a.len(), 5);
        assert_eq!(a.keys(), b.keys());
        assert!(a.keys().iter().all(|k| (1..1000).contains(k)));
    }

    #[test]
    fn hot_and_cold_draws_are_disjoint() {
        let config = HotObjectConfig {
            hot_traffic_fraction: 0.6,
            selection: HotSelection::Random(5),
        };
        let hot = Arc::new(HotObjectSet::new(&config, &keyspace()).unwrap());
        let generator = KeyGenerator::new(&keyspace()).unwrap();
        let mut selector = KeySelector::new(generator, Some(hot.clone()));

        let mut rng = Xoshiro512PlusPlus::seed_from_u64(1);
        let mut hot_draws = 0;
        for _ in 0..10_000 {
            match selector.next_key(&mut rng) {
                Draw::Hot(k) => {
                    assert!(hot.contains(k));
                    hot_draws += 1;
                }
                Draw::Cold(k) => assert!(!hot.contains(k)),
            }
        }

        let share = hot_draws as f64 / 10_000.0;
        assert!((share - 0.6).abs() < 0.03, "hot share {share}");
    }

    #[test]
    fn explicit_keys_are_used_verbatim() {
        let config = HotObjectConfig {
            hot_traffic_fraction: 0.25,
            selection: HotSelection::Explicit(vec![10, 3, 77]),
        };
        let set = HotObjectSet::new(&config, &keyspace()).unwrap();
        assert_eq!(set.keys(), &[10, 3, 77]);
        assert!(set.contains(3));
        assert!(!set.contains(4));

        let config = HotObjectConfig {
            hot_traffic_fraction: 0.25,
            selection: HotSelection::Explicit(vec![10, 10]),
        };
        assert!(matches!(
            HotObjectSet::new(&config, &keyspace()),
            Err(ProfileError::DuplicateHotKey(10))
        ));
    }

    #[test]
    fn rejects_bad_configuration() {
        let small = KeyGeneratorParams::uniform(0, 4, 1);

        for fraction in [-0.1, 1.0, 1.5] {
            let config = HotObjectConfig {
                hot_traffic_fraction: fraction,
                selection: HotSelection::Random(1),
            };
            assert!(matches!(
                HotObjectSet::new(&config, &small),
                Err(ProfileError::HotTrafficFraction(_))
            ));
        }

        let config = HotObjectConfig {
            hot_traffic_fraction: 0.5,
            selection: HotSelection::Random(4),
        };
        assert!(matches!(
            HotObjectSet::new(&config, &small),
            Err(ProfileError::TooManyHotObjects { .. })
        ));

        let config = HotObjectConfig {
            hot_traffic_fraction: 0.5,
            selection: HotSelection::Explicit(vec![0, 1, 2, 3, 4]),
        };
        assert!(matches!(
            HotObjectSet::new(&config, &small),
            Err(ProfileError::TooManyHotObjects { .. })
        ));
    }

    #[test]
    fn cold_draws_finish_when_every_rank_lands_on_a_hot_key() {
        // an integral scatter multiplier folds every rank onto `min_key`
        let keyspace = KeyGeneratorParams::zipf(1.5, 1.0, 1, 1024, 3, ZipfMethod::Direct);
        let mut generator = KeyGenerator::new(&keyspace).unwrap();
        assert!((0..100).all(|_| generator.generate_key() == 1));

        let config = HotObjectConfig {
            hot_traffic_fraction: 0.0,
            selection: HotSelection::Explicit(vec![1, 2]),
        };
        let hot = Arc::new(HotObjectSet::new(&config, &keyspace).unwrap());
        let generator = KeyGenerator::new(&keyspace).unwrap();
        let mut selector = KeySelector::new(generator, Some(hot));

        let mut rng = Xoshiro512PlusPlus::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(selector.next_key(&mut rng), Draw::Cold(3));
        }
    }

    #[test]
    fn cold_draws_avoid_a_nearly_full_hot_set() {
        let keyspace = KeyGeneratorParams::uniform(0, 5, 1);
        let config = HotObjectConfig {
            hot_traffic_fraction: 0.0,
            selection: HotSelection::Explicit(vec![1, 2, 3, 4, 5]),
        };
        let hot = Arc::new(HotObjectSet::new(&config, &keyspace).unwrap());
        let generator = KeyGenerator::new(&keyspace).unwrap();
        let mut selector = KeySelector::new(generator, Some(hot));

        let mut rng = Xoshiro512PlusPlus::seed_from_u64(1);
        for _ in 0..1000 {
            assert_eq!(selector.next_key(&mut rng), Draw::Cold(0));
        }
    }

    #[test]
    fn no_hot_set_always_draws_cold() {
        let generator = KeyGenerator::new(&KeyGeneratorParams::uniform(1, 10, 1)).unwrap();
        let mut selector = KeySelector::new(generator, None);
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(1);
        for _ in 0..100 {
            assert!(!selector.next_key(&mut rng).is_hot());
        }
    }
}
