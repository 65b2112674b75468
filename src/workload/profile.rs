// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::hotspot::{HotObjectConfig, HotObjectSet, KeySelector};
use super::keygen::{KeyGenerator, KeyGeneratorParams};
use super::storage::StorageMix;
use super::ProfileError;
use core::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One interval of a benchmark run: how many users, which behavior mix, and
/// for key-value workloads which keys they hit.
#[derive(Clone, Debug)]
pub struct LoadProfile {
    interval: Duration,
    transition_time: Duration,
    number_of_users: u32,
    mix_name: String,
    name: String,
    key_generator: Option<KeyGeneratorParams>,
    hot_objects: Option<Arc<HotObjectSet>>,
    storage: Option<StorageMix>,
    // updated by the owning track's schedule
    activations: u64,
    time_started: Option<Instant>,
}

impl LoadProfile {
    pub fn new(interval: Duration, number_of_users: u32, mix_name: impl Into<String>) -> Self {
        Self {
            interval,
            transition_time: Duration::ZERO,
            number_of_users,
            mix_name: mix_name.into(),
            name: String::new(),
            key_generator: None,
            hot_objects: None,
            storage: None,
            activations: 0,
            time_started: None,
        }
    }

    pub fn with_transition_time(mut self, transition_time: Duration) -> Self {
        self.transition_time = transition_time;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches a key space. The parameters are checked by building a
    /// generator once.
    pub fn with_key_generator(mut self, params: KeyGeneratorParams) -> Result<Self, ProfileError> {
        KeyGenerator::new(&params)?;
        self.key_generator = Some(params);
        Ok(self)
    }

    /// Resolves a hot set against the profile's key space. The key generator
    /// must be attached first.
    pub fn with_hot_objects(mut self, config: &HotObjectConfig) -> Result<Self, ProfileError> {
        let keyspace = self.key_generator.ok_or(ProfileError::NoKeyGenerator)?;
        self.hot_objects = Some(Arc::new(HotObjectSet::new(config, &keyspace)?));
        Ok(self)
    }

    pub fn with_storage(mut self, storage: StorageMix) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn transition_time(&self) -> Duration {
        self.transition_time
    }

    pub fn number_of_users(&self) -> u32 {
        self.number_of_users
    }

    pub fn mix_name(&self) -> &str {
        &self.mix_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_generator(&self) -> Option<&KeyGeneratorParams> {
        self.key_generator.as_ref()
    }

    pub fn hot_objects(&self) -> Option<&HotObjectSet> {
        self.hot_objects.as_deref()
    }

    pub fn hot_traffic_fraction(&self) -> f64 {
        self.hot_objects
            .as_ref()
            .map(|h| h.hot_traffic_fraction())
            .unwrap_or(0.0)
    }

    pub fn storage(&self) -> Option<&StorageMix> {
        self.storage.as_ref()
    }

    /// Builds a fresh, independently owned key source for one request
    /// generator thread.
    pub fn key_selector(&self) -> Result<KeySelector, ProfileError> {
        let params = self.key_generator.ok_or(ProfileError::NoKeyGenerator)?;
        let generator = KeyGenerator::new(&params)?;
        Ok(KeySelector::new(generator, self.hot_objects.clone()))
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }

    pub fn time_started(&self) -> Option<Instant> {
        self.time_started
    }

    pub(crate) fn activate(&mut self, now: Instant) {
        self.activations += 1;
        self.time_started = Some(now);
    }

    /// `true` once the profile has been active for its whole interval.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.time_started {
            Some(started) => now.saturating_duration_since(started) >= self.interval,
            None => false,
        }
    }
}

impl fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Duration: {} Users: {} Mix: {} Transition time: {}",
            self.interval.as_secs(),
            self.number_of_users,
            self.mix_name,
            self.transition_time.as_secs()
        )?;
        if !self.name.trim().is_empty() {
            write!(f, " Name: {}", self.name)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::hotspot::HotSelection;
    use crate::workload::keygen::ZipfMethod;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro512PlusPlus;

    #[test]
    fn display_includes_name_only_when_set() {
        let profile = LoadProfile::new(Duration::from_secs(30), 500, "default");
        assert_eq!(
            profile.to_string(),
            "[Duration: 30 Users: 500 Mix: default Transition time: 0]"
        );

        let profile = profile.with_name("dlp-1");
        assert!(profile.to_string().ends_with("Name: dlp-1]"));
    }

    #[test]
    fn hot_objects_need_a_key_space() {
        let config = HotObjectConfig {
            hot_traffic_fraction: 0.5,
            selection: HotSelection::Random(2),
        };
        let profile = LoadProfile::new(Duration::from_secs(1), 1, "default");
        assert!(matches!(
            profile.with_hot_objects(&config),
            Err(ProfileError::NoKeyGenerator)
        ));
    }

    #[test]
    fn selectors_replay_independently() {
        let params = KeyGeneratorParams::zipf(1.3, 2.5, 1, 500, 4, ZipfMethod::Direct);
        let profile = LoadProfile::new(Duration::from_secs(1), 1, "default")
            .with_key_generator(params)
            .unwrap()
            .with_hot_objects(&HotObjectConfig {
                hot_traffic_fraction: 0.3,
                selection: HotSelection::Random(3),
            })
            .unwrap();
        assert_eq!(profile.hot_objects().map(|h| h.len()), Some(3));
        assert!((profile.hot_traffic_fraction() - 0.3).abs() < f64::EPSILON);

        let mut a = profile.key_selector().unwrap();
        let mut b = profile.key_selector().unwrap();
        let mut rng_a = Xoshiro512PlusPlus::seed_from_u64(2);
        let mut rng_b = Xoshiro512PlusPlus::seed_from_u64(2);
        for _ in 0..200 {
            assert_eq!(a.next_key(&mut rng_a), b.next_key(&mut rng_b));
        }
    }

    #[test]
    fn expires_after_interval() {
        let mut profile = LoadProfile::new(Duration::from_secs(10), 1, "default");
        let now = Instant::now();
        assert!(!profile.is_expired(now));

        profile.activate(now);
        assert_eq!(profile.activations(), 1);
        assert!(!profile.is_expired(now + Duration::from_secs(9)));
        assert!(profile.is_expired(now + Duration::from_secs(10)));
    }
}
