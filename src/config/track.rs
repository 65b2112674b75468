// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::*;
use crate::protocol::StatusCode;
use crate::track::{ScenarioTrack, Track as _};
use crate::workload::{
    HotObjectConfig, HotSelection, KeyGeneratorParams, LoadProfile, StorageMix, ZipfMethod,
    DEFAULT_REQUEST_SIZE, DEFAULT_SEED,
};

#[derive(Clone, Debug, Deserialize)]
pub struct Track {
    name: String,
    max_users: u32,
    /// Names of the behavior mixes profiles may select.
    #[serde(default)]
    mixes: Vec<String>,
    /// Profiles queued at startup, run in order.
    #[serde(default, rename = "profile")]
    profiles: Vec<Profile>,
}

impl Track {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_users(&self) -> u32 {
        self.max_users
    }

    pub fn mixes(&self) -> &[String] {
        &self.mixes
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Builds the track and queues its profiles. Profiles go through the
    /// same validation as ones pushed by the controller.
    pub fn build(&self) -> Result<ScenarioTrack, ConfigError> {
        let track = ScenarioTrack::new(&self.name, self.max_users, self.mixes.clone());
        for profile in &self.profiles {
            let profile = profile.load_profile(&self.name)?;
            let code = track.validate_profile(&profile);
            if code != StatusCode::OK {
                return Err(ConfigError::RejectedProfile {
                    track: self.name.clone(),
                    profile: profile.to_string(),
                    code: code.0,
                });
            }
            track.submit_profile(profile);
        }
        Ok(track)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Profile {
    /// seconds
    interval: u64,
    users: u32,
    mix: String,
    /// seconds
    #[serde(default)]
    transition_time: u64,
    #[serde(default)]
    name: String,
    key_generator: Option<KeyGenerator>,
    hotspot: Option<Hotspot>,
    storage: Option<Storage>,
}

impl Profile {
    pub fn load_profile(&self, track: &str) -> Result<LoadProfile, ConfigError> {
        let profile_error = |source| ConfigError::Profile {
            track: track.to_string(),
            source,
        };

        let mut profile = LoadProfile::new(
            Duration::from_secs(self.interval),
            self.users,
            self.mix.clone(),
        )
        .with_transition_time(Duration::from_secs(self.transition_time))
        .with_name(self.name.clone());

        if let Some(key_generator) = &self.key_generator {
            profile = profile
                .with_key_generator(key_generator.params(track)?)
                .map_err(profile_error)?;
        }

        if let Some(hotspot) = &self.hotspot {
            profile = profile
                .with_hot_objects(&hotspot.config(track)?)
                .map_err(profile_error)?;
        }

        if let Some(storage) = &self.storage {
            profile = profile.with_storage(storage.mix(track)?);
        }

        Ok(profile)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Uniform,
    Zipf,
}

fn seed() -> u64 {
    DEFAULT_SEED
}

#[derive(Clone, Debug, Deserialize)]
pub struct KeyGenerator {
    distribution: Distribution,
    min_key: i64,
    max_key: i64,
    #[serde(default = "seed")]
    seed: u64,
    /// zipf shape, must be greater than one
    a: Option<f64>,
    /// zipf scatter multiplier, a non-integer such as 3.456
    r: Option<f64>,
    #[serde(default)]
    method: ZipfMethod,
}

impl KeyGenerator {
    fn params(&self, track: &str) -> Result<KeyGeneratorParams, ConfigError> {
        match self.distribution {
            Distribution::Uniform => Ok(KeyGeneratorParams::uniform(
                self.min_key,
                self.max_key,
                self.seed,
            )),
            Distribution::Zipf => {
                let missing = |name| ConfigError::MissingZipfParameter {
                    track: track.to_string(),
                    name,
                };
                let a = self.a.ok_or_else(|| missing("a"))?;
                let r = self.r.ok_or_else(|| missing("r"))?;
                Ok(KeyGeneratorParams::zipf(
                    a,
                    r,
                    self.min_key,
                    self.max_key,
                    self.seed,
                    self.method,
                ))
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Hotspot {
    hot_traffic_fraction: f64,
    /// Explicit hot keys. Takes precedence over `num_hot_objects`.
    hot_set: Option<Vec<i64>>,
    num_hot_objects: Option<usize>,
}

impl Hotspot {
    fn config(&self, track: &str) -> Result<HotObjectConfig, ConfigError> {
        let selection = match (&self.hot_set, self.num_hot_objects) {
            (Some(keys), _) => HotSelection::Explicit(keys.clone()),
            (None, Some(count)) => HotSelection::Random(count),
            (None, None) => {
                return Err(ConfigError::MissingHotObjects {
                    track: track.to_string(),
                })
            }
        };
        Ok(HotObjectConfig {
            hot_traffic_fraction: self.hot_traffic_fraction,
            selection,
        })
    }
}

fn size() -> usize {
    DEFAULT_REQUEST_SIZE
}

fn read() -> f64 {
    0.9
}

fn write() -> f64 {
    0.1
}

/// Operation mix for key-value tracks. Fractions are normalized.
#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    #[serde(default = "size")]
    size: usize,
    #[serde(default = "read")]
    read: f64,
    #[serde(default = "write")]
    write: f64,
    #[serde(default)]
    update: f64,
    #[serde(default)]
    delete: f64,
}

impl Storage {
    fn mix(&self, track: &str) -> Result<StorageMix, ConfigError> {
        StorageMix::new(self.size, self.read, self.write, self.update, self.delete).map_err(
            |source| ConfigError::Storage {
                track: track.to_string(),
                source,
            },
        )
    }
}
