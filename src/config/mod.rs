// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use crate::track::{DuplicateTrack, TrackRegistry};
use crate::workload::{ProfileError, SamplingError};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod debug;
mod general;
mod pipe;
mod track;

pub use debug::Debug;
pub use general::General;
pub use pipe::Pipe;
pub use track::{Hotspot, KeyGenerator, Profile, Storage, Track};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("error reading config file: {path}\n{source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} is not a valid duration: {source}")]
    Duration {
        field: &'static str,
        source: humantime::DurationError,
    },
    #[error("track {track}: {source}")]
    Profile { track: String, source: ProfileError },
    #[error("track {track}: bad storage mix: {source}")]
    Storage {
        track: String,
        source: SamplingError,
    },
    #[error("track {track}: zipf key generator needs parameter `{name}`")]
    MissingZipfParameter { track: String, name: &'static str },
    #[error("track {track}: hotspot needs either `hot_set` or `num_hot_objects`")]
    MissingHotObjects { track: String },
    #[error("track {track}: profile {profile} rejected with code {code}")]
    RejectedProfile {
        track: String,
        profile: String,
        code: i32,
    },
    #[error(transparent)]
    DuplicateTrack(#[from] DuplicateTrack),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    debug: Debug,
    #[serde(default)]
    pipe: Pipe,
    #[serde(default, rename = "track")]
    tracks: Vec<Track>,
}

impl Config {
    /// Loads the config file, exiting the process with a message on any
    /// problem.
    pub fn new(filename: &Path) -> Self {
        match Self::load(filename) {
            Ok(config) => config,
            Err(error) => {
                eprintln!("{error}");
                std::process::exit(1);
            }
        }
    }

    pub fn load(filename: &Path) -> Result<Self, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: filename.display().to_string(),
            source,
        };

        let mut file = std::fs::File::open(filename).map_err(io_error)?;
        let mut content = String::new();
        file.read_to_string(&mut content).map_err(io_error)?;

        content.parse()
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn debug(&self) -> &Debug {
        &self.debug
    }

    pub fn pipe(&self) -> &Pipe {
        &self.pipe
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Builds every configured track, with its profiles queued, in the
    /// order the tracks appear in the file.
    pub fn registry(&self) -> Result<TrackRegistry, ConfigError> {
        let mut registry = TrackRegistry::new();
        for track in &self.tracks {
            registry.register(Arc::new(track.build()?))?;
        }
        Ok(registry)
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content)?;
        config.pipe.validate()?;
        Ok(config)
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|source| ConfigError::Duration { field, source })
}
