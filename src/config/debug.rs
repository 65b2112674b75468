// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::*;
use ringlog::Level;

fn log_level() -> Level {
    Level::Info
}

fn log_max_size() -> u64 {
    1024 * 1024 * 1024
}

fn log_queue_depth() -> usize {
    4096
}

fn log_single_message_size() -> usize {
    1024
}

#[derive(Deserialize)]
#[serde(remote = "Level")]
#[serde(rename_all = "lowercase")]
enum LevelDef {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Debug {
    #[serde(with = "LevelDef")]
    #[serde(default = "log_level")]
    log_level: Level,
    log_file: Option<String>,
    log_backup: Option<String>,
    #[serde(default = "log_max_size")]
    log_max_size: u64,
    #[serde(default = "log_queue_depth")]
    log_queue_depth: usize,
    #[serde(default = "log_single_message_size")]
    log_single_message_size: usize,
}

impl Default for Debug {
    fn default() -> Self {
        Self {
            log_level: log_level(),
            log_file: None,
            log_backup: None,
            log_max_size: log_max_size(),
            log_queue_depth: log_queue_depth(),
            log_single_message_size: log_single_message_size(),
        }
    }
}

impl Debug {
    pub fn log_level(&self) -> Level {
        self.log_level
    }

    pub fn log_file(&self) -> Option<String> {
        self.log_file.clone()
    }

    /// Defaults to the log file name with `.old` appended.
    pub fn log_backup(&self) -> Option<String> {
        match &self.log_backup {
            Some(path) => Some(path.clone()),
            None => self.log_file.as_ref().map(|path| format!("{path}.old")),
        }
    }

    pub fn log_max_size(&self) -> u64 {
        self.log_max_size
    }

    pub fn log_queue_depth(&self) -> usize {
        self.log_queue_depth
    }

    pub fn log_single_message_size(&self) -> usize {
        self.log_single_message_size
    }
}
