// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::*;

fn duration() -> u64 {
    60
}

fn stats_interval() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize)]
pub struct General {
    /// How long the run lasts once started, in seconds.
    #[serde(default = "duration")]
    duration: u64,
    /// Hold the run until the controller sends a benchmark start.
    #[serde(default)]
    wait_for_start: bool,
    /// Seconds between pipe statistics reports.
    #[serde(default = "stats_interval")]
    stats_interval: u64,
}

impl Default for General {
    fn default() -> Self {
        Self {
            duration: duration(),
            wait_for_start: false,
            stats_interval: stats_interval(),
        }
    }
}

impl General {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    pub fn wait_for_start(&self) -> bool {
        self.wait_for_start
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval)
    }
}
