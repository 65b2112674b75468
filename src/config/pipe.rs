// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::*;
use crate::pipe::{DEFAULT_PORT, DEFAULT_READ_TIMEOUT, DEFAULT_THREADS};

fn port() -> u16 {
    DEFAULT_PORT
}

fn threads() -> usize {
    DEFAULT_THREADS
}

fn read_timeout() -> String {
    "5s".into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Pipe {
    #[serde(default = "port")]
    port: u16,
    /// Number of worker threads serving the control pipe.
    #[serde(default = "threads")]
    threads: usize,
    /// How long a worker waits for a client to send its request. Specify
    /// time along with unit.
    #[serde(default = "read_timeout")]
    read_timeout: String,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            port: port(),
            threads: threads(),
            read_timeout: read_timeout(),
        }
    }
}

impl Pipe {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        parse_duration("pipe.read_timeout", &self.read_timeout)?;
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn read_timeout(&self) -> Duration {
        parse_duration("pipe.read_timeout", &self.read_timeout).unwrap_or(DEFAULT_READ_TIMEOUT)
    }
}
