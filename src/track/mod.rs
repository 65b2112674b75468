// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! Tracks own the live schedule of load profiles for one target system.
//!
//! The control pipe only needs the [`Track`] trait: a name, a feasibility
//! check, and a way to queue an accepted profile. [`ScenarioTrack`] is the
//! implementation driven by the configuration file.

use crate::protocol::StatusCode;
use crate::workload::LoadProfile;
use ringlog::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Zero users, or more users than the track allows.
pub const ERROR_INVALID_USER_COUNT: StatusCode = StatusCode(1777);
/// The mix name is not one the track knows about.
pub const ERROR_UNKNOWN_MIX: StatusCode = StatusCode(1778);
/// The profile would last zero seconds.
pub const ERROR_INVALID_INTERVAL: StatusCode = StatusCode(1780);

pub trait Track: Send + Sync {
    fn name(&self) -> &str;

    /// Returns [`StatusCode::OK`] when the profile can be scheduled, otherwise
    /// a track-specific rejection code.
    fn validate_profile(&self, profile: &LoadProfile) -> StatusCode;

    /// Queues a validated profile behind any that are already pending.
    fn submit_profile(&self, profile: LoadProfile);

    fn current_profile(&self) -> Option<Arc<LoadProfile>>;
}

#[derive(thiserror::Error, Debug)]
#[error("a track named \"{0}\" is already registered")]
pub struct DuplicateTrack(pub String);

/// Tracks by name, kept in registration order.
#[derive(Default)]
pub struct TrackRegistry {
    tracks: Vec<Arc<dyn Track>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, track: Arc<dyn Track>) -> Result<(), DuplicateTrack> {
        if self.get(track.name()).is_some() {
            return Err(DuplicateTrack(track.name().to_string()));
        }
        self.tracks.push(track);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Track>> {
        self.tracks.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Track>> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[derive(Default)]
struct Schedule {
    current: Option<Arc<LoadProfile>>,
    pending: VecDeque<LoadProfile>,
}

/// A track with a fixed user ceiling and a fixed set of mixes. Profiles run
/// one after another in the order they were submitted.
pub struct ScenarioTrack {
    name: String,
    max_users: u32,
    mixes: Vec<String>,
    schedule: Mutex<Schedule>,
}

impl ScenarioTrack {
    pub fn new(name: impl Into<String>, max_users: u32, mixes: Vec<String>) -> Self {
        Self {
            name: name.into(),
            max_users,
            mixes,
            schedule: Mutex::new(Schedule::default()),
        }
    }

    pub fn max_users(&self) -> u32 {
        self.max_users
    }

    pub fn mixes(&self) -> &[String] {
        &self.mixes
    }

    pub fn pending(&self) -> usize {
        self.schedule().pending.len()
    }

    /// Activates the next pending profile, if any. With nothing pending the
    /// current profile stays active.
    pub fn advance(&self, now: Instant) -> Option<Arc<LoadProfile>> {
        let mut schedule = self.schedule();
        self.activate_next(&mut schedule, now)
    }

    /// Activates the next profile once the current one has run its whole
    /// interval, or immediately when nothing is active. The expiry check and
    /// the activation happen under one lock, so concurrent callers cannot
    /// skip a profile.
    pub fn advance_if_due(&self, now: Instant) -> Option<Arc<LoadProfile>> {
        let mut schedule = self.schedule();
        let due = match &schedule.current {
            Some(current) => current.is_expired(now),
            None => true,
        };
        if due {
            self.activate_next(&mut schedule, now)
        } else {
            None
        }
    }

    fn activate_next(&self, schedule: &mut Schedule, now: Instant) -> Option<Arc<LoadProfile>> {
        let mut next = schedule.pending.pop_front()?;
        next.activate(now);
        info!("track {} activating profile {}", self.name, next);
        let next = Arc::new(next);
        schedule.current = Some(next.clone());
        Some(next)
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        // the schedule stays consistent even if a holder panicked
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Track for ScenarioTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_profile(&self, profile: &LoadProfile) -> StatusCode {
        if profile.number_of_users() == 0 || profile.number_of_users() > self.max_users {
            return ERROR_INVALID_USER_COUNT;
        }
        if !self.mixes.iter().any(|m| m == profile.mix_name()) {
            return ERROR_UNKNOWN_MIX;
        }
        if profile.interval().as_secs() == 0 {
            return ERROR_INVALID_INTERVAL;
        }
        StatusCode::OK
    }

    fn submit_profile(&self, profile: LoadProfile) {
        debug!("track {} queued profile {}", self.name, profile);
        self.schedule().pending.push_back(profile);
    }

    fn current_profile(&self) -> Option<Arc<LoadProfile>> {
        self.schedule().current.clone()
    }
}
