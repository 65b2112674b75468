// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! Request handling for the control pipe.
//!
//! [`Control`] is built once at startup and shared by every pipe worker. It
//! holds the track registry and the start gate and turns each request into
//! exactly one reply.

use crate::protocol::{DynamicLoadProfile, Message, StatusCode};
use crate::track::TrackRegistry;
use crate::workload::LoadProfile;
use ringlog::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Holds the run back until the controller says go.
pub struct StartGate {
    waiting: AtomicBool,
}

impl StartGate {
    pub fn new(waiting: bool) -> Self {
        Self {
            waiting: AtomicBool::new(waiting),
        }
    }

    /// Opens the gate. Opening an open gate does nothing.
    pub fn release(&self) {
        if self.waiting.swap(false, Ordering::AcqRel) {
            info!("benchmark start received");
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }
}

pub struct Control {
    tracks: TrackRegistry,
    start_gate: StartGate,
}

impl Control {
    pub fn new(tracks: TrackRegistry, start_gate: StartGate) -> Self {
        Self { tracks, start_gate }
    }

    pub fn tracks(&self) -> &TrackRegistry {
        &self.tracks
    }

    pub fn start_gate(&self) -> &StartGate {
        &self.start_gate
    }

    pub fn dispatch(&self, message: Message) -> Message {
        match message {
            Message::TrackListRequest => Message::TrackListReply {
                track_names: self.tracks.names(),
            },
            Message::BenchmarkStart {
                controller_timestamp,
            } => {
                debug!("controller timestamp: {}", controller_timestamp);
                self.start_gate.release();
                Message::status(StatusCode::OK)
            }
            Message::DynamicLoadProfile(request) => Message::status(self.admit(request)),
            other @ (Message::Status { .. }
            | Message::TrackListReply { .. }
            | Message::Unrecognized { .. }) => {
                warn!("unexpected message type: {}", other.header());
                Message::status(StatusCode::ERROR_UNEXPECTED_MESSAGE_TYPE)
            }
        }
    }

    /// Validates a profile against its track and queues it when the track
    /// accepts it. Any code other than OK leaves the track untouched.
    pub fn admit(&self, request: DynamicLoadProfile) -> StatusCode {
        let Some(track) = self.tracks.get(&request.dest_track_name) else {
            info!(
                "dynamic load profile for unknown track: {}",
                request.dest_track_name
            );
            return StatusCode::ERROR_TRACK_NOT_FOUND;
        };

        // whole seconds, negative values are floored to zero
        let interval = Duration::from_secs((request.interval_millis.max(0) / 1000) as u64);
        let transition_time = Duration::from_secs(request.transition_time_secs.max(0) as u64);
        let users = request.number_of_users.max(0) as u32;

        let profile = LoadProfile::new(interval, users, request.mix_name)
            .with_transition_time(transition_time)
            .with_name(request.name);

        let code = track.validate_profile(&profile);
        if code != StatusCode::OK {
            info!(
                "track {} rejected profile {} with code {}",
                track.name(),
                profile,
                code
            );
            return code;
        }

        info!("track {} accepted profile {}", track.name(), profile);
        track.submit_profile(profile);
        StatusCode::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageHeader, MessageType};
    use crate::track::{ScenarioTrack, Track, ERROR_INVALID_USER_COUNT, ERROR_UNKNOWN_MIX};
    use std::sync::Arc;

    fn control() -> (Control, Arc<ScenarioTrack>) {
        let track = Arc::new(ScenarioTrack::new(
            "track-001",
            100,
            vec!["default".to_string()],
        ));
        let mut registry = TrackRegistry::new();
        registry.register(track.clone()).unwrap();
        (Control::new(registry, StartGate::new(true)), track)
    }

    fn request(track: &str, interval_millis: i64, users: i32, mix: &str) -> DynamicLoadProfile {
        DynamicLoadProfile {
            dest_track_name: track.to_string(),
            interval_millis,
            transition_time_secs: 2,
            number_of_users: users,
            mix_name: mix.to_string(),
            name: "dlp".to_string(),
        }
    }

    #[test]
    fn unknown_track_changes_nothing() {
        let (control, track) = control();
        let reply = control.dispatch(Message::DynamicLoadProfile(request(
            "nope", 30_000, 10, "default",
        )));
        assert_eq!(reply, Message::status(StatusCode::ERROR_TRACK_NOT_FOUND));

        let reply = control.dispatch(Message::TrackListRequest);
        assert_eq!(
            reply,
            Message::TrackListReply {
                track_names: vec!["track-001".to_string()]
            }
        );
        assert_eq!(track.pending(), 0);
    }

    #[test]
    fn rejection_codes_are_relayed() {
        let (control, track) = control();
        assert_eq!(
            control.admit(request("track-001", 30_000, 101, "default")),
            ERROR_INVALID_USER_COUNT
        );
        assert_eq!(
            control.admit(request("track-001", 30_000, -4, "default")),
            ERROR_INVALID_USER_COUNT
        );
        assert_eq!(
            control.admit(request("track-001", 30_000, 5, "browse")),
            ERROR_UNKNOWN_MIX
        );
        assert_eq!(track.pending(), 0);
    }

    #[test]
    fn accepted_profiles_are_queued_in_seconds() {
        let (control, track) = control();
        assert_eq!(
            control.admit(request("track-001", 30_999, 5, "default")),
            StatusCode::OK
        );
        assert_eq!(track.pending(), 1);

        let active = track.advance(std::time::Instant::now()).unwrap();
        assert_eq!(active.interval(), Duration::from_secs(30));
        assert_eq!(active.transition_time(), Duration::from_secs(2));
        assert_eq!(active.number_of_users(), 5);
        assert_eq!(active.mix_name(), "default");
        assert_eq!(active.name(), "dlp");
        assert!(track.current_profile().is_some());
    }

    #[test]
    fn benchmark_start_is_idempotent() {
        let (control, _) = control();
        assert!(control.start_gate().is_waiting());
        for _ in 0..2 {
            let reply = control.dispatch(Message::BenchmarkStart {
                controller_timestamp: 1,
            });
            assert_eq!(reply, Message::status(StatusCode::OK));
            assert!(!control.start_gate().is_waiting());
        }
    }

    #[test]
    fn replies_are_not_requests() {
        let (control, _) = control();
        for message in [
            Message::status(StatusCode::OK),
            Message::TrackListReply {
                track_names: vec![],
            },
            Message::Unrecognized {
                header: MessageHeader::new(MessageType::ErrorMessage),
            },
        ] {
            assert_eq!(
                control.dispatch(message),
                Message::status(StatusCode::ERROR_UNEXPECTED_MESSAGE_TYPE)
            );
        }
    }
}
