// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use crate::pipe::PoolReport;
use crate::track::{Track, TrackRegistry};

/// Prints a line to stdout prefixed with the current UTC time.
#[macro_export]
macro_rules! output {
    () => {
        let now = chrono::Utc::now();
        println!("{}", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, false));
    };
    ($($arg:tt)*) => {{
        let now = chrono::Utc::now();
        println!("{} {}", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, false), format_args!($($arg)*));
    }};
}

/// Operator report for one statistics window.
pub fn report(window_id: u64, pool: &PoolReport, tracks: &TrackRegistry) {
    output!("-----");
    output!("Window: {}", window_id);
    output!("{}", pool);
    for worker in &pool.workers {
        output!(
            "Worker: {} State: {} Processed: {}",
            worker.name,
            worker.state,
            worker.processed
        );
    }
    for track in tracks.iter() {
        match track.current_profile() {
            Some(profile) => output!("Track: {} Profile: {}", track.name(), profile),
            None => output!("Track: {} Profile: none", track.name()),
        }
    }
}
