// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use backtrace::Backtrace;
use clap::{value_parser, Command};
use rain_driver::config::Config;
use rain_driver::control::{Control, StartGate};
use rain_driver::output;
use rain_driver::pipe::{self, RainPipe};
use rain_driver::track::{ScenarioTrack, Track, TrackRegistry};
use ringlog::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        // pipe workers answer a failed request with an error status
        if !pipe::is_worker_thread() {
            std::process::exit(101);
        }
    }));

    // parse command line options
    let cli = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about("Benchmark driver control plane: serves track listings, start signals, and dynamic load profiles to a benchmark controller.")
        .arg(
            clap::Arg::new("CONFIG")
                .help("Configuration file")
                .value_parser(value_parser!(PathBuf))
                .action(clap::ArgAction::Set)
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("port")
                .long("port")
                .help("Control pipe port, overrides the config file")
                .value_parser(value_parser!(u16))
                .action(clap::ArgAction::Set),
        )
        .get_matches();

    let Some(path) = cli.get_one::<PathBuf>("CONFIG") else {
        eprintln!("missing config file");
        std::process::exit(1);
    };
    let config = Config::new(path);
    let port = cli
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(config.pipe().port());

    run(config, port)
}

fn run(config: Config, port: u16) {
    // configure debug log
    let debug_output: Box<dyn Output> = if let Some(file) = config.debug().log_file() {
        let backup = config
            .debug()
            .log_backup()
            .unwrap_or(format!("{}.old", file));
        match File::new(&file, &backup, config.debug().log_max_size()) {
            Ok(f) => Box::new(f),
            Err(e) => {
                eprintln!("failed to open debug log file: {e}");
                std::process::exit(1);
            }
        }
    } else {
        // by default, log to stderr
        Box::new(Stderr::new())
    };

    let level = config.debug().log_level();

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .log_queue_depth(config.debug().log_queue_depth())
    .single_message_size(config.debug().log_single_message_size())
    .build();

    let debug_log = match debug_log {
        Ok(log) => log,
        Err(e) => {
            eprintln!("failed to initialize debug log: {e}");
            std::process::exit(1);
        }
    };

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(debug_log)
        .build()
        .start();

    output!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // spawn logging thread
    let logger = std::thread::spawn(move || {
        while RUNNING.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(1));
            let _ = log.flush();
        }
        let _ = log.flush();
    });

    // build tracks, keeping concrete handles to drive their schedules
    let mut tracks = Vec::new();
    let mut registry = TrackRegistry::new();
    for track in config.tracks() {
        let track = match track.build() {
            Ok(track) => Arc::new(track),
            Err(e) => exit(logger, e),
        };
        if let Err(e) = registry.register(track.clone()) {
            exit(logger, e);
        }
        output!("Track: {} Pending profiles: {}", track.name(), track.pending());
        tracks.push(track);
    }

    let control = Arc::new(Control::new(
        registry,
        StartGate::new(config.general().wait_for_start()),
    ));

    let pipe = RainPipe::new(control.clone()).with_read_timeout(config.pipe().read_timeout());
    match pipe.start(port, config.pipe().threads()) {
        Ok(addr) => output!("Control pipe: {} Workers: {}", addr, config.pipe().threads()),
        Err(e) => exit(logger, format!("failed to start control pipe on port {port}: {e}")),
    }

    if control.start_gate().is_waiting() {
        output!("Waiting for benchmark start");
        while control.start_gate().is_waiting() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
    output!("Benchmark started");

    let start = Instant::now();
    let duration = config.general().duration();
    let stats_interval = config.general().stats_interval();
    let mut next_report = start + stats_interval;
    let mut window_id = 0;

    while start.elapsed() < duration {
        let now = Instant::now();
        for track in &tracks {
            advance(track, now);
        }

        if now >= next_report {
            rain_driver::output::report(window_id, &pipe.thread_stats(), control.tracks());
            window_id += 1;
            next_report += stats_interval;
        }

        std::thread::sleep(Duration::from_millis(10));
    }

    pipe.stop();
    rain_driver::output::report(window_id, &pipe.thread_stats(), control.tracks());

    RUNNING.store(false, Ordering::Relaxed);
    let _ = logger.join();
}

fn advance(track: &ScenarioTrack, now: Instant) {
    if let Some(profile) = track.advance_if_due(now) {
        output!("Track: {} Profile: {}", track.name(), profile);
    }
}

fn exit(logger: std::thread::JoinHandle<()>, reason: impl std::fmt::Display) -> ! {
    error!("{}", reason);
    eprintln!("{reason}");
    RUNNING.store(false, Ordering::Relaxed);
    let _ = logger.join();
    std::process::exit(1);
}
