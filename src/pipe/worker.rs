// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::{PipeStats, WORKER_THREAD_PREFIX};
use crate::control::Control;
use crate::protocol::{read_message, write_message, DecodeError, Message, StatusCode};
use async_channel::Receiver;
use core::fmt;
use ringlog::*;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const NO_LEADER: usize = usize::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next connection on behalf of the pool.
    Leading,
    /// Waiting for its turn to lead.
    Following,
    /// Serving one connection.
    Busy,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leading => write!(f, "leading"),
            Self::Following => write!(f, "following"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

pub(super) struct WorkerSlot {
    name: String,
    busy: AtomicBool,
    processed: AtomicU64,
}

/// State shared by the acceptor and the workers of one run of the pool.
pub(super) struct Shared {
    running: AtomicBool,
    lead: Mutex<()>,
    leader: AtomicUsize,
    // workers currently inside the lead section, and the most ever seen
    leaders: AtomicUsize,
    peak_leaders: AtomicUsize,
    slots: Vec<WorkerSlot>,
}

impl Shared {
    pub fn new(threads: usize) -> Self {
        Self {
            running: AtomicBool::new(true),
            lead: Mutex::new(()),
            leader: AtomicUsize::new(NO_LEADER),
            leaders: AtomicUsize::new(0),
            peak_leaders: AtomicUsize::new(0),
            slots: (0..threads)
                .map(|id| WorkerSlot {
                    name: format!("{WORKER_THREAD_PREFIX}{id}"),
                    busy: AtomicBool::new(false),
                    processed: AtomicU64::new(0),
                })
                .collect(),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Most workers that have ever held the lead at the same time. Counted
    /// independently of the lead lock, so anything above one means the lock
    /// failed to serialize the leaders.
    pub fn peak_leaders(&self) -> usize {
        self.peak_leaders.load(Ordering::Acquire)
    }

    /// Name, state and processed count of each worker. The state comes from
    /// the single pool-wide leader slot, so at most one worker reads as
    /// leading.
    pub fn workers(&self) -> Vec<(String, WorkerState, u64)> {
        let leader = self.leader.load(Ordering::Acquire);
        self.slots
            .iter()
            .enumerate()
            .map(|(id, slot)| {
                let state = if id == leader {
                    WorkerState::Leading
                } else if slot.busy.load(Ordering::Acquire) {
                    WorkerState::Busy
                } else {
                    WorkerState::Following
                };
                (
                    slot.name.clone(),
                    state,
                    slot.processed.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

/// One connection and the request read from it. Lives only while a single
/// worker serves it.
pub(crate) struct RawMessage {
    message: Option<Message>,
    receive_timestamp: Instant,
    completion_timestamp: Option<Instant>,
    stream: TcpStream,
}

impl RawMessage {
    /// Reads exactly one request. Transport and decode failures leave the
    /// message unusable; there is nobody to answer them.
    fn receive(mut stream: TcpStream, read_timeout: Duration) -> Self {
        let receive_timestamp = Instant::now();

        let message = match stream
            .set_read_timeout(Some(read_timeout))
            .map_err(DecodeError::from)
            .and_then(|_| read_message(&mut stream))
        {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("discarding connection: {}", e);
                None
            }
        };

        Self {
            message,
            receive_timestamp,
            completion_timestamp: None,
            stream,
        }
    }

    fn reply(&mut self, message: &Message) -> std::io::Result<()> {
        write_message(&mut self.stream, message)?;
        self.stream.flush()
    }

    fn complete(&mut self) {
        self.completion_timestamp = Some(Instant::now());
        let _ = self.stream.shutdown(Shutdown::Write);
    }

    fn latency(&self) -> Option<Duration> {
        self.completion_timestamp
            .map(|c| c.saturating_duration_since(self.receive_timestamp))
    }
}

pub(super) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    receiver: Receiver<TcpStream>,
    control: Arc<Control>,
    stats: Arc<PipeStats>,
    read_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        shared: Arc<Shared>,
        receiver: Receiver<TcpStream>,
        control: Arc<Control>,
        stats: Arc<PipeStats>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            id,
            shared,
            receiver,
            control,
            stats,
            read_timeout,
        }
    }

    pub fn run(self) {
        debug!("{} started", self.slot().name);

        while self.shared.running() {
            let Some(stream) = self.lead() else {
                break;
            };

            self.serve(stream);
            self.slot().busy.store(false, Ordering::Release);
        }

        debug!("{} exiting", self.slot().name);
    }

    fn slot(&self) -> &WorkerSlot {
        &self.shared.slots[self.id]
    }

    /// Takes the lead, waits for the next connection, and hands the lead on.
    fn lead(&self) -> Option<TcpStream> {
        let _lead = self
            .shared
            .lead
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.shared.running() {
            return None;
        }

        let leaders = self.shared.leaders.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.peak_leaders.fetch_max(leaders, Ordering::AcqRel);
        self.shared.leader.store(self.id, Ordering::Release);

        let stream = self.receiver.recv_blocking().ok();
        if stream.is_some() {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            self.slot().busy.store(true, Ordering::Release);
        }

        self.shared.leader.store(NO_LEADER, Ordering::Release);
        self.shared.leaders.fetch_sub(1, Ordering::AcqRel);

        stream
    }

    fn serve(&self, stream: TcpStream) {
        let mut raw = RawMessage::receive(stream, self.read_timeout);
        let Some(request) = raw.message.take() else {
            return;
        };
        trace!("{} received {}", self.slot().name, request.header());

        let control = &self.control;
        let reply = match catch_unwind(AssertUnwindSafe(|| control.dispatch(request))) {
            Ok(reply) => reply,
            Err(_) => {
                error!("{} failed to process request", self.slot().name);
                Message::status(StatusCode::ERROR)
            }
        };

        if let Err(e) = raw.reply(&reply) {
            error!("{} failed to send reply: {}", self.slot().name, e);
            let _ = raw.reply(&Message::status(StatusCode::ERROR));
        }
        raw.complete();

        self.slot().processed.fetch_add(1, Ordering::Relaxed);
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = raw.latency() {
            trace!("{} served request in {:?}", self.slot().name, latency);
        }
    }
}
