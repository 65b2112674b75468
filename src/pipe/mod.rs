// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! The control pipe: a listening socket served by a fixed pool of worker
//! threads in leader-followers style.
//!
//! A single acceptor thread is the only thread ever inside `accept()`. It
//! polls a non-blocking listener, so it notices shutdown on its own and
//! closes the socket on the way out, and hands each connection to a bounded
//! queue. Workers take turns leading:
//! the leader holds the lead lock while it waits on the queue, and releases
//! it as soon as it has a connection, so the next worker can lead while it
//! serves the request outside the lock. Each connection carries one request
//! and gets one reply.

mod client;
mod worker;

pub use client::{ClientError, PipeClient};
pub use worker::WorkerState;

use crate::control::Control;
use async_channel::{bounded, Receiver, Sender};
use core::fmt;
use ringlog::*;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use worker::{Shared, Worker};

pub const DEFAULT_PORT: u16 = 7851;
pub const DEFAULT_THREADS: usize = 3;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker threads are named with this prefix followed by their index.
pub const WORKER_THREAD_PREFIX: &str = "rain-pipe-worker-";

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Pool-wide message counters. Survive restarts of the pool.
#[derive(Default)]
pub struct PipeStats {
    received: AtomicU64,
    processed: AtomicU64,
}

impl PipeStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub name: String,
    pub state: WorkerState,
    pub processed: u64,
}

/// A point-in-time view of the worker pool.
#[derive(Clone, Debug, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
    /// Most workers ever seen inside the lead section at once.
    pub peak_leaders: usize,
    pub received: u64,
    pub processed: u64,
}

impl PoolReport {
    fn count(&self, state: WorkerState) -> usize {
        self.workers.iter().filter(|w| w.state == state).count()
    }

    pub fn leaders(&self) -> usize {
        self.count(WorkerState::Leading)
    }

    pub fn busy(&self) -> usize {
        self.count(WorkerState::Busy)
    }

    pub fn followers(&self) -> usize {
        self.count(WorkerState::Following)
    }

    /// Connections that were taken off the queue but never answered.
    pub fn ignored(&self) -> u64 {
        self.received.saturating_sub(self.processed)
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipe: Workers: {} Leading: {} Busy: {} Following: {} Received: {} Processed: {} Ignored: {}",
            self.workers.len(),
            self.leaders(),
            self.busy(),
            self.followers(),
            self.received,
            self.processed,
            self.ignored()
        )
    }
}

struct Active {
    addr: SocketAddr,
    shared: Arc<Shared>,
    // kept to close the queue on shutdown
    queue: Receiver<TcpStream>,
    acceptor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Active {
    fn shutdown(mut self) {
        self.shared.shutdown();
        self.queue.close();

        if let Some(acceptor) = self.acceptor.take() {
            join(acceptor);
        }
        for worker in self.workers.drain(..) {
            join(worker);
        }
    }
}

/// The control pipe. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct RainPipe {
    control: Arc<Control>,
    bind_address: IpAddr,
    read_timeout: Duration,
    stats: Arc<PipeStats>,
    active: Mutex<Option<Active>>,
}

impl RainPipe {
    pub fn new(control: Arc<Control>) -> Self {
        Self {
            control,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            read_timeout: DEFAULT_READ_TIMEOUT,
            stats: Arc::new(PipeStats::default()),
            active: Mutex::new(None),
        }
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Bounds how long a worker waits for a slow client to send its request.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Binds the listening socket and launches the acceptor and `threads`
    /// workers. Returns the bound address. Starting a running pipe returns
    /// the address it is already bound to.
    pub fn start(&self, port: u16, threads: usize) -> std::io::Result<SocketAddr> {
        let mut active = self.active();
        if let Some(active) = active.as_ref() {
            return Ok(active.addr);
        }

        if threads == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "pipe needs at least one worker thread",
            ));
        }

        let listener = TcpListener::bind((self.bind_address, port))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (sender, receiver) = bounded(threads);
        let shared = Arc::new(Shared::new(threads));

        let mut pool = Active {
            addr,
            shared: shared.clone(),
            queue: receiver.clone(),
            acceptor: None,
            workers: Vec::with_capacity(threads),
        };

        for id in 0..threads {
            let worker = Worker::new(
                id,
                shared.clone(),
                receiver.clone(),
                self.control.clone(),
                self.stats.clone(),
                self.read_timeout,
            );
            match std::thread::Builder::new()
                .name(format!("{WORKER_THREAD_PREFIX}{id}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }

        let acceptor_shared = shared.clone();
        match std::thread::Builder::new()
            .name("rain-pipe-acceptor".to_string())
            .spawn(move || accept(listener, sender, acceptor_shared))
        {
            Ok(handle) => pool.acceptor = Some(handle),
            Err(e) => {
                pool.shutdown();
                return Err(e);
            }
        }

        info!("pipe listening on {} with {} workers", addr, threads);
        *active = Some(pool);
        Ok(addr)
    }

    /// Stops accepting, closes the listening socket and joins every thread, giving each up
    /// to five seconds before abandoning it. Returns `false` if the pipe was
    /// not running. Never fails.
    pub fn stop(&self) -> bool {
        let Some(pool) = self.active().take() else {
            return false;
        };
        let addr = pool.addr;
        pool.shutdown();
        info!("pipe on {} stopped", addr);
        true
    }

    pub fn disconnect(&self) -> bool {
        self.stop()
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active().as_ref().map(|a| a.addr)
    }

    pub fn stats(&self) -> &PipeStats {
        &self.stats
    }

    pub fn thread_stats(&self) -> PoolReport {
        let (workers, peak_leaders) = self
            .active()
            .as_ref()
            .map(|a| {
                let workers = a
                    .shared
                    .workers()
                    .into_iter()
                    .map(|(name, state, processed)| WorkerReport {
                        name,
                        state,
                        processed,
                    })
                    .collect::<Vec<_>>();
                (workers, a.shared.peak_leaders())
            })
            .unwrap_or_default();

        PoolReport {
            workers,
            peak_leaders,
            received: self.stats.received(),
            processed: self.stats.processed(),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RainPipe {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept(listener: TcpListener, sender: Sender<TcpStream>, shared: Arc<Shared>) {
    while shared.running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                // accepted sockets are served with blocking reads
                if let Err(e) = stream.set_nonblocking(false) {
                    debug!("dropping connection from {}: {}", peer, e);
                    continue;
                }
                if sender.send_blocking(stream).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                debug!("accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("acceptor exiting");
}

fn join(handle: JoinHandle<()>) {
    let deadline = Instant::now() + JOIN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                "abandoning thread {} after {:?}",
                handle.thread().name().unwrap_or("unnamed"),
                JOIN_TIMEOUT
            );
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}

/// `true` on threads owned by a pipe worker pool.
pub fn is_worker_thread() -> bool {
    std::thread::current()
        .name()
        .map(|name| name.starts_with(WORKER_THREAD_PREFIX))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StartGate;
    use crate::protocol::{Message, StatusCode};
    use crate::track::TrackRegistry;

    fn pipe() -> RainPipe {
        let control = Arc::new(Control::new(TrackRegistry::new(), StartGate::new(false)));
        RainPipe::new(control).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn start_is_idempotent() {
        let pipe = pipe();
        let addr = pipe.start(0, 2).unwrap();
        assert_eq!(pipe.start(0, 2).unwrap(), addr);
        assert_eq!(pipe.local_addr(), Some(addr));
        assert_eq!(pipe.thread_stats().workers.len(), 2);

        assert!(pipe.stop());
        assert!(!pipe.stop());
        assert!(!pipe.disconnect());
        assert!(!pipe.is_active());
        assert!(pipe.thread_stats().workers.is_empty());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let pipe = pipe();
        assert!(pipe.start(0, 0).is_err());
        assert!(!pipe.is_active());
    }

    #[test]
    fn restart_keeps_counters() {
        let pipe = pipe();
        let addr = pipe.start(0, 1).unwrap();
        let reply = PipeClient::new(addr)
            .send(&Message::BenchmarkStart {
                controller_timestamp: 0,
            })
            .unwrap();
        assert_eq!(reply, Message::status(StatusCode::OK));
        pipe.stop();

        let addr = pipe.start(0, 1).unwrap();
        PipeClient::new(addr).track_names().unwrap();
        pipe.stop();

        let report = pipe.thread_stats();
        assert_eq!(report.received, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.ignored(), 0);
    }

    #[test]
    fn report_counts_states() {
        let report = PoolReport {
            workers: vec![
                WorkerReport {
                    name: "a".into(),
                    state: WorkerState::Leading,
                    processed: 1,
                },
                WorkerReport {
                    name: "b".into(),
                    state: WorkerState::Busy,
                    processed: 0,
                },
                WorkerReport {
                    name: "c".into(),
                    state: WorkerState::Following,
                    processed: 2,
                },
            ],
            peak_leaders: 1,
            received: 5,
            processed: 3,
        };
        assert_eq!(report.leaders(), 1);
        assert_eq!(report.busy(), 1);
        assert_eq!(report.followers(), 1);
        assert_eq!(report.ignored(), 2);
        assert!(report.to_string().contains("Ignored: 2"));
    }

    #[test]
    fn stop_closes_the_listener() {
        let pipe = pipe();
        let addr = pipe.start(0, 2).unwrap();
        PipeClient::new(addr).track_names().unwrap();

        assert!(pipe.stop());
        // nothing is listening any more
        assert!(TcpStream::connect_timeout(&addr, Duration::from_secs(1)).is_err());
        // and the port can be bound again
        assert!(TcpListener::bind(addr).is_ok());
    }
}
