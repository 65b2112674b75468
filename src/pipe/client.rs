// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use crate::protocol::{
    read_message, write_message, DecodeError, DynamicLoadProfile, Message, StatusCode,
};
use crate::workload::LoadProfile;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(Message),
}

/// Talks to a control pipe the way a benchmark controller does: one
/// connection per request.
#[derive(Clone, Debug)]
pub struct PipeClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl PipeClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn send(&self, message: &Message) -> Result<Message, ClientError> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        write_message(&mut stream, message)?;
        stream.flush()?;

        Ok(read_message(&mut stream)?)
    }

    pub fn track_names(&self) -> Result<Vec<String>, ClientError> {
        match self.send(&Message::TrackListRequest)? {
            Message::TrackListReply { track_names } => Ok(track_names),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    pub fn start_benchmark(&self, controller_timestamp: i64) -> Result<StatusCode, ClientError> {
        self.status(&Message::BenchmarkStart {
            controller_timestamp,
        })
    }

    pub fn submit_profile(
        &self,
        track: &str,
        profile: &LoadProfile,
    ) -> Result<StatusCode, ClientError> {
        self.status(&Message::DynamicLoadProfile(DynamicLoadProfile::new(
            track, profile,
        )))
    }

    fn status(&self, message: &Message) -> Result<StatusCode, ClientError> {
        match self.send(message)? {
            Message::Status { code } => Ok(code),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }
}
