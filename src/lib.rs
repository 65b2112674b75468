// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! Control plane and workload synthesis for a distributed benchmark driver.
//!
//! A benchmark controller talks to each driver over the control pipe
//! ([`pipe::RainPipe`]) to list its tracks, release the start gate, and
//! push new load profiles. The [`workload`] module turns an installed
//! profile into the keys and operations request generators issue.

pub mod config;
pub mod control;
pub mod output;
pub mod pipe;
pub mod protocol;
pub mod track;
pub mod workload;
