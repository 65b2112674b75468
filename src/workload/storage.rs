// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::multinomial::{Multinomial, Sampler};
use super::SamplingError;
use rand::RngCore;

pub const DEFAULT_REQUEST_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Update,
    Delete,
}

const OPERATIONS: [Operation; 4] = [
    Operation::Read,
    Operation::Write,
    Operation::Update,
    Operation::Delete,
];

/// Operation mix for key-value workloads. The fractions are normalized so
/// they sum to one.
#[derive(Clone, Debug)]
pub struct StorageMix {
    size: usize,
    operations: Multinomial,
}

impl StorageMix {
    pub fn new(
        size: usize,
        read: f64,
        write: f64,
        update: f64,
        delete: f64,
    ) -> Result<Self, SamplingError> {
        Ok(Self {
            size,
            operations: Multinomial::new(vec![read, write, update, delete])?,
        })
    }

    /// Value size in bytes for writes and updates.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fraction(&self, operation: Operation) -> f64 {
        let index = OPERATIONS
            .iter()
            .position(|o| *o == operation)
            .unwrap_or_default();
        self.operations.probabilities()[index]
    }

    pub fn next_operation(&self, rng: &mut dyn RngCore) -> Operation {
        OPERATIONS[self.operations.sample_one(rng)]
    }
}
