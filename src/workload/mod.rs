// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! Workload synthesis: discrete distributions, key generators, hot-object
//! modeling, and the load profiles that configure them.
//!
//! Request generators read the active [`LoadProfile`] of their track and
//! build a [`KeySelector`] from it. None of the samplers here are internally
//! synchronized; each generator thread owns its own instances.

mod hotspot;
mod keygen;
mod multinomial;
mod object;
mod profile;
mod storage;

pub use hotspot::{Draw, HotObjectConfig, HotObjectSet, HotSelection, KeySelector};
pub use keygen::{
    KeyDistribution, KeyGenerator, KeyGeneratorParams, UniformKeyGenerator, ZipfKeyGenerator,
    ZipfMethod, DEFAULT_SEED,
};
pub use multinomial::{Dirichlet, Multinomial, MultinomialMixture, Sampler};
pub use object::ObjectGenerator;
pub use profile::LoadProfile;
pub use storage::{Operation, StorageMix, DEFAULT_REQUEST_SIZE};

/// Caller mistakes when building or drawing from a distribution.
#[derive(thiserror::Error, Debug)]
pub enum SamplingError {
    #[error("weight vector is empty")]
    EmptyWeights,
    #[error("weights must be finite and non-negative, got {0}")]
    InvalidWeight(f64),
    #[error("weights must contain at least one positive value")]
    ZeroSum,
    #[error("cannot draw {requested} distinct samples from {available} outcomes")]
    TooManySamples { requested: usize, available: usize },
    #[error("mixture has {components} components but {weights} weights")]
    MixtureWeights { components: usize, weights: usize },
    #[error("mixture components must share a size: expected {expected}, found {found}")]
    MixtureSize { expected: usize, found: usize },
    #[error("need {expected} concentration parameters, got {found}")]
    AlphaLength { expected: usize, found: usize },
    #[error("invalid concentration parameter {0}: {1}")]
    InvalidAlpha(f64, String),
    #[error("invalid popularity variance: {0}")]
    InvalidVariance(f64),
    #[error("zipf distribution requires a > 1: a = {0}")]
    InvalidShape(f64),
    #[error("invalid key range [{min_key}, {max_key}]: empty, or more keys than fit in a u64")]
    InvalidKeyRange { min_key: i64, max_key: i64 },
    #[error("{objects} objects for a sampler with {outcomes} outcomes")]
    ObjectCount { objects: usize, outcomes: usize },
}

/// Load profile construction failures.
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error("invalid hot traffic fraction: {0}, expected a value in [0, 1)")]
    HotTrafficFraction(f64),
    #[error("number of hot objects ({requested}) must be less than the number of objects ({available})")]
    TooManyHotObjects { requested: usize, available: u64 },
    #[error("hot key {0} listed more than once")]
    DuplicateHotKey(i64),
    #[error("profile has no key generator")]
    NoKeyGenerator,
}
