// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

use super::multinomial::Sampler;
use super::SamplingError;
use rand::RngCore;

/// Picks objects from a fixed list with popularity given by a sampler over
/// the list's indices.
pub struct ObjectGenerator<T, S> {
    objects: Vec<T>,
    sampler: S,
}

impl<T, S: Sampler> ObjectGenerator<T, S> {
    pub fn new(objects: Vec<T>, sampler: S) -> Result<Self, SamplingError> {
        if objects.len() != sampler.size() {
            return Err(SamplingError::ObjectCount {
                objects: objects.len(),
                outcomes: sampler.size(),
            });
        }
        Ok(Self { objects, sampler })
    }

    pub fn next(&self, rng: &mut dyn RngCore) -> &T {
        &self.objects[self.sampler.sample_one(rng)]
    }

    pub fn number_of_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn objects(&self) -> &[T] {
        &self.objects
    }
}
