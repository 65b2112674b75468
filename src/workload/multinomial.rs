// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! Discrete distributions over index spaces `[0, n)`.
//!
//! A [`Multinomial`] is built from an arbitrary non-negative weight vector and
//! samples by inverse-CDF lookup. A [`MultinomialMixture`] first picks one of
//! several equally-sized multinomials and then delegates to it. [`Dirichlet`]
//! draws random probability vectors, which is how skewed popularity for a hot
//! object set is produced.

use super::SamplingError;
use ahash::{HashSet, HashSetExt};
use rand::seq::SliceRandom;
use rand::Rng;
use rand::RngCore;
use rand_distr::{Distribution, Gamma};

/// Common interface for samplers that produce indices into a fixed-size
/// population.
pub trait Sampler {
    /// Number of outcomes in the population.
    fn size(&self) -> usize;

    /// Draws a single index.
    fn sample_one(&self, rng: &mut dyn RngCore) -> usize;

    /// Draws `n` independent indices.
    fn sample_with_replacement(&self, n: usize, rng: &mut dyn RngCore) -> Vec<usize>;

    /// Draws `n` distinct indices by rejection. Fails if fewer than `n`
    /// outcomes have non-zero probability.
    fn sample_without_replacement(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SamplingError>;
}

#[derive(Clone, Debug)]
pub struct Multinomial {
    probabilities: Vec<f64>,
    cdf: Vec<f64>,
}

impl Multinomial {
    /// Builds a multinomial from non-negative weights. The weights are
    /// normalized so they sum to one.
    pub fn new(weights: Vec<f64>) -> Result<Self, SamplingError> {
        if weights.is_empty() {
            return Err(SamplingError::EmptyWeights);
        }

        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(SamplingError::InvalidWeight(*w));
        }

        let probabilities = normalize(weights)?;
        let cdf = cumulative(&probabilities);

        Ok(Self { probabilities, cdf })
    }

    /// Every outcome is equally likely.
    pub fn uniform(n: usize) -> Result<Self, SamplingError> {
        Self::new(vec![1.0; n])
    }

    /// Zipf popularity with the given shape, shuffled so that the most popular
    /// outcome is not always index zero.
    pub fn zipf(n: usize, shape: f64, rng: &mut dyn RngCore) -> Result<Self, SamplingError> {
        Ok(Self::new(zipf_weights(n, shape))?.shuffle(rng))
    }

    /// `k` equally likely outcomes hidden among `n`, the rest never drawn.
    pub fn sparse(k: usize, n: usize, rng: &mut dyn RngCore) -> Result<Self, SamplingError> {
        let weights = (0..n).map(|i| if i < k { 1.0 } else { 0.0 }).collect();
        Ok(Self::new(weights)?.shuffle(rng))
    }

    /// Pads `weights` with zeros up to `n` outcomes and shuffles. Weights past
    /// `n` are dropped.
    pub fn sparse_from(
        weights: &[f64],
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Self, SamplingError> {
        let padded = (0..n)
            .map(|i| weights.get(i).copied().unwrap_or(0.0))
            .collect();
        Ok(Self::new(padded)?.shuffle(rng))
    }

    /// Returns a copy with the probabilities randomly permuted.
    pub fn shuffle(&self, rng: &mut dyn RngCore) -> Self {
        let mut probabilities = self.probabilities.clone();
        probabilities.shuffle(rng);
        let cdf = cumulative(&probabilities);
        Self { probabilities, cdf }
    }

    /// Returns a copy with the probabilities sorted.
    pub fn sort(&self, increasing: bool) -> Self {
        let mut probabilities = self.probabilities.clone();
        if increasing {
            probabilities.sort_by(|a, b| a.total_cmp(b));
        } else {
            probabilities.sort_by(|a, b| b.total_cmp(a));
        }
        let cdf = cumulative(&probabilities);
        Self { probabilities, cdf }
    }

    /// Drops outcomes from the tail until at most `target` remain, then
    /// renormalizes.
    pub fn shrink(&mut self, target: usize) -> Result<(), SamplingError> {
        if self.probabilities.len() <= target {
            return Ok(());
        }

        let mut truncated = self.probabilities.clone();
        truncated.truncate(target);
        if truncated.is_empty() {
            return Err(SamplingError::EmptyWeights);
        }

        self.probabilities = normalize(truncated)?;
        self.cdf = cumulative(&self.probabilities);
        Ok(())
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn cdf(&self) -> &[f64] {
        &self.cdf
    }

    /// Number of outcomes that can actually be drawn.
    pub fn support(&self) -> usize {
        self.probabilities.iter().filter(|p| **p > 0.0).count()
    }
}

impl Sampler for Multinomial {
    fn size(&self) -> usize {
        self.probabilities.len()
    }

    fn sample_one(&self, rng: &mut dyn RngCore) -> usize {
        self.sample(rng)
    }

    fn sample_with_replacement(&self, n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
        (0..n).map(|_| self.sample(rng)).collect()
    }

    fn sample_without_replacement(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SamplingError> {
        let available = self.support();
        if n > available {
            return Err(SamplingError::TooManySamples {
                requested: n,
                available,
            });
        }

        let mut seen = HashSet::with_capacity(n);
        let mut samples = Vec::with_capacity(n);
        while samples.len() < n {
            let s = self.sample(rng);
            if seen.insert(s) {
                samples.push(s);
            }
        }

        Ok(samples)
    }
}

impl Distribution<usize> for Multinomial {
    /// Inverse-CDF lookup: the smallest `i` such that
    /// `cdf[i - 1] < u <= cdf[i]`, with `cdf[-1] = 0`.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let last = self.cdf.len() - 1;
        let u = rng.random::<f64>() * self.cdf[last];

        // u == 0 lies in no right-closed interval; take the first outcome that
        // has mass
        let index = if u > 0.0 {
            self.cdf.partition_point(|c| *c < u)
        } else {
            self.cdf.partition_point(|c| *c <= 0.0)
        };

        index.min(last)
    }
}

/// A mixture over equally-sized multinomials. Each draw first picks a
/// component according to the mixture weights.
#[derive(Clone, Debug)]
pub struct MultinomialMixture {
    mix: Multinomial,
    components: Vec<Multinomial>,
}

impl MultinomialMixture {
    pub fn new(components: Vec<Multinomial>, weights: Vec<f64>) -> Result<Self, SamplingError> {
        if components.is_empty() {
            return Err(SamplingError::EmptyWeights);
        }

        if components.len() != weights.len() {
            return Err(SamplingError::MixtureWeights {
                components: components.len(),
                weights: weights.len(),
            });
        }

        let size = components[0].size();
        if let Some(c) = components.iter().find(|c| c.size() != size) {
            return Err(SamplingError::MixtureSize {
                expected: size,
                found: c.size(),
            });
        }

        Ok(Self {
            mix: Multinomial::new(weights)?,
            components,
        })
    }

    fn component(&self, rng: &mut dyn RngCore) -> &Multinomial {
        &self.components[self.mix.sample(rng)]
    }
}

impl Sampler for MultinomialMixture {
    /// All components share a size, so this does not need to draw one.
    fn size(&self) -> usize {
        self.components[0].size()
    }

    fn sample_one(&self, rng: &mut dyn RngCore) -> usize {
        let component = self.component(rng);
        component.sample_one(rng)
    }

    fn sample_with_replacement(&self, n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
        let component = self.component(rng);
        component.sample_with_replacement(n, rng)
    }

    fn sample_without_replacement(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SamplingError> {
        let component = self.component(rng);
        component.sample_without_replacement(n, rng)
    }
}

/// Draws probability vectors from a Dirichlet distribution using the Gamma
/// construction.
pub struct Dirichlet;

impl Dirichlet {
    /// Draws `n` values with `Gamma(alpha[i], 1)` and normalizes them by their
    /// sum.
    pub fn sample(
        n: usize,
        alpha: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, SamplingError> {
        if alpha.len() < n {
            return Err(SamplingError::AlphaLength {
                expected: n,
                found: alpha.len(),
            });
        }

        let mut samples = Vec::with_capacity(n);
        for a in &alpha[..n] {
            let gamma = Gamma::new(*a, 1.0)
                .map_err(|e| SamplingError::InvalidAlpha(*a, e.to_string()))?;
            samples.push(gamma.sample(rng));
        }

        let sum: f64 = samples.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(SamplingError::ZeroSum);
        }

        for s in samples.iter_mut() {
            *s /= sum;
        }

        Ok(samples)
    }

    /// Symmetric concentration parameter for `n` objects whose popularities
    /// should have roughly the given variance. Low variance gives near-equal
    /// popularity, high variance lets a few objects dominate. The variance is
    /// scaled down until the parameter is positive.
    pub fn symmetric_alpha(n: usize, variance: f64) -> Result<f64, SamplingError> {
        if n < 2 || variance <= 0.0 || !variance.is_finite() {
            return Err(SamplingError::InvalidVariance(variance));
        }

        let n = n as f64;
        let mut variance = variance;
        let alpha = |v: f64| (n - 1.0 - v * n.powi(2)) / (v * n.powi(3));

        let mut a = alpha(variance);
        while a <= 0.0 {
            variance /= 100.0;
            a = alpha(variance);
        }

        Ok(a)
    }
}

/// Unshuffled Zipf weights: `weight(i) = (1 / (i + 1)) ^ shape`.
pub(crate) fn zipf_weights(n: usize, shape: f64) -> Vec<f64> {
    (0..n).map(|i| (1.0 / (i as f64 + 1.0)).powf(shape)).collect()
}

fn normalize(weights: Vec<f64>) -> Result<Vec<f64>, SamplingError> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(SamplingError::ZeroSum);
    }
    Ok(weights.into_iter().map(|w| w / sum).collect())
}

fn cumulative(probabilities: &[f64]) -> Vec<f64> {
    let mut sum = 0.0;
    probabilities
        .iter()
        .map(|p| {
            sum += p;
            sum
        })
        .collect()
}
