// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! Integer key generators over an inclusive range `[min_key, max_key]`.
//!
//! Every generator owns a PRNG seeded from its parameters, so two generators
//! built from the same parameters replay the same key sequence.

use super::multinomial::zipf_weights;
use super::SamplingError;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro512PlusPlus;
use serde::Deserialize;

pub const DEFAULT_SEED: u64 = 1;

/// How Zipf ranks are drawn.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ZipfMethod {
    /// Inverse-CDF over a cached table covering the whole key range.
    #[default]
    Direct,
    /// Devroye's rejection sampler. Constant memory.
    Rejection,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyDistribution {
    Uniform,
    Zipf {
        /// shape; larger values give taller peaks
        a: f64,
        /// scatters ranks across the key range
        r: f64,
        method: ZipfMethod,
    },
}

/// Everything needed to build (or rebuild) a key generator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyGeneratorParams {
    pub min_key: i64,
    pub max_key: i64,
    pub seed: u64,
    pub distribution: KeyDistribution,
}

impl KeyGeneratorParams {
    pub fn uniform(min_key: i64, max_key: i64, seed: u64) -> Self {
        Self {
            min_key,
            max_key,
            seed,
            distribution: KeyDistribution::Uniform,
        }
    }

    pub fn zipf(a: f64, r: f64, min_key: i64, max_key: i64, seed: u64, method: ZipfMethod) -> Self {
        Self {
            min_key,
            max_key,
            seed,
            distribution: KeyDistribution::Zipf { a, r, method },
        }
    }

    /// Number of keys in the inclusive range.
    pub fn range(&self) -> Result<u64, SamplingError> {
        check_range(self.min_key, self.max_key)
    }
}

pub enum KeyGenerator {
    Uniform(UniformKeyGenerator),
    Zipf(ZipfKeyGenerator),
}

impl KeyGenerator {
    pub fn new(params: &KeyGeneratorParams) -> Result<Self, SamplingError> {
        match params.distribution {
            KeyDistribution::Uniform => Ok(Self::Uniform(UniformKeyGenerator::new(
                params.min_key,
                params.max_key,
                params.seed,
            )?)),
            KeyDistribution::Zipf { a, r, method } => Ok(Self::Zipf(ZipfKeyGenerator::new(
                a,
                r,
                params.min_key,
                params.max_key,
                params.seed,
                method,
            )?)),
        }
    }

    pub fn generate_key(&mut self) -> i64 {
        match self {
            Self::Uniform(g) => g.generate_key(),
            Self::Zipf(g) => g.generate_key(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform(_) => "uniform",
            Self::Zipf(_) => "zipf",
        }
    }

    /// Smallest key and number of keys this generator draws from.
    pub fn bounds(&self) -> (i64, u64) {
        match self {
            Self::Uniform(g) => (g.min_key, g.range),
            Self::Zipf(g) => (g.min_key, g.range),
        }
    }
}

/// Key count of `[min_key, max_key]`. The full `i64` domain holds 2^64 keys
/// and has no `u64` count, so it is rejected along with empty ranges.
fn check_range(min_key: i64, max_key: i64) -> Result<u64, SamplingError> {
    let count = max_key as i128 - min_key as i128 + 1;
    match u64::try_from(count) {
        Ok(range) if range > 0 => Ok(range),
        _ => Err(SamplingError::InvalidKeyRange { min_key, max_key }),
    }
}

pub struct UniformKeyGenerator {
    min_key: i64,
    range: u64,
    rng: Xoshiro512PlusPlus,
}

impl UniformKeyGenerator {
    pub fn new(min_key: i64, max_key: i64, seed: u64) -> Result<Self, SamplingError> {
        let range = check_range(min_key, max_key)?;
        Ok(Self {
            min_key,
            range,
            rng: Xoshiro512PlusPlus::seed_from_u64(seed),
        })
    }

    pub fn generate_key(&mut self) -> i64 {
        let offset = (self.rng.random::<f64>() * self.range as f64).floor() as u64;
        // guard against the product rounding up to `range`
        let offset = offset.min(self.range - 1);
        // offsets past i64::MAX wrap onto the upper half of the range
        self.min_key.wrapping_add(offset as i64)
    }
}

pub struct ZipfKeyGenerator {
    a: f64,
    r: f64,
    min_key: i64,
    range: u64,
    method: ZipfMethod,
    rng: Xoshiro512PlusPlus,
    cdf: Option<Vec<f64>>,
}

impl ZipfKeyGenerator {
    pub fn new(
        a: f64,
        r: f64,
        min_key: i64,
        max_key: i64,
        seed: u64,
        method: ZipfMethod,
    ) -> Result<Self, SamplingError> {
        if a <= 1.0 || !a.is_finite() {
            return Err(SamplingError::InvalidShape(a));
        }
        let range = check_range(min_key, max_key)?;

        Ok(Self {
            a,
            r,
            min_key,
            range,
            method,
            rng: Xoshiro512PlusPlus::seed_from_u64(seed),
            cdf: None,
        })
    }

    pub fn generate_key(&mut self) -> i64 {
        let rank = match self.method {
            ZipfMethod::Direct => self.sample_direct(),
            ZipfMethod::Rejection => loop {
                // accepted ranks are unbounded, keep only those in range
                let x = self.sample_rejection();
                if x <= self.range as f64 {
                    break x as u64;
                }
            },
        };

        self.scatter(rank)
    }

    /// 1-based rank from the cached CDF. The table is built on first use.
    fn sample_direct(&mut self) -> u64 {
        let range = self.range as usize;
        let a = self.a;
        let cdf = self.cdf.get_or_insert_with(|| {
            let weights = zipf_weights(range, a);
            let sum: f64 = weights.iter().sum();
            let mut total = 0.0;
            weights
                .into_iter()
                .map(|w| {
                    total += w / sum;
                    total
                })
                .collect()
        });

        let u = self.rng.random::<f64>();
        let index = cdf.partition_point(|c| *c < u).min(range - 1);
        index as u64 + 1
    }

    /// Devroye, Non-Uniform Random Variate Generation, ch. 10. Returns a rank
    /// in `[1, inf)`; non-finite draws are rejected by the caller.
    fn sample_rejection(&mut self) -> f64 {
        let a = self.a;
        let b = 2.0_f64.powf(a - 1.0);
        loop {
            let u = self.rng.random::<f64>();
            let v = self.rng.random::<f64>();
            let x = u.powf(-1.0 / (a - 1.0)).floor();
            let t = (1.0 + 1.0 / x).powf(a - 1.0);
            if v * x * (t - 1.0) / (b - 1.0) <= t / b {
                return x;
            }
        }
    }

    /// Maps a rank onto the key range so that popular ranks are not clustered
    /// at the low end.
    fn scatter(&self, rank: u64) -> i64 {
        let value = (rank as f64 + 1.0) * self.r;
        let bits = value.to_bits();
        let hash = (bits ^ (bits >> 32)) as u32 as i32;
        self.min_key + (hash.unsigned_abs() as u64 % self.range) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn keys(generator: &mut KeyGenerator, n: usize) -> Vec<i64> {
        (0..n).map(|_| generator.generate_key()).collect()
    }

    #[test]
    fn uniform_replays_from_seed() {
        let params = KeyGeneratorParams::uniform(1, 100, 42);
        let mut a = KeyGenerator::new(&params).unwrap();
        let mut b = KeyGenerator::new(&params).unwrap();

        let first = keys(&mut a, 3);
        assert_eq!(first, keys(&mut b, 3));
        assert!(first.iter().all(|k| (1..=100).contains(k)));

        let mut other = KeyGenerator::new(&KeyGeneratorParams::uniform(1, 100, 43)).unwrap();
        assert_ne!(keys(&mut a, 32), keys(&mut other, 32));
    }

    #[test]
    fn uniform_covers_range() {
        let mut g = UniformKeyGenerator::new(-5, 5, 7).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let k = g.generate_key();
            assert!((-5..=5).contains(&k));
            seen.insert(k);
        }
        assert_eq!(seen.len(), 11);
    }

    #[test]
    fn zipf_replays_from_seed() {
        for method in [ZipfMethod::Direct, ZipfMethod::Rejection] {
            let params = KeyGeneratorParams::zipf(1.2, 3.456, 1, 1000, 9, method);
            let mut a = KeyGenerator::new(&params).unwrap();
            let mut b = KeyGenerator::new(&params).unwrap();
            assert_eq!(keys(&mut a, 500), keys(&mut b, 500));
        }
    }

    #[test]
    fn zipf_rejects_flat_shapes() {
        for a in [1.0, 0.5, f64::NAN] {
            let params = KeyGeneratorParams::zipf(a, 3.456, 1, 1000, 1, ZipfMethod::Direct);
            assert!(matches!(
                KeyGenerator::new(&params),
                Err(SamplingError::InvalidShape(_))
            ));
        }
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(matches!(
            KeyGenerator::new(&KeyGeneratorParams::uniform(10, 9, 1)),
            Err(SamplingError::InvalidKeyRange { .. })
        ));
    }

    #[test]
    fn rejects_key_ranges_too_wide_to_count() {
        for params in [
            KeyGeneratorParams::uniform(i64::MIN, i64::MAX, 1),
            KeyGeneratorParams::zipf(1.5, 3.456, i64::MIN, i64::MAX, 1, ZipfMethod::Rejection),
        ] {
            assert!(matches!(
                params.range(),
                Err(SamplingError::InvalidKeyRange { .. })
            ));
            assert!(matches!(
                KeyGenerator::new(&params),
                Err(SamplingError::InvalidKeyRange { .. })
            ));
        }

        // one key short of the full domain still counts
        let mut g = UniformKeyGenerator::new(i64::MIN, i64::MAX - 1, 1).unwrap();
        assert_eq!(g.range, u64::MAX);
        let _ = g.generate_key();
        assert_eq!(
            KeyGeneratorParams::uniform(i64::MIN + 1, i64::MAX, 1).range().unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn zipf_keys_stay_in_range_and_skew() {
        for method in [ZipfMethod::Direct, ZipfMethod::Rejection] {
            let mut g = ZipfKeyGenerator::new(1.5, 3.456, 100, 199, 3, method).unwrap();
            let mut counts: HashMap<i64, usize> = HashMap::new();
            for _ in 0..20_000 {
                let k = g.generate_key();
                assert!((100..=199).contains(&k), "{k} out of range");
                *counts.entry(k).or_default() += 1;
            }

            // the most popular key takes far more than a uniform share
            let top = counts.values().max().copied().unwrap_or(0);
            assert!(top > 20_000 / 100 * 5, "{method:?}: top key drew {top}");
        }
    }

    #[test]
    fn direct_ranks_follow_zipf() {
        let mut g = ZipfKeyGenerator::new(2.0, 3.456, 1, 50, 11, ZipfMethod::Direct).unwrap();
        let mut counts = [0usize; 51];
        for _ in 0..50_000 {
            counts[g.sample_direct() as usize] += 1;
        }
        assert!(counts[1] > counts[2]);
        assert!(counts[2] > counts[3]);
        assert!(counts[3] > counts[4]);
    }

    #[test]
    fn rejection_ranks_follow_zipf() {
        let mut g = ZipfKeyGenerator::new(2.0, 3.456, 1, 50, 11, ZipfMethod::Rejection).unwrap();
        let mut counts = [0usize; 5];
        for _ in 0..200_000 {
            let rank = g.sample_rejection();
            assert!(rank >= 1.0 && rank.fract() == 0.0, "bad rank {rank}");
            if rank < 5.0 {
                counts[rank as usize] += 1;
            }
        }
        assert!(counts[1] > counts[2]);
        assert!(counts[2] > counts[3]);
        assert!(counts[3] > counts[4]);

        // P(1) / P(2) is 2^a
        let ratio = counts[1] as f64 / counts[2] as f64;
        assert!((3.6..4.4).contains(&ratio), "rank 1/2 ratio {ratio}");
    }
}
