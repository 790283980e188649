//! Bootstrap confidence intervals and permutation tests.
//!
//! Every replicate draws from its own generator derived from the configured
//! seed, the resampling call and the replicate index, so a seeded run gives
//! the same answer serially or across a rayon pool. Replicate statistics are
//! collected before they are sorted or counted.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::parallel::{resolve_threads, run_in_pool};
use crate::stats::{norm_cdf, norm_ppf, round_half_even, weighted_mean};
use crate::types::{BootstrapCi, ResampleConfig};

/// Per-replicate progress reporting. The callback receives a running count
/// shared by every resampling loop of one analysis.
pub struct Progress<'a> {
    callback: Option<&'a (dyn Fn(usize) + Sync)>,
    count: AtomicUsize,
}

impl<'a> Progress<'a> {
    pub fn none() -> Self {
        Self {
            callback: None,
            count: AtomicUsize::new(0),
        }
    }

    pub fn new(callback: &'a (dyn Fn(usize) + Sync)) -> Self {
        Self {
            callback: Some(callback),
            count: AtomicUsize::new(0),
        }
    }

    pub fn tick(&self) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(callback) = self.callback {
            callback(count);
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Progress<'_> {
    fn default() -> Self {
        Self::none()
    }
}

pub struct Resampler<'a> {
    config: ResampleConfig,
    progress: &'a Progress<'a>,
    calls: AtomicU64,
}

fn split_mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl<'a> Resampler<'a> {
    pub fn new(config: ResampleConfig, progress: &'a Progress<'a>) -> Self {
        Self {
            config,
            progress,
            calls: AtomicU64::new(0),
        }
    }

    fn rng_for(&self, stream: u64, replicate: usize) -> StdRng {
        match self.config.seed {
            Some(seed) => {
                let mixed = split_mix(split_mix(seed ^ split_mix(stream)) ^ replicate as u64);
                StdRng::seed_from_u64(mixed)
            }
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Run `n` independent replicates of `f`, in parallel when configured.
    pub fn replicates<T, F>(&self, n: usize, context: &'static str, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&mut StdRng) -> T + Sync,
    {
        let stream = self.calls.fetch_add(1, Ordering::Relaxed);
        let run_one = |i: usize| {
            let mut rng = self.rng_for(stream, i);
            let out = f(&mut rng);
            self.progress.tick();
            out
        };
        if self.config.parallel {
            let threads = resolve_threads(self.config.cores, n);
            run_in_pool(threads, context, || {
                (0..n).into_par_iter().map(run_one).collect::<Vec<_>>()
            })
        } else {
            Ok((0..n).map(run_one).collect())
        }
    }

    /// Percentile and bias-corrected bootstrap intervals around a weighted
    /// mean. `samples` holds (effect, variance) pairs. Random-effects
    /// replicates reuse the one pooled variance estimated from the full data.
    pub fn bootstrap_mean_ci(
        &self,
        iterations: Option<usize>,
        samples: &[(f64, f64)],
        observed_mean: f64,
        pooled_var: f64,
        random_effects: bool,
        alpha: f64,
    ) -> Result<Option<BootstrapCi>> {
        let Some(iterations) = iterations else {
            return Ok(None);
        };
        let n = samples.len();
        if n == 0 {
            return Ok(None);
        }
        let pooled = if random_effects { pooled_var } else { 0.0 };
        let replicate_means = self.replicates(iterations, "bootstrap thread pool", |rng| {
            let mut e = Vec::with_capacity(n);
            let mut w = Vec::with_capacity(n);
            for _ in 0..n {
                let (effect, variance) = samples[rng.random_range(0..n)];
                e.push(effect);
                w.push(1.0 / (variance + pooled));
            }
            weighted_mean(&e, &w)
        })?;

        let below = replicate_means
            .iter()
            .filter(|&&m| m < observed_mean)
            .count();
        let mut all_means = Vec::with_capacity(iterations + 1);
        all_means.push(observed_mean);
        all_means.extend(replicate_means);
        all_means.sort_by(f64::total_cmp);

        let b = iterations as f64;
        let last = iterations as i64;
        let clamp = |idx: i64| idx.clamp(0, last) as usize;

        let lower_index = clamp(round_half_even((b + 1.0) * alpha / 2.0));
        let upper_index = clamp(round_half_even(b - (b + 1.0) * alpha / 2.0));

        let f = below as f64 / (b + 1.0);
        let z = -norm_ppf(alpha / 2.0);
        let z0 = norm_ppf(f);
        let lower_bias_index = clamp(round_half_even((b + 1.0) * norm_cdf(2.0 * z0 - z)));
        let upper_bias_index = clamp(round_half_even((b + 1.0) * norm_cdf(2.0 * z0 + z)));
        debug!(
            "bootstrap: {iterations} replicates, f={f}, indices=({lower_index}, {upper_index}), bias-corrected=({lower_bias_index}, {upper_bias_index})"
        );

        Ok(Some(BootstrapCi {
            lower: all_means[lower_index],
            upper: all_means[upper_index],
            lower_bias_corrected: all_means[lower_bias_index],
            upper_bias_corrected: all_means[upper_bias_index],
        }))
    }

    /// One-sided randomization test: shuffle `target`, recompute the
    /// statistic and count replicates at least as large as `observed`.
    /// The count starts at one, so `p = count / (iterations + 1)`.
    pub fn permutation_test<T, F>(
        &self,
        iterations: usize,
        target: &[T],
        observed: f64,
        statistic: F,
    ) -> Result<f64>
    where
        T: Clone + Send + Sync,
        F: Fn(&[T]) -> f64 + Sync,
    {
        let p = self.permutation_test_multi(iterations, target, &[observed], |permuted| {
            vec![statistic(permuted)]
        })?;
        Ok(p.first().copied().unwrap_or(1.0))
    }

    /// Randomization test over several statistics computed from the same
    /// permutation; each is compared with its own observed value.
    pub fn permutation_test_multi<T, F>(
        &self,
        iterations: usize,
        target: &[T],
        observed: &[f64],
        statistic: F,
    ) -> Result<Vec<f64>>
    where
        T: Clone + Send + Sync,
        F: Fn(&[T]) -> Vec<f64> + Sync,
    {
        let hits = self.replicates(iterations, "randomization thread pool", |rng| {
            let mut permuted = target.to_vec();
            permuted.shuffle(rng);
            let values = statistic(&permuted);
            observed
                .iter()
                .zip(values)
                .map(|(obs, value)| value >= *obs)
                .collect::<Vec<_>>()
        })?;
        let mut counts = vec![1usize; observed.len()];
        for replicate in hits {
            for (count, hit) in counts.iter_mut().zip(replicate) {
                if hit {
                    *count += 1;
                }
            }
        }
        let p: Vec<f64> = counts
            .into_iter()
            .map(|c| c as f64 / (iterations as f64 + 1.0))
            .collect();
        debug!("randomization: {iterations} replicates, p={p:?}");
        Ok(p)
    }
}
