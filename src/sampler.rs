//! Token sampling policies.
//!
//! The session only depends on the [`Sampler`] trait, so stochastic policies
//! can be swapped in without touching the decode loop. The default policy is
//! deterministic arg-max; the stochastic sampler supports temperature, top-k,
//! and top-p with a seeded XorShift RNG (no `rand` dependency needed).

use crate::token::{TokenCandidate, TokenId};

/// Chooses the next token from the engine's per-vocabulary scores.
pub trait Sampler: Send {
    fn sample(&mut self, candidates: &[TokenCandidate]) -> TokenId;
}

/// Deterministic arg-max over score.
///
/// Ties resolve to the lowest token id (vocabulary order), which keeps
/// repeated runs byte-for-byte reproducible.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedySampler;

impl Sampler for GreedySampler {
    fn sample(&mut self, candidates: &[TokenCandidate]) -> TokenId {
        let mut best_id: TokenId = 0;
        let mut best_score = f32::NEG_INFINITY;
        for c in candidates {
            // Strict comparison keeps the first (lowest-id) of equal scores.
            if c.score > best_score {
                best_score = c.score;
                best_id = c.id;
            }
        }
        best_id
    }
}

/// Stochastic sampling configuration.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Temperature for score scaling. 0.0 falls back to greedy.
    pub temperature: f32,
    /// Keep only the top-k highest-scored candidates. 0 = disabled.
    pub top_k: usize,
    /// Nucleus cutoff on cumulative probability. 1.0 = disabled.
    pub top_p: f32,
    /// RNG seed for reproducibility.
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 0,
            top_p: 1.0,
            seed: 42,
        }
    }
}

/// XorShift64 RNG, small and reproducible.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Create a new RNG from a seed. Seed of 0 is adjusted to 1.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Random f32 in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Temperature / top-k / top-p sampling over token candidates.
#[derive(Debug, Clone)]
pub struct StochasticSampler {
    config: SamplingConfig,
    rng: XorShiftRng,
}

impl StochasticSampler {
    pub fn new(config: SamplingConfig) -> Self {
        let rng = XorShiftRng::new(config.seed);
        Self { config, rng }
    }
}

impl Sampler for StochasticSampler {
    /// Steps:
    /// 1. temperature == 0.0: greedy arg-max.
    /// 2. Scale scores by 1/temperature.
    /// 3. Top-K: keep the k highest.
    /// 4. Softmax over what remains.
    /// 5. Top-P: cumulative probability cutoff, renormalize.
    /// 6. Draw from the categorical distribution.
    fn sample(&mut self, candidates: &[TokenCandidate]) -> TokenId {
        if candidates.is_empty() {
            return 0;
        }

        if self.config.temperature <= 0.0 {
            return GreedySampler.sample(candidates);
        }

        let mut scaled: Vec<(TokenId, f32)> = candidates
            .iter()
            .map(|c| (c.id, c.score / self.config.temperature))
            .collect();

        if self.config.top_k > 0 && self.config.top_k < scaled.len() {
            scaled.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scaled.truncate(self.config.top_k);
        }

        // Softmax
        let max_score = scaled.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);
        let mut probs: Vec<(TokenId, f32)> = scaled
            .iter()
            .map(|&(id, s)| (id, (s - max_score).exp()))
            .collect();
        let sum: f32 = probs.iter().map(|c| c.1).sum();
        for p in &mut probs {
            p.1 /= sum;
        }

        if self.config.top_p < 1.0 {
            probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let mut cumulative = 0.0f32;
            let mut cutoff = probs.len();
            for (i, &(_, p)) in probs.iter().enumerate() {
                cumulative += p;
                if cumulative >= self.config.top_p {
                    cutoff = i + 1;
                    break;
                }
            }
            probs.truncate(cutoff);

            let sum2: f32 = probs.iter().map(|c| c.1).sum();
            for p in &mut probs {
                p.1 /= sum2;
            }
        }

        let r = self.rng.next_f32();
        let mut cumulative = 0.0f32;
        for &(id, p) in &probs {
            cumulative += p;
            if r < cumulative {
                return id;
            }
        }

        // Floating-point slack: fall back to the last surviving candidate.
        probs.last().map(|c| c.0).unwrap_or(0)
    }
}
