//! Throughput benchmarking over the session's decode primitives.
//!
//! Exercises the engine with synthetic batches (token content is never
//! evaluated for correctness, only timed), bypassing sampling and text
//! reassembly entirely. Two phases per repetition: prompt-processing (one
//! wide batch, one decode) and text-generation (one decode per step, with
//! optional parallel sequences sharing each position).

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::session::{Session, SessionState};

/// Benchmark shape: pp/tg/pl/reps in the conventional engine-bench naming.
#[derive(Debug, Clone)]
pub struct BenchParams {
    /// Tokens in the synthetic prompt batch ("pp").
    pub prompt_tokens: usize,
    /// Generation steps per repetition ("tg").
    pub gen_tokens: usize,
    /// Parallel sequences per generation step ("pl").
    pub parallel: usize,
    /// Repetitions to average over.
    pub reps: usize,
}

impl Default for BenchParams {
    fn default() -> Self {
        Self {
            prompt_tokens: 512,
            gen_tokens: 128,
            parallel: 1,
            reps: 3,
        }
    }
}

/// Running sum and sum-of-squares over throughput samples.
#[derive(Debug, Default, Clone)]
struct RunningStats {
    sum: f64,
    sum_sq: f64,
    n: usize,
}

impl RunningStats {
    fn push(&mut self, sample: f64) {
        self.sum += sample;
        self.sum_sq += sample * sample;
        self.n += 1;
    }

    fn mean(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.sum / self.n as f64
    }

    /// Unbiased sample standard deviation; exactly 0 for fewer than two
    /// samples.
    fn std_dev(&self) -> f64 {
        if self.n <= 1 {
            return 0.0;
        }
        let n = self.n as f64;
        let mean = self.mean();
        // Clamp: the two running sums can go fractionally negative under
        // floating-point cancellation.
        (self.sum_sq / (n - 1.0) - mean * mean * n / (n - 1.0))
            .max(0.0)
            .sqrt()
    }
}

/// One benchmark phase: its table label and throughput statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    /// `pp <n>` or `tg <n>`.
    pub label: String,
    /// Mean tokens per second across repetitions.
    pub mean_tps: f64,
    /// Sample standard deviation of tokens per second (0 for one rep).
    pub std_dev_tps: f64,
}

/// Full benchmark report, renderable as a markdown table or JSON.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub model: String,
    pub size_bytes: u64,
    pub param_count: u64,
    pub backend: String,
    pub prompt: PhaseReport,
    pub generation: PhaseReport,
}

impl BenchReport {
    /// Render the conventional six-column throughput table.
    pub fn markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("| model | size | params | backend | test | t/s |\n");
        out.push_str("| --- | --- | --- | --- | --- | --- |\n");
        for phase in [&self.prompt, &self.generation] {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {:.2} ± {:.2} |\n",
                self.model,
                format_size(self.size_bytes),
                format_param_count(self.param_count),
                self.backend,
                phase.label,
                phase.mean_tps,
                phase.std_dev_tps,
            ));
        }
        out
    }
}

/// Humanize a byte count for the report table.
pub fn format_size(bytes: u64) -> String {
    const GIB: f64 = (1u64 << 30) as f64;
    const MIB: f64 = (1u64 << 20) as f64;
    const KIB: f64 = (1u64 << 10) as f64;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

/// Humanize a parameter count for the report table.
pub fn format_param_count(count: u64) -> String {
    let c = count as f64;
    if c >= 1e9 {
        format!("{:.2} B", c / 1e9)
    } else if c >= 1e6 {
        format!("{:.2} M", c / 1e6)
    } else if c >= 1e3 {
        format!("{:.2} K", c / 1e3)
    } else {
        format!("{}", count)
    }
}

impl Session {
    /// Time the engine's decode path and report per-phase throughput.
    ///
    /// Runs from `Idle` or `Completed` (the cache is wiped between phases,
    /// so an in-flight generation would be destroyed). A successful run
    /// leaves the session `Idle`; a decode failure is fatal and leaves it
    /// `Failed` until [`Session::clear`].
    pub fn bench(&mut self, params: &BenchParams) -> Result<BenchReport, SessionError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Completed) {
            return Err(SessionError::InvalidState {
                op: "bench",
                state: self.state,
            });
        }

        let pp = params.prompt_tokens.max(1);
        let tg = params.gen_tokens.max(1);
        let pl = params.parallel.max(1);
        let reps = params.reps.max(1);

        info!(pp, tg, pl, reps, "Starting benchmark");

        let mut pp_stats = RunningStats::default();
        let mut tg_stats = RunningStats::default();

        for rep in 0..reps {
            // Prompt-processing: one batch of pp synthetic tokens, logits
            // requested only for the last slot.
            self.batch.clear();
            for i in 0..pp {
                self.batch.add(0, i as i32, &[0], i + 1 == pp)?;
            }
            self.ctx.reset_cache();

            let start = Instant::now();
            let status = self.ctx.decode(&self.batch);
            if status != 0 {
                self.state = SessionState::Failed;
                return Err(SessionError::BenchPromptDecodeFailed(status));
            }
            let pp_secs = start.elapsed().as_secs_f64().max(1e-9);
            let pp_tps = pp as f64 / pp_secs;
            pp_stats.push(pp_tps);

            // Text-generation: tg decodes of pl parallel-sequence entries,
            // each step's entries sharing one position.
            self.ctx.reset_cache();
            let start = Instant::now();
            for i in 0..tg {
                self.batch.clear();
                for seq in 0..pl {
                    self.batch.add(0, i as i32, &[seq as i32], true)?;
                }
                let status = self.ctx.decode(&self.batch);
                if status != 0 {
                    self.state = SessionState::Failed;
                    return Err(SessionError::BenchGenerationDecodeFailed(status));
                }
            }
            let tg_secs = start.elapsed().as_secs_f64().max(1e-9);
            let tg_tps = (pl * tg) as f64 / tg_secs;
            tg_stats.push(tg_tps);

            self.ctx.reset_cache();
            debug!(rep, pp_tps, tg_tps, "Benchmark repetition done");
        }

        // Leave the session reusable: cache wiped, counters zeroed.
        self.clear();

        Ok(BenchReport {
            model: self.model.describe(),
            size_bytes: self.model.size_bytes(),
            param_count: self.model.param_count(),
            backend: self.model.backend().name().to_string(),
            prompt: PhaseReport {
                label: format!("pp {}", pp),
                mean_tps: pp_stats.mean(),
                std_dev_tps: pp_stats.std_dev(),
            },
            generation: PhaseReport {
                label: format!("tg {}", tg),
                mean_tps: tg_stats.mean(),
                std_dev_tps: tg_stats.std_dev(),
            },
        })
    }
}
