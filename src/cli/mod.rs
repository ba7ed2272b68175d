//! Shared CLI utilities for the cadenza binary tools.

use std::io::Read;
use std::path::Path;

/// Initialize tracing/logging to stderr.
///
/// If `disable` is true, no output is produced.
/// Otherwise respects `RUST_LOG` env var, defaulting to WARN.
pub fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read the prompt text from one of: prompt string, file path, or stdin.
///
/// Returns an error message string if no input source is provided.
pub fn read_input(
    prompt: Option<&str>,
    file: Option<&Path>,
    use_stdin: bool,
) -> Result<String, String> {
    if let Some(text) = prompt {
        return Ok(text.to_string());
    }

    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e));
    }

    if use_stdin {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        return Ok(buf);
    }

    Err("No input provided. Use --prompt, --file, or --stdin".to_string())
}

/// Build a sampler from the common `--temperature/--top-k/--top-p/--seed`
/// flags. Temperature 0 (the default) gives deterministic greedy decoding.
pub fn resolve_sampler(
    temperature: f32,
    top_k: usize,
    top_p: f32,
    seed: u64,
) -> Box<dyn crate::sampler::Sampler> {
    use crate::sampler::{GreedySampler, SamplingConfig, StochasticSampler};

    if temperature <= 0.0 && top_k == 0 && top_p >= 1.0 {
        return Box::new(GreedySampler);
    }
    Box::new(StochasticSampler::new(SamplingConfig {
        temperature,
        top_k,
        top_p,
        seed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_input_from_prompt() {
        let result = read_input(Some("hello world"), None, false);
        assert_eq!(result.unwrap(), "hello world");
    }

    #[test]
    fn test_read_input_from_prompt_empty() {
        let result = read_input(Some(""), None, false);
        assert_eq!(result.unwrap(), "");
    }

    #[test]
    fn test_read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("prompt.txt");
        std::fs::write(&file_path, "file content here").unwrap();

        let result = read_input(None, Some(&file_path), false);
        assert_eq!(result.unwrap(), "file content here");
    }

    #[test]
    fn test_read_input_from_file_not_found() {
        let result = read_input(None, Some(Path::new("/nonexistent/file.txt")), false);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Failed to read file"));
    }

    #[test]
    fn test_read_input_no_source() {
        let result = read_input(None, None, false);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("No input provided"));
    }

    #[test]
    fn test_read_input_prompt_takes_priority_over_file() {
        // clap prevents passing both, but read_input checks prompt first
        let result = read_input(Some("from prompt"), Some(Path::new("/nonexistent")), false);
        assert_eq!(result.unwrap(), "from prompt");
    }

    #[test]
    fn test_read_input_from_file_with_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("unicode.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all("你好世界 🌍".as_bytes()).unwrap();

        let result = read_input(None, Some(&file_path), false);
        assert_eq!(result.unwrap(), "你好世界 🌍");
    }

    #[test]
    fn test_init_logging_disabled_does_not_panic() {
        init_logging(true);
    }

    #[test]
    fn test_resolve_sampler_default_flags_are_greedy() {
        use crate::sampler::Sampler as _;
        use crate::token::TokenCandidate;

        let mut sampler = resolve_sampler(0.0, 0, 1.0, 42);
        let cands: Vec<TokenCandidate> = [0.1f32, 0.9, 0.5]
            .iter()
            .enumerate()
            .map(|(i, &score)| TokenCandidate {
                id: i as i32,
                score,
            })
            .collect();
        assert_eq!(sampler.sample(&cands), 1);
    }
}
