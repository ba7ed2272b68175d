//! cadenza-bench: time the decode path and print the throughput table.

use std::process;

use clap::Parser;

use cadenza::cli;
use cadenza::engine::echo::EchoBackend;
use cadenza::{BackendHandle, BenchParams, ContextParams, ModelParams, Session};

#[derive(Parser)]
#[command(name = "cadenza-bench", about = "Benchmark prompt-processing and text-generation throughput")]
struct Args {
    /// Synthetic prompt length (tokens)
    #[arg(long, default_value_t = 512)]
    pp: usize,

    /// Generation steps per repetition
    #[arg(long, default_value_t = 128)]
    tg: usize,

    /// Parallel sequences per generation step
    #[arg(long, default_value_t = 1)]
    pl: usize,

    /// Repetitions to average over
    #[arg(long, default_value_t = 3)]
    reps: usize,

    /// Engine context width (cache slots)
    #[arg(long, default_value_t = 2048)]
    context_width: usize,

    /// Output format: table or json
    #[arg(long, default_value = "table", value_parser = validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_output_format(s: &str) -> Result<String, String> {
    match s {
        "table" | "json" => Ok(s.to_string()),
        _ => Err(format!("Unknown output format '{}'. Options: table, json", s)),
    }
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let backend = BackendHandle::new(Box::new(EchoBackend::new()));
    let model = backend.load_model(std::path::Path::new("builtin"), &ModelParams::default())?;
    let ctx_params = ContextParams {
        context_width: args.context_width,
        batch_capacity: args.pp.max(args.pl).max(512),
        ..Default::default()
    };
    let mut session = Session::new(model, &ctx_params, 1)?;

    let params = BenchParams {
        prompt_tokens: args.pp,
        gen_tokens: args.tg,
        parallel: args.pl,
        reps: args.reps,
    };
    let report = session.bench(&params)?;

    match args.output_format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", report.markdown()),
    }

    Ok(())
}
