//! cadenza-generate: drive a generation session against the built-in echo
//! engine, streaming fragments as they are emitted.

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser;

use cadenza::cli;
use cadenza::engine::echo::EchoBackend;
use cadenza::{BackendHandle, ContextParams, ModelParams, Session};

#[derive(Parser)]
#[command(name = "cadenza-generate", about = "Generate text through a session over the echo engine")]
struct Args {
    /// Prompt text
    #[arg(short = 'p', long, conflicts_with_all = ["file", "stdin"])]
    prompt: Option<String>,

    /// Read the prompt from a file
    #[arg(short = 'f', long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read the prompt from stdin
    #[arg(long)]
    stdin: bool,

    /// Maximum number of tokens to generate
    #[arg(short = 'n', long, default_value_t = 256)]
    max_tokens: usize,

    /// Engine context width (cache slots)
    #[arg(long, default_value_t = 2048)]
    context_width: usize,

    /// Sampling temperature (0 = greedy)
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Top-K cutoff (0 = disabled)
    #[arg(long, default_value_t = 0)]
    top_k: usize,

    /// Top-P nucleus cutoff (1.0 = disabled)
    #[arg(long, default_value_t = 1.0)]
    top_p: f32,

    /// RNG seed for stochastic sampling
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
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
    let input = cli::read_input(args.prompt.as_deref(), args.file.as_deref(), args.stdin)?;

    let backend = BackendHandle::new(Box::new(EchoBackend::new()));
    let model = backend.load_model(std::path::Path::new("builtin"), &ModelParams::default())?;
    let params = ContextParams {
        context_width: args.context_width,
        ..Default::default()
    };
    let sampler = cli::resolve_sampler(args.temperature, args.top_k, args.top_p, args.seed);
    let mut session = Session::new(model, &params, args.max_tokens)?.with_sampler(sampler);

    let start = Instant::now();
    session.start(&input)?;

    use std::io::Write;
    let mut stdout = std::io::stdout();
    loop {
        let out = session.step()?;
        stdout.write_all(out.text.as_bytes())?;
        stdout.flush()?;
        if out.done {
            break;
        }
    }
    println!();

    let elapsed = start.elapsed().as_secs_f64();
    eprintln!(
        "{} tokens in {:.2}s ({:.2} t/s)",
        session.produced(),
        elapsed,
        session.produced() as f64 / elapsed.max(1e-9)
    );

    Ok(())
}
