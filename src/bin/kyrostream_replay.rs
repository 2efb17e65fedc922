//! KyroStream replay tool
//!
//! Reads producer records as JSON lines, runs them through the engine and
//! prints every output (alert or match) as a JSON line on stdout. Logs go to
//! stderr and are controlled by `RUST_LOG`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kyrostream::ingress;
use kyrostream::{CallbackSink, Engine, EngineConfig, EngineOutput, OutputSink, StreamRuntime, SystemClock, Timestamp};

/// Command-line options
struct Options {
    /// TOML engine configuration
    config: Option<PathBuf>,
    /// JSON-lines input (stdin when absent)
    input: Option<PathBuf>,
    /// Shard count override
    shards: Option<usize>,
    /// Process on the calling thread, in input order
    sequential: bool,
    /// Close all windows once the input is exhausted
    final_tick: bool,
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config: None,
        input: None,
        shards: None,
        sequential: false,
        final_tick: false,
    };

    let value = |i: usize, flag: &str| -> String {
        args.get(i + 1).cloned().unwrap_or_else(|| {
            eprintln!("error: {flag} requires a value");
            std::process::exit(1);
        })
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(value(i, "--config")));
                i += 2;
            }
            "--input" | "-i" => {
                options.input = Some(PathBuf::from(value(i, "--input")));
                i += 2;
            }
            "--shards" | "-s" => {
                let raw = value(i, "--shards");
                let shards: usize = raw.parse().unwrap_or_else(|_| {
                    eprintln!("error: invalid shard count: {raw}");
                    std::process::exit(1);
                });
                options.shards = Some(shards);
                i += 2;
            }
            "--sequential" => {
                options.sequential = true;
                i += 1;
            }
            "--final-tick" => {
                options.final_tick = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("kyrostream-replay - replay JSON-lines events through KyroStream");
                println!();
                println!("USAGE:");
                println!("    kyrostream-replay [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <FILE>       Engine configuration (TOML)");
                println!("    -i, --input <FILE>        JSON-lines input [default: stdin]");
                println!("    -s, --shards <N>          Override the configured shard count");
                println!("        --sequential          Process on one thread in input order");
                println!("        --final-tick          Close all windows after the last event");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    options
}

fn print_output(output: &EngineOutput) {
    let Ok(line) = serde_json::to_string(output) else {
        return;
    };
    let mut handle = io::stdout().lock();
    if let Err(err) = writeln!(handle, "{line}") {
        warn!(error = %err, "failed to write output");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kyrostream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let options = parse_args();

    let mut config = match &options.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(shards) = options.shards {
        config.shards = shards;
    }

    let reader: Box<dyn BufRead> = match &options.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let engine = Engine::new(config, SystemClock)?;
    let sink = Arc::new(CallbackSink::new(|output| print_output(&output)));

    let mut rejected = 0u64;
    let mut skipped = 0u64;

    let engine = if options.sequential {
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match ingress::normalize_str(&line, Timestamp::now()) {
                Ok(Some(event)) => {
                    for output in engine.process(&event) {
                        sink.emit(output);
                    }
                }
                Ok(None) => skipped += 1,
                Err(err) => {
                    rejected += 1;
                    warn!(line = line_no + 1, error = %err, "rejected input record");
                }
            }
        }
        Arc::new(engine)
    } else {
        let runtime = StreamRuntime::start(engine, Arc::clone(&sink) as Arc<dyn OutputSink>)?;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match ingress::normalize_str(&line, Timestamp::now()) {
                Ok(Some(event)) => runtime.ingest(event)?,
                Ok(None) => skipped += 1,
                Err(err) => {
                    rejected += 1;
                    warn!(line = line_no + 1, error = %err, "rejected input record");
                }
            }
        }
        runtime.shutdown()?;
        Arc::clone(runtime.engine())
    };

    if options.final_tick {
        let report = engine.tick()?;
        for closed in &report.closed {
            info!(key = %closed.key, count = closed.count, "window closed");
        }
    }

    let stats = engine.stats();
    info!(
        received = stats.received,
        processed = stats.processed,
        alerts = stats.alerts,
        matches = stats.matches,
        skipped,
        rejected,
        "replay complete"
    );
    eprintln!("{}", serde_json::to_string(&stats)?);
    Ok(())
}
