use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use attribution::{to_dot, AttributionConfig, AttributionStore, TokenAttribution, Vertex};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Builds a token dependency tree from stored attention attributions", long_about = None)]
struct Args {
    #[arg(value_name = "STORE", help = "Attribution store written by IntegratedGradients::collect")]
    store: PathBuf,

    #[arg(short, long, value_name = "PATH", help = "TOML or JSON attribution config")]
    config: Option<PathBuf>,

    #[arg(long, help = "Edge threshold, overrides the config value")]
    tau: Option<f32>,

    #[arg(short, long, value_name = "PATH", help = "Write the DOT graph here instead of stdout")]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 10, help = "Number of top tokens to report")]
    top: usize,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => AttributionConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AttributionConfig::default(),
    };
    if let Some(tau) = args.tau {
        config.tau = tau;
    }
    config.validate()?;

    let store = AttributionStore::open(&args.store)
        .with_context(|| format!("failed to open attribution store {}", args.store.display()))?;
    let records = store.len()?;

    let pb = ProgressBar::new(records as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_message("records");
    let mut builder = TokenAttribution::new(config.tau);
    for index in 0..records {
        let record = store
            .record(index)
            .with_context(|| format!("failed to read record {index}"))?;
        builder.add_record(&record)?;
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let graph = builder.finish()?;
    graph.check_tree().context("attribution graph is not a tree")?;

    let dot = to_dot(&graph);
    match &args.output {
        Some(path) => fs::write(path, &dot)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{dot}"),
    }

    log::info!(
        "root token: {} ({} vertices, {} edges)",
        graph.label(Vertex::Token(graph.root)),
        graph.vertices.len(),
        graph.edges.len()
    );
    for (rank, (id, total)) in graph.ranked_tokens().into_iter().take(args.top).enumerate() {
        log::info!("{:>3}. {} {:.6}", rank + 1, graph.label(Vertex::Token(id)), total);
    }
    Ok(())
}
