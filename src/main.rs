use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use dwigear::context::{GearDoc, RunContext};
use dwigear::invoke::ProcessPipeline;
use dwigear::orchestrator::Orchestrator;
use dwigear::remote::HttpRemoteStore;

/// Stage, process, and package one managed preprocessing run
#[derive(Parser)]
#[command(name = "dwigear")]
#[command(about = "Run orchestrator for managed diffusion-MRI preprocessing jobs", long_about = None)]
struct Cli {
    /// Path to the platform gear configuration document
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Platform upload directory; result archives land here
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Pipeline entry-point program
    #[arg(long, default_value = "qsiprep")]
    pipeline: PathBuf,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    // The platform must always observe a completed run with a clear status,
    // never a crash: failures are logged and reported through the run
    // report, and the process itself exits 0 on every path.
    if let Err(e) = run(cli).await {
        error!("run aborted before any work: {e:#}");
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let doc = GearDoc::from_file(&cli.config).context("loading gear config")?;

    let api_key = doc
        .inputs
        .get("api_key")
        .and_then(|input| input.key.clone())
        .context("api key credential input is missing")?;
    let store = Arc::new(HttpRemoteStore::from_key(&api_key).context("building store client")?);

    let ctx = RunContext::resolve(doc, &cli.output_dir, store.as_ref())
        .await
        .context("resolving run context")?;
    info!(
        "resolved run {}: project {}, subject {}, session {}",
        ctx.run_id, ctx.project_label, ctx.subject_label, ctx.session_label
    );

    let pipeline = Arc::new(ProcessPipeline::new(cli.pipeline));
    let report = Orchestrator::new(store, pipeline).execute(&ctx).await;
    info!("{}", report.summary());
    Ok(())
}
