mod destination;

use destination::JsonlDestination;
use shared::config::{self, TidewaterConfig};
use shared::message::EmittedCheckpoint;
use std::path::Path;
use std::sync::Arc;
use tidewater_core::daemon::lifecycle::Lifecycle;
use tidewater_core::daemon::runtime::RuntimeConfig;
use tidewater_core::IngestionPipeline;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
  let env = std::env::var("TIDEWATER_ENV").unwrap_or_else(|_| "development".to_string());
  let config_dir = std::env::var("TIDEWATER_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
  let cfg = config::load_config(Path::new(&config_dir), &env)?;

  init_logging(&cfg.observability.log_level);
  info!(env = %env, "tidewater starting");

  let rt = RuntimeConfig::from_config(&cfg).build_runtime()?;
  rt.block_on(async move { run(cfg).await })
}

/// Read one JSON message per stdin line until EOF or a shutdown signal,
/// writing emitted checkpoints to stdout.
async fn run(cfg: TidewaterConfig) -> anyhow::Result<()> {
  let destination = Arc::new(JsonlDestination::new(&cfg.destination.output_dir));
  let output = |checkpoint: EmittedCheckpoint| println!("{}", checkpoint.to_json_string());

  let pipeline = IngestionPipeline::builder(destination, Arc::new(output))
    .config(cfg)
    .build()?;
  pipeline.start().await?;

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let shutdown = Lifecycle::wait_for_shutdown();
  tokio::pin!(shutdown);

  let mut accepted: u64 = 0;
  loop {
    tokio::select! {
      line = lines.next_line() => {
        let Some(line) = line? else {
          break;
        };
        if line.trim().is_empty() {
          continue;
        }
        pipeline.accept(&line, line.len() as u64).await?;
        accepted += 1;
      }
      _ = &mut shutdown => {
        warn!("shutdown requested before end of input");
        break;
      }
    }
  }

  info!(accepted, "input finished");
  pipeline.close().await?;
  debug!(metrics = %pipeline.metrics().encode(), "final metrics");
  info!("tidewater stopped");
  Ok(())
}

/// Logs go to stderr; stdout carries emitted checkpoints.
fn init_logging(default_level: &str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(true)
    .with_thread_ids(true)
    .init();
}
