//! Run one batch file through the probe pipeline and print the final snapshot.
//!
//! ```text
//! batchd <batch.json> [config.json]
//! ```
//!
//! Logging is configured with `VIDRA_LOG` and `VIDRA_LOG_FORMAT`.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::{info, warn};

use vidra_batch::{BatchOrchestrator, MemoryRepository, OrchestratorConfig};
use vidra_core::{Supervisor, SupervisorConfig};
use vidra_exec::CommandProbe;
use vidra_model::BatchRequest;
use vidra_observe::{LoggerConfig, logger_init};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DemoConfig {
    supervisor: SupervisorConfig,
    orchestrator: OrchestratorConfig,
    probe: ProbeSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProbeSettings {
    program: Option<String>,
    base_args: Option<Vec<String>>,
    default_timeout_ms: Option<u64>,
}

impl ProbeSettings {
    fn build(self) -> CommandProbe {
        let mut probe = CommandProbe::default();
        if let Some(program) = self.program {
            probe.program = program;
        }
        if let Some(args) = self.base_args {
            probe = probe.with_base_args(args);
        }
        if let Some(ms) = self.default_timeout_ms {
            probe = probe.with_default_timeout(Duration::from_millis(ms));
        }
        probe
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let log_cfg = LoggerConfig::from_env("VIDRA")?;
    logger_init(&log_cfg)?;

    // 2) Inputs
    let mut args = std::env::args().skip(1);
    let Some(batch_path) = args.next() else {
        bail!("usage: batchd <batch.json> [config.json]");
    };
    let cfg: DemoConfig = match args.next() {
        Some(path) => read_json(Path::new(&path)).await?,
        None => DemoConfig::default(),
    };
    let request: BatchRequest = read_json(Path::new(&batch_path)).await?;
    info!(files = request.files.len(), "batch loaded");

    // 3) Supervisor + orchestrator
    let supervisor = Supervisor::new(cfg.supervisor)?;
    let orchestrator = BatchOrchestrator::new(
        supervisor.clone(),
        Arc::new(cfg.probe.build()),
        Arc::new(MemoryRepository::new()),
        cfg.orchestrator,
    );

    // 4) Run until done or Ctrl+C
    let batch = orchestrator.submit(request)?;
    info!(batch = %batch, "press Ctrl+C to cancel");

    let snapshot = tokio::select! {
        snap = orchestrator.wait(&batch) => snap?,
        _ = tokio::signal::ctrl_c() => {
            warn!(batch = %batch, "interrupted; cancelling batch");
            orchestrator.cancel(&batch)?;
            orchestrator.wait(&batch).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    // 5) Shutdown
    if let Err(report) = supervisor.health_check() {
        warn!(%report, "unhealthy tasks at shutdown");
    }
    supervisor.shutdown().await?;
    info!(status = %snapshot.summary.status, "done");
    Ok(())
}
