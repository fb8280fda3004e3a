use anyhow::{Context, Result};

use rate_spillover::artifact::ModelArtifact;
use rate_spillover::config::Config;
use rate_spillover::logging;
use rate_spillover::serve::{serve, ModelSlot};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set SPILLOVER_CONFIG or provide config/default.toml");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging)?;

    let path = &config.serve.artifact_path;
    let artifact = ModelArtifact::read_from(path)
        .with_context(|| format!("failed to load model artifact {}", path.display()))?;
    tracing::info!(
        version = %artifact.version,
        created_at = %artifact.created_at,
        rmse = artifact.report.rmse,
        dm_p_value = artifact.report.dm_p_value,
        "Starting spillover-serve"
    );

    serve(&config.serve.bind, ModelSlot::new(artifact)).await
}
