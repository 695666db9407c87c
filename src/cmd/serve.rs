//! Webhook server command: `merge-agent serve`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use merge_agent::config::Config;
use merge_agent::orchestrator::Services;
use merge_agent::{server, telemetry};

pub async fn cmd_serve(config_path: Option<&Path>, port: Option<u16>) -> Result<()> {
    let config = Config::load(config_path)?.with_port(port);
    telemetry::init(config.logging.format);

    // Includes problems met during loading, which ran before logging existed.
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    tracing::info!(
        gitlab = %config.gitlab.url,
        workspace_root = %config.workspace.root.display(),
        default_provider = %config.agent.default_provider,
        "configuration loaded"
    );

    let bind_addr = config.server.bind_addr.clone();
    let services = Services::from_config(config, CancellationToken::new())?;
    tracing::info!(providers = ?services.agents.providers(), "agents registered");

    server::serve(Arc::new(services), &bind_addr).await
}
