use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use flipdot_panel::cli::{self, Cli};
use flipdot_panel::config::Config;
use flipdot_panel::panel::Panel;
use flipdot_panel::persistence::{DisabledPatternStore, HttpPatternStore, PatternStore};
use flipdot_panel::runtime::Runtime;
use flipdot_panel::telemetry;
use flipdot_panel::transport::WebSocketConnector;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;

const COMMAND_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_config())?;

    let config = Config::from_env()?.apply(cli.overrides());
    let url = config.ws_url()?;
    let patterns: Arc<dyn PatternStore> = match config.pattern_url()? {
        Some(base) => Arc::new(HttpPatternStore::new(base)),
        None => Arc::new(DisabledPatternStore),
    };

    let (credentials, credential_requests) = cli::credential_channel();
    let panel = Panel::new(config.retry_delay)
        .with_credentials(Arc::new(credentials))
        .with_pattern_store(patterns);
    let printer = tokio::spawn(cli::print_events(panel.subscribe()));

    info!(
        url = %url,
        retry_ms = config.retry_delay.as_millis() as u64,
        "starting flipdot panel"
    );
    let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let runtime = tokio::spawn(Runtime::new(panel, WebSocketConnector::new(url), commands_rx).run());

    cli::run_repl(BufReader::new(tokio::io::stdin()), commands, credential_requests).await?;
    runtime.await?;
    printer.abort();
    Ok(())
}
