use std::time::Duration;

use flipdot_proto::Mode;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info};

use crate::panel::{OperatorCommand, Panel};
use crate::transport::Connector;

/// Upper bound on a single connection attempt. A timeout counts as a close.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type CredentialAnswer = (Mode, Option<String>);

/// Event loop for one panel. Link events, operator commands and the retry
/// timer are handled strictly one at a time in arrival order. Credential
/// lookups run on their own task and come back as one more event, so a
/// prompt left open never holds up the link.
pub struct Runtime<C> {
    panel: Panel,
    connector: C,
    commands: mpsc::Receiver<OperatorCommand>,
    answers_tx: mpsc::UnboundedSender<CredentialAnswer>,
    answers: mpsc::UnboundedReceiver<CredentialAnswer>,
    connect_timeout: Duration,
}

impl<C: Connector> Runtime<C> {
    pub fn new(panel: Panel, connector: C, commands: mpsc::Receiver<OperatorCommand>) -> Self {
        let (answers_tx, answers) = mpsc::unbounded_channel();
        Self {
            panel,
            connector,
            commands,
            answers_tx,
            answers,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Runs until every command sender is gone, then hands the panel back.
    pub async fn run(mut self) -> Panel {
        loop {
            let retry_at = self.panel.retry_at();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        debug!(target = "flipdot.panel", ?command, "operator command");
                        self.dispatch(command).await;
                    }
                    None => {
                        info!(target = "flipdot.panel", "operator gone; stopping");
                        break;
                    }
                },
                Some((target, credential)) = self.answers.recv() => {
                    self.panel.finish_mode_request(target, credential);
                }
                event = self.panel.next_link_event() => {
                    let now = Instant::now();
                    match event {
                        Some(event) => self.panel.handle_link_event(event, now),
                        None => self.panel.on_link_lost("link ended", now),
                    }
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.connect().await;
                }
            }
        }
        self.panel
    }

    async fn dispatch(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::RequestMode(target) => self.ask_credential(target),
            command => self.panel.handle_command(command).await,
        }
    }

    fn ask_credential(&mut self, target: Mode) {
        let Some(credentials) = self.panel.begin_mode_request(target) else {
            return;
        };
        let answers = self.answers_tx.clone();
        tokio::spawn(async move {
            let credential = credentials.credential(target).await;
            // the runtime may have stopped while the operator was typing
            let _ = answers.send((target, credential));
        });
    }

    async fn connect(&mut self) {
        self.panel.begin_connect();
        counter!("flipdot_connect_attempts_total", 1);
        match timeout(self.connect_timeout, self.connector.connect()).await {
            Ok(Ok(link)) => self.panel.on_connected(link),
            Ok(Err(err)) => self.panel.on_link_lost(&err.to_string(), Instant::now()),
            Err(_) => self
                .panel
                .on_link_lost("connect timed out", Instant::now()),
        }
    }
}
