use std::path::PathBuf;

use async_trait::async_trait;
use clap::Parser;
use flipdot_proto::{Flag, Mode};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Overrides;
use crate::connection::ConnectionState;
use crate::mode::CredentialSource;
use crate::panel::{GridSource, OperatorCommand, PanelEvent};
use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "flipdot-panel")]
#[command(about = "Operator panel for a flipdot display controller")]
pub struct Cli {
    /// Device address (e.g., 192.168.4.1 or ws://flipdot.local/ws)
    #[arg(long)]
    pub url: Option<String>,

    /// Delay before reconnecting after the link drops, in milliseconds
    #[arg(long)]
    pub retry_ms: Option<u64>,

    /// Pattern server base url used by `save`
    #[arg(long)]
    pub pattern_url: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info, env = "FLIPDOT_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "FLIPDOT_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            device: self.url.clone(),
            retry_ms: self.retry_ms,
            pattern_url: self.pattern_url.clone(),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}

pub const HELP: &str = "\
commands:
  pixel <x> <y> on|off    set one pixel
  toggle <x> <y>          flip one pixel
  fill on|off             light or clear every pixel
  text <words>            draw text into the grid
  send                    send the grid to the device
  flag <name> on|off      backlight, invert, active or quick
  mode <name>             individual, cycle or chaos (asks for the password)
  state                   ask the device for its state
  show                    print the grid
  save <name>             store the grid on the pattern server
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Command(OperatorCommand),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} (type `help` for commands)")]
pub struct ReplError(String);

/// Parses one prompt line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ReplInput>, ReplError> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let input = match (verb, args.as_slice()) {
        ("pixel", [x, y, state]) => ReplInput::Command(OperatorCommand::SetPixel {
            x: coordinate(x)?,
            y: coordinate(y)?,
            on: switch(state)?,
        }),
        ("toggle", [x, y]) => ReplInput::Command(OperatorCommand::TogglePixel {
            x: coordinate(x)?,
            y: coordinate(y)?,
        }),
        ("fill", [state]) => ReplInput::Command(OperatorCommand::Fill { on: switch(state)? }),
        ("text", [_, ..]) => {
            let text = line[verb.len()..].trim().to_string();
            ReplInput::Command(OperatorCommand::Text(text))
        }
        ("send", []) => ReplInput::Command(OperatorCommand::SendPicture),
        ("flag", [name, state]) => {
            let flag = name
                .parse::<Flag>()
                .map_err(|err| ReplError(err.to_string()))?;
            ReplInput::Command(OperatorCommand::SetFlag {
                flag,
                on: switch(state)?,
            })
        }
        ("mode", [name]) => {
            let mode = name
                .parse::<Mode>()
                .map_err(|err| ReplError(err.to_string()))?;
            ReplInput::Command(OperatorCommand::RequestMode(mode))
        }
        ("state", []) => ReplInput::Command(OperatorCommand::RequestState),
        ("show", []) => ReplInput::Command(OperatorCommand::Show),
        ("save", [name]) => ReplInput::Command(OperatorCommand::Save {
            name: name.to_string(),
        }),
        ("help" | "?", []) => ReplInput::Help,
        ("quit" | "exit", []) => ReplInput::Quit,
        _ => return Err(ReplError(format!("cannot parse {line:?}"))),
    };
    Ok(Some(input))
}

fn coordinate(raw: &str) -> Result<usize, ReplError> {
    raw.parse()
        .map_err(|_| ReplError(format!("{raw:?} is not a coordinate")))
}

fn switch(raw: &str) -> Result<bool, ReplError> {
    match raw {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(ReplError(format!("expected on or off, got {other:?}"))),
    }
}

/// A pending password prompt, answered by the REPL task.
#[derive(Debug)]
pub struct CredentialRequest {
    pub target: Mode,
    pub reply: oneshot::Sender<Option<String>>,
}

/// Asks the REPL for the mode password. The REPL owns stdin, so the prompt
/// has to go through it rather than read the terminal directly.
#[derive(Debug, Clone)]
pub struct ReplCredentials {
    requests: mpsc::Sender<CredentialRequest>,
}

pub fn credential_channel() -> (ReplCredentials, mpsc::Receiver<CredentialRequest>) {
    let (requests, rx) = mpsc::channel(1);
    (ReplCredentials { requests }, rx)
}

#[async_trait]
impl CredentialSource for ReplCredentials {
    async fn credential(&self, target: Mode) -> Option<String> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(CredentialRequest { target, reply })
            .await
            .ok()?;
        answer.await.ok().flatten()
    }
}

/// Reads operator lines until `quit` or end of input.
///
/// `mode <name>` reads the password from the very next line before the
/// command goes out, and that answer is held for the credential request it
/// triggers. Any other credential request takes the next line as its answer.
/// An empty answer declines.
pub async fn run_repl<R>(
    input: R,
    commands: mpsc::Sender<OperatorCommand>,
    mut credentials: mpsc::Receiver<CredentialRequest>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut pending: Option<CredentialRequest> = None;
    let mut prepared: Option<(Mode, Option<String>)> = None;
    let mut prompts_open = true;

    println!("{HELP}");
    loop {
        tokio::select! {
            biased;
            request = credentials.recv(), if prompts_open && pending.is_none() => match request {
                Some(request) => match prepared.take() {
                    Some((target, answer)) if target == request.target => {
                        let _ = request.reply.send(answer);
                    }
                    _ => {
                        println!("{}", password_prompt(request.target));
                        pending = Some(request);
                    }
                },
                None => prompts_open = false,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if let Some(request) = pending.take() {
                    let _ = request.reply.send(secret(&line));
                    continue;
                }
                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(ReplInput::Help)) => println!("{HELP}"),
                    Ok(Some(ReplInput::Quit)) => break,
                    Ok(Some(ReplInput::Command(OperatorCommand::RequestMode(target)))) => {
                        println!("{}", password_prompt(target));
                        let Some(line) = lines.next_line().await? else {
                            break;
                        };
                        prepared = Some((target, secret(&line)));
                        if commands.send(OperatorCommand::RequestMode(target)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(ReplInput::Command(command))) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
        }
    }
    Ok(())
}

fn password_prompt(target: Mode) -> String {
    format!("password for {target} mode (empty to cancel):")
}

fn secret(line: &str) -> Option<String> {
    let secret = line.trim();
    (!secret.is_empty()).then(|| secret.to_string())
}

/// One line for the operator, or `None` for events that need no output.
pub fn describe(event: &PanelEvent) -> Option<String> {
    let text = match event {
        PanelEvent::ConnectionChanged(ConnectionState::Connecting) => "connecting...".to_string(),
        PanelEvent::ConnectionChanged(ConnectionState::Open) => "link open".to_string(),
        PanelEvent::ConnectionChanged(ConnectionState::Closed { .. }) => {
            "link down, retrying".to_string()
        }
        PanelEvent::SnapshotApplied { mode, flags } => format!(
            "mode={mode} backlight={} invert={} active={} quick={}",
            on_off(flags.backlight),
            on_off(flags.invert),
            on_off(flags.active),
            on_off(flags.quick)
        ),
        PanelEvent::GridChanged {
            source: GridSource::Device,
        } => "grid updated from device".to_string(),
        PanelEvent::GridChanged {
            source: GridSource::Operator,
        } => return None,
        PanelEvent::PictureSuppressed => {
            "device picture ignored while the device cycles patterns".to_string()
        }
        PanelEvent::ModeRejected { error, requested } => {
            format!("switch to {requested} rejected: {error}")
        }
        PanelEvent::CredentialDeclined { target } => format!("switch to {target} cancelled"),
        PanelEvent::Notice(message) => message.clone(),
        PanelEvent::MessageDropped { what } => format!("{what} not sent, link is down"),
        PanelEvent::SaveCompleted { name } => format!("saved {name}"),
        PanelEvent::SaveFailed {
            name,
            error,
            fallback_offered,
        } => {
            let mut text = format!("saving {name} failed: {error}");
            if *fallback_offered {
                text.push_str("; use `show` and keep the pattern locally instead");
            }
            text
        }
        PanelEvent::Preview(preview) => preview.trim_end().to_string(),
    };
    Some(text)
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// Prints panel events until the panel goes away.
pub async fn print_events(mut events: broadcast::Receiver<PanelEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_line("pixel 3 4 on").unwrap(),
            Some(ReplInput::Command(OperatorCommand::SetPixel {
                x: 3,
                y: 4,
                on: true
            }))
        );
        assert_eq!(
            parse_line("  text  Hello world ").unwrap(),
            Some(ReplInput::Command(OperatorCommand::Text(
                "Hello world".into()
            )))
        );
        assert_eq!(
            parse_line("flag quick off").unwrap(),
            Some(ReplInput::Command(OperatorCommand::SetFlag {
                flag: Flag::Quick,
                on: false
            }))
        );
        assert_eq!(
            parse_line("mode cycle").unwrap(),
            Some(ReplInput::Command(OperatorCommand::RequestMode(
                Mode::PatternCycle
            )))
        );
        assert_eq!(parse_line("quit").unwrap(), Some(ReplInput::Quit));
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(parse_line("pixel a 4 on").is_err());
        assert!(parse_line("fill maybe").is_err());
        assert!(parse_line("mode party").is_err());
        assert!(parse_line("text").is_err());
        assert!(parse_line("dance").is_err());
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from([
            "flipdot-panel",
            "--url",
            "localhost:81",
            "--retry-ms",
            "500",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.device.as_deref(), Some("localhost:81"));
        assert_eq!(overrides.retry_ms, Some(500));
        assert_eq!(overrides.pattern_url, None);
    }

    #[test]
    fn failed_save_mentions_fallback() {
        let line = describe(&PanelEvent::SaveFailed {
            name: "x".into(),
            error: "boom".into(),
            fallback_offered: true,
        })
        .unwrap();
        assert!(line.contains("boom"));
        assert!(line.contains("locally"));
        assert_eq!(
            describe(&PanelEvent::GridChanged {
                source: GridSource::Operator
            }),
            None
        );
    }

    #[tokio::test]
    async fn repl_forwards_commands_until_quit() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_credentials, requests) = credential_channel();
        let input = BufReader::new(&b"fill on\nbogus\nsend\nquit\nshow\n"[..]);
        run_repl(input, tx, requests).await.unwrap();

        assert_eq!(rx.recv().await, Some(OperatorCommand::Fill { on: true }));
        assert_eq!(rx.recv().await, Some(OperatorCommand::SendPicture));
        assert_eq!(rx.recv().await, None);
    }

    async fn answer_with(input: &'static [u8]) -> (Option<String>, Vec<OperatorCommand>) {
        let (tx, mut rx) = mpsc::channel(8);
        let (requests_tx, requests) = mpsc::channel(1);
        let (reply, answer) = oneshot::channel();
        requests_tx
            .send(CredentialRequest {
                target: Mode::Individual,
                reply,
            })
            .await
            .unwrap();

        run_repl(BufReader::new(input), tx, requests).await.unwrap();
        let mut sent = Vec::new();
        while let Some(command) = rx.recv().await {
            sent.push(command);
        }
        (answer.await.unwrap(), sent)
    }

    #[tokio::test]
    async fn next_line_answers_a_credential_request() {
        let (answer, sent) = answer_with(b"hunter2\nstate\n").await;
        assert_eq!(answer, Some("hunter2".to_string()));
        assert_eq!(sent, vec![OperatorCommand::RequestState]);
    }

    #[tokio::test]
    async fn empty_line_declines() {
        let (answer, sent) = answer_with(b"\nstate\n").await;
        assert_eq!(answer, None);
        assert_eq!(sent, vec![OperatorCommand::RequestState]);
    }

    #[tokio::test]
    async fn mode_password_is_read_before_later_commands() {
        let (tx, mut rx) = mpsc::channel(8);
        let (credentials, requests) = credential_channel();
        let (mut operator, input) = tokio::io::duplex(256);
        operator
            .write_all(b"mode individual\nhunter2\nstate\n")
            .await
            .unwrap();
        let repl = tokio::spawn(run_repl(BufReader::new(input), tx, requests));

        assert_eq!(
            rx.recv().await,
            Some(OperatorCommand::RequestMode(Mode::Individual))
        );
        assert_eq!(
            credentials.credential(Mode::Individual).await,
            Some("hunter2".to_string())
        );
        assert_eq!(rx.recv().await, Some(OperatorCommand::RequestState));

        drop(operator);
        repl.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn repl_credentials_round_trip() {
        let (credentials, mut requests) = credential_channel();
        let asking = tokio::spawn(async move { credentials.credential(Mode::Chaos).await });
        let request = requests.recv().await.unwrap();
        assert_eq!(request.target, Mode::Chaos);
        request.reply.send(Some("pw".into())).unwrap();
        assert_eq!(asking.await.unwrap(), Some("pw".to_string()));

        let (credentials, requests) = credential_channel();
        drop(requests);
        assert_eq!(credentials.credential(Mode::Chaos).await, None);
    }
}
