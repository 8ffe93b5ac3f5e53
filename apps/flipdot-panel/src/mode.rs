use async_trait::async_trait;
use flipdot_proto::{ControlCommand, Mode, StatusSnapshot};
use metrics::counter;
use tracing::{debug, info, warn};

/// Supplies the shared secret for a mode change, out of band.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `None` (or an empty string) means the operator declined.
    async fn credential(&self, target: Mode) -> Option<String>;
}

/// Fixed answer, for tests and non-interactive use.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Some(secret.into()))
    }

    pub fn declined() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn credential(&self, _target: Mode) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Send(ControlCommand),
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Snapshot accepted; `mode` is what it reported, if anything.
    Applied { mode: Option<Mode> },
    /// The device refused the pending request, which is now cleared.
    Rejected { error: String, requested: Mode },
}

/// Tracks the device mode. The confirmed mode only ever changes from a
/// snapshot; requests are recorded separately until a snapshot settles them.
#[derive(Debug)]
pub struct ModeController {
    confirmed: Mode,
    requested: Option<Mode>,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            confirmed: Mode::PatternCycle,
            requested: None,
        }
    }

    pub fn confirmed(&self) -> Mode {
        self.confirmed
    }

    pub fn requested(&self) -> Option<Mode> {
        self.requested
    }

    /// Turns an operator request plus the credential answer into the command
    /// to send. The caller is responsible for checking the link is open.
    pub fn transition(&mut self, target: Mode, credential: Option<String>) -> Transition {
        match credential.filter(|secret| !secret.is_empty()) {
            Some(credential) => {
                self.requested = Some(target);
                info!(
                    target = "flipdot.mode",
                    requested = %target,
                    confirmed = %self.confirmed,
                    "mode change requested"
                );
                Transition::Send(ControlCommand::SetMode {
                    mode: target,
                    credential,
                })
            }
            None => {
                self.requested = None;
                info!(target = "flipdot.mode", requested = %target, "credential declined");
                Transition::Declined
            }
        }
    }

    pub fn reconcile(&mut self, snapshot: &StatusSnapshot) -> Reconciliation {
        let reported = match snapshot.mode() {
            Ok(mode) => mode,
            Err(err) => {
                warn!(target = "flipdot.mode", error = %err, "ignoring reported mode");
                None
            }
        };

        if let Some(mode) = reported {
            if mode != self.confirmed {
                info!(
                    target = "flipdot.mode",
                    from = %self.confirmed,
                    to = %mode,
                    "mode confirmed"
                );
            }
            self.confirmed = mode;
            if self.requested == Some(mode) {
                self.requested = None;
            }
        }

        if let Some(error) = snapshot.error() {
            // devices repeat their last error in every state reply
            let Some(requested) = self.requested.take() else {
                debug!(target = "flipdot.mode", error, "device error with no request pending");
                return Reconciliation::Applied { mode: reported };
            };
            counter!("flipdot_mode_rejections_total", 1);
            warn!(
                target = "flipdot.mode",
                error,
                requested = %requested,
                confirmed = %self.confirmed,
                "mode change rejected"
            );
            return Reconciliation::Rejected {
                error: error.to_string(),
                requested,
            };
        }

        debug!(target = "flipdot.mode", mode = ?reported, "snapshot reconciled");
        Reconciliation::Applied { mode: reported }
    }

    /// Inbound pictures are ignored while the device cycles its own patterns.
    pub fn suppresses_pictures(&self) -> bool {
        self.confirmed == Mode::PatternCycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(json: &str) -> StatusSnapshot {
        StatusSnapshot::parse(json).unwrap()
    }

    #[test]
    fn starts_in_pattern_cycle() {
        let controller = ModeController::new();
        assert_eq!(controller.confirmed(), Mode::PatternCycle);
        assert_eq!(controller.requested(), None);
        assert!(controller.suppresses_pictures());
    }

    #[test]
    fn request_does_not_touch_confirmed_mode() {
        let mut controller = ModeController::new();
        let transition = controller.transition(Mode::Individual, Some("hunter2".into()));
        assert_eq!(
            transition,
            Transition::Send(ControlCommand::SetMode {
                mode: Mode::Individual,
                credential: "hunter2".into()
            })
        );
        assert_eq!(controller.confirmed(), Mode::PatternCycle);
        assert_eq!(controller.requested(), Some(Mode::Individual));

        assert_eq!(
            controller.reconcile(&snapshot(r#"{"mode":0}"#)),
            Reconciliation::Applied {
                mode: Some(Mode::Individual)
            }
        );
        assert_eq!(controller.confirmed(), Mode::Individual);
        assert_eq!(controller.requested(), None);
        assert!(!controller.suppresses_pictures());
    }

    #[test]
    fn missing_or_empty_credential_declines() {
        let mut controller = ModeController::new();
        assert_eq!(controller.transition(Mode::Chaos, None), Transition::Declined);
        assert_eq!(
            controller.transition(Mode::Chaos, Some(String::new())),
            Transition::Declined
        );
        assert_eq!(controller.requested(), None);
    }

    #[test]
    fn rejection_follows_the_device_not_the_request() {
        let mut controller = ModeController::new();
        controller.transition(Mode::Chaos, Some("wrong".into()));

        let outcome = controller.reconcile(&snapshot(r#"{"mode":1,"error":"bad password"}"#));
        assert_eq!(
            outcome,
            Reconciliation::Rejected {
                error: "bad password".into(),
                requested: Mode::Chaos
            }
        );
        assert_eq!(controller.requested(), None);
        assert_eq!(controller.confirmed(), Mode::PatternCycle);

        controller.reconcile(&snapshot(r#"{"mode":0}"#));
        assert_eq!(controller.confirmed(), Mode::Individual);
    }

    #[test]
    fn stale_errors_without_a_request_are_not_rejections() {
        let mut controller = ModeController::new();
        for _ in 0..2 {
            assert_eq!(
                controller.reconcile(&snapshot(r#"{"mode":0,"error":"bad password"}"#)),
                Reconciliation::Applied {
                    mode: Some(Mode::Individual)
                }
            );
        }
        assert_eq!(controller.confirmed(), Mode::Individual);
        assert_eq!(controller.requested(), None);
    }

    #[test]
    fn invalid_mode_is_ignored() {
        let mut controller = ModeController::new();
        assert_eq!(
            controller.reconcile(&snapshot(r#"{"mode":9,"backlight":1}"#)),
            Reconciliation::Applied { mode: None }
        );
        assert_eq!(controller.confirmed(), Mode::PatternCycle);
    }

    #[test]
    fn chaos_does_not_suppress() {
        let mut controller = ModeController::new();
        controller.reconcile(&snapshot(r#"{"mode":2}"#));
        assert!(!controller.suppresses_pictures());
    }

    #[tokio::test]
    async fn static_credentials() {
        assert_eq!(
            StaticCredential::new("s3cret").credential(Mode::Chaos).await,
            Some("s3cret".to_string())
        );
        assert_eq!(StaticCredential::declined().credential(Mode::Chaos).await, None);
    }
}
