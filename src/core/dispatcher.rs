use crate::core::session::DeviceSession;
use crate::core::validator::CommandValidator;
use crate::domain::model::{DispatchEntry, DispatchOutcome, DispatchReport, RejectedLine};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Minimum gap between two writes; the firmware reads one line at a time.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// Sends blocks of command text to the device, one paced line at a time.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: DeviceSession,
    validator: CommandValidator,
    pacing: Duration,
}

impl CommandDispatcher {
    pub fn new(session: DeviceSession, validator: CommandValidator) -> Self {
        Self {
            session,
            validator,
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub async fn dispatch(&self, text: &str) -> DispatchReport {
        self.run(text, None).await
    }

    /// Same as [`dispatch`](Self::dispatch), also sending each line's result
    /// on `progress` the moment it is known, in input order.
    pub async fn dispatch_with_progress(
        &self,
        text: &str,
        progress: mpsc::Sender<DispatchEntry>,
    ) -> DispatchReport {
        self.run(text, Some(progress)).await
    }

    async fn run(
        &self,
        text: &str,
        progress: Option<mpsc::Sender<DispatchEntry>>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut last_write: Option<Instant> = None;

        for raw in text.lines() {
            let command = match self.validator.parse(raw) {
                Ok(command) => command,
                Err(rejection) => {
                    if rejection.is_structural() {
                        tracing::warn!("Skipping command {:?}: {}", raw.trim(), rejection);
                        let rejected = RejectedLine {
                            line: raw.trim().to_string(),
                            reason: rejection.to_string(),
                        };
                        notify(&progress, DispatchEntry::Rejected(rejected.clone())).await;
                        report.rejected.push(rejected);
                    }
                    continue;
                }
            };

            if let Some(at) = last_write {
                tokio::time::sleep_until(at + self.pacing).await;
            }

            let line = command.to_string();
            let (outcome, halt) = match self.session.write(&command.encode()).await {
                Ok(()) => {
                    last_write = Some(Instant::now());
                    let outcome = DispatchOutcome {
                        line,
                        success: true,
                        error: None,
                    };
                    (outcome, false)
                }
                Err(e) => {
                    let halt = e.halts_batch();
                    if halt {
                        tracing::warn!("Stopping command batch: {}", e);
                    }
                    let outcome = DispatchOutcome {
                        line,
                        success: false,
                        error: Some(e.user_friendly_message()),
                    };
                    (outcome, halt)
                }
            };

            notify(&progress, DispatchEntry::Sent(outcome.clone())).await;
            report.outcomes.push(outcome);
            if halt {
                report.halted = true;
                break;
            }
        }

        tracing::debug!(
            "Dispatched {} of {} commands{}",
            report.sent_count(),
            report.outcomes.len(),
            if report.halted { " (halted)" } else { "" }
        );
        report
    }
}

async fn notify(progress: &Option<mpsc::Sender<DispatchEntry>>, entry: DispatchEntry) {
    if let Some(tx) = progress {
        if tx.send(entry).await.is_err() {
            tracing::debug!("Dispatch progress receiver dropped");
        }
    }
}
