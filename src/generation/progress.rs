use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Submitted,
    Polling { attempt: u32 },
    /// Not a state change; tells the host the call is still alive.
    KeepAlive,
    Completed,
    Failed { reason: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Completed | ProgressEvent::Failed { .. })
    }

    /// One-line JSON form used in logs, e.g. `{"type":"polling","attempt":2}`.
    pub fn to_log_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Forwards lifecycle events to the host, dropping anything that would break
/// the ordering: one `Submitted`, increasing poll attempts, one terminal event.
#[derive(Debug)]
pub struct ProgressReporter {
    sink: Option<UnboundedSender<ProgressEvent>>,
    submitted: bool,
    last_attempt: u32,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(sink: UnboundedSender<ProgressEvent>) -> Self {
        ProgressReporter {
            sink: Some(sink),
            submitted: false,
            last_attempt: 0,
            finished: false,
        }
    }

    /// A reporter with no host attached.
    #[cfg(test)]
    pub fn detached() -> Self {
        ProgressReporter {
            sink: None,
            submitted: false,
            last_attempt: 0,
            finished: false,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        debug!(target: "imagegen.progress", event = %event.to_log_json());
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    pub fn submitted(&mut self) {
        if self.finished || self.submitted {
            return;
        }
        self.submitted = true;
        self.emit(ProgressEvent::Submitted);
    }

    pub fn polling(&mut self, attempt: u32) {
        if self.finished || attempt <= self.last_attempt {
            return;
        }
        self.last_attempt = attempt;
        self.emit(ProgressEvent::Polling { attempt });
    }

    pub fn keep_alive(&self) {
        if self.finished {
            return;
        }
        self.emit(ProgressEvent::KeepAlive);
    }

    pub fn completed(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(ProgressEvent::Completed);
    }

    pub fn failed(&mut self, reason: impl Into<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(ProgressEvent::Failed {
            reason: reason.into(),
        });
    }

    /// Stops all further events, used once the host has withdrawn interest.
    pub fn silence(&mut self) {
        self.finished = true;
        self.sink = None;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn emits_lifecycle_in_order_without_duplicates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(tx);
        reporter.submitted();
        reporter.submitted();
        reporter.polling(1);
        reporter.polling(1);
        reporter.keep_alive();
        reporter.polling(2);
        reporter.completed();
        reporter.failed("late");
        reporter.completed();

        assert_eq!(
            drain(&mut rx),
            vec![
                ProgressEvent::Submitted,
                ProgressEvent::Polling { attempt: 1 },
                ProgressEvent::KeepAlive,
                ProgressEvent::Polling { attempt: 2 },
                ProgressEvent::Completed,
            ]
        );
    }

    #[test]
    fn silence_drops_everything_afterwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(tx);
        reporter.submitted();
        reporter.silence();
        reporter.polling(1);
        reporter.failed("cancelled");
        assert_eq!(drain(&mut rx), vec![ProgressEvent::Submitted]);
    }

    #[test]
    fn events_log_as_tagged_json() {
        assert_eq!(
            ProgressEvent::Polling { attempt: 2 }.to_log_json(),
            r#"{"type":"polling","attempt":2}"#
        );
        assert_eq!(ProgressEvent::KeepAlive.to_log_json(), r#"{"type":"keep_alive"}"#);
        assert_eq!(
            ProgressEvent::Failed {
                reason: "nsfw".to_string()
            }
            .to_log_json(),
            r#"{"type":"failed","reason":"nsfw"}"#
        );
    }

    #[test]
    fn closed_host_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut reporter = ProgressReporter::new(tx);
        reporter.submitted();
        reporter.completed();
        assert!(reporter.is_finished());
    }
}
