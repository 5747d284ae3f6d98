//! Fire-and-forget notifications sent after a report commits.

use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    Committed {
        submission_id: String,
        evidence_url: Option<String>,
    },
}

impl SubmissionEvent {
    /// Event name as pushed to IPC clients.
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionEvent::Committed { .. } => "report.committed",
        }
    }

    /// The event's fields without the enum tag.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            SubmissionEvent::Committed {
                submission_id,
                evidence_url,
            } => {
                let mut payload = serde_json::json!({ "submissionId": submission_id });
                if let Some(url) = evidence_url {
                    payload["evidenceUrl"] = serde_json::Value::String(url.clone());
                }
                payload
            }
        }
    }
}

/// Must not block and cannot fail the submission.
pub trait SubmissionNotifier: Send + Sync {
    fn notify(&self, event: SubmissionEvent);
}

pub struct NoopNotifier;

impl SubmissionNotifier for NoopNotifier {
    fn notify(&self, _event: SubmissionEvent) {}
}

/// Fans events out over a tokio broadcast channel. Events sent with no
/// subscriber are dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SubmissionEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionEvent> {
        self.tx.subscribe()
    }
}

impl SubmissionNotifier for BroadcastNotifier {
    fn notify(&self, event: SubmissionEvent) {
        if self.tx.send(event).is_err() {
            trace!("no subscribers for submission event");
        }
    }
}
