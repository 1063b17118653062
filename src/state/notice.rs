//! User-facing failure notices and the hub that fans them out.

use tokio::sync::broadcast;

/// How a failure should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Modal alert for critical actions (login, register, catalog writes, uploads).
    Blocking,
    /// Inline text next to the affected area (e.g. comment list failed to load).
    Inline,
}

/// User-visible failure message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// How the notice is shown.
    pub severity: Severity,
    /// Text shown to the user.
    pub message: String,
}

impl Notice {
    /// Notice shown as a modal alert.
    pub fn blocking(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Blocking,
            message: message.into(),
        }
    }

    /// Notice shown next to the affected area.
    pub fn inline(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Inline,
            message: message.into(),
        }
    }
}

/// Broadcast hub fanning notices out to every attached view.
pub struct NoticeHub {
    sender: broadcast::Sender<Notice>,
}

impl NoticeHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// Send a notice to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, notice: Notice) {
        let _ = self.sender.send(notice);
    }
}
