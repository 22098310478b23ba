//! Notifier test doubles, shared across crates' test suites.

use parking_lot::Mutex;

use crate::{NotificationKind, Notifier};

/// Captures every notification for assertion; never actually sends anything.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotificationKind>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn take(&self) -> Vec<NotificationKind> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, kind: NotificationKind) {
        self.sent.lock().push(kind);
    }
}
