use tokio::sync::watch;

/// Cooperative pause gate.
///
/// Code that supports pausing calls [`PauseLatch::wait_while_paused`] at the
/// points where it is safe to suspend; any other task may flip the latch.
#[derive(Debug)]
pub struct PauseLatch {
    paused: watch::Sender<bool>,
}

impl PauseLatch {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }

    /// Returns `true` if the latch was not already paused.
    pub fn pause(&self) -> bool {
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Returns `true` if the latch was paused.
    pub fn unpause(&self) -> bool {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolve once the latch is not paused.
    pub async fn wait_while_paused(&self) {
        let mut receiver = self.paused.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|paused| !*paused).await;
    }
}

impl Default for PauseLatch {
    fn default() -> Self {
        Self::new()
    }
}
