use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub paused: bool,
    pub cancelled: bool,
}

/// Pause and cancel flags shared between a running batch and its controllers
///
/// Cancellation is sticky until the next run starts. Cancel also releases a paused run.
#[derive(Debug)]
pub struct RunControl {
    state: watch::Sender<ControlState>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ControlState::default());
        Self { state }
    }

    pub fn pause(&self) {
        self.state.send_modify(|s| s.paused = true);
    }

    pub fn resume(&self) {
        self.state.send_modify(|s| s.paused = false);
    }

    pub fn cancel(&self) {
        self.state.send_modify(|s| s.cancelled = true);
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.borrow().cancelled
    }

    pub fn snapshot(&self) -> ControlState {
        *self.state.borrow()
    }

    pub(crate) fn reset(&self) {
        self.state.send_replace(ControlState::default());
    }

    /// Waits while paused. Returns false if the run was cancelled.
    pub async fn wait_until_runnable(&self) -> bool {
        let mut rx = self.state.subscribe();
        // Err is unreachable while self holds the sender
        let runnable = rx
            .wait_for(|s| s.cancelled || !s.paused)
            .await
            .map(|state| !state.cancelled)
            .unwrap_or(false);
        runnable
    }

    /// Sleeps for `duration` unless cancelled first. Returns false on cancel.
    pub async fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }

        let mut rx = self.state.subscribe();
        let slept = tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = rx.wait_for(|s| s.cancelled) => false,
        };
        slept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_runnable_immediately_when_not_paused() {
        let control = RunControl::new();
        assert!(control.wait_until_runnable().await);
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let control = Arc::new(RunControl::new());
        control.pause();
        assert!(control.is_paused());

        let waiter = tokio::spawn({
            let control = control.clone();
            async move { control.wait_until_runnable().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(!control.is_paused());
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiter() {
        let control = Arc::new(RunControl::new());
        control.pause();

        let waiter = tokio::spawn({
            let control = control.clone();
            async move { control.wait_until_runnable().await }
        });
        control.cancel();

        assert!(!waiter.await.unwrap());
        assert!(control.snapshot().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let control = Arc::new(RunControl::new());
        let started = Instant::now();

        let sleeper = tokio::spawn({
            let control = control.clone();
            async move { control.sleep_unless_cancelled(Duration::from_secs(30)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.cancel();

        assert!(!sleeper.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let control = RunControl::new();
        assert!(control.sleep_unless_cancelled(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_waiter_survives_repeated_pause_and_resume() {
        let control = Arc::new(RunControl::new());
        control.pause();

        let waiter = tokio::spawn({
            let control = control.clone();
            async move { control.wait_until_runnable().await }
        });
        tokio::task::yield_now().await;
        control.pause();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(waiter.await.unwrap());
        assert!(control.wait_until_runnable().await);
    }

    #[test]
    fn test_reset_clears_flags() {
        let control = RunControl::new();
        control.pause();
        control.cancel();
        control.reset();
        assert_eq!(control.snapshot(), ControlState::default());
    }
}
