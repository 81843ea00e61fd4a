use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Holds at most one pending one-shot timer.
///
/// Arming replaces (and aborts) whatever was pending. When the delay elapses
/// the callback is spawned as its own task, so cancelling the slot from
/// inside the callback does not abort the callback itself.
///
/// Once spawned, a callback can no longer be aborted. Every arm and cancel
/// bumps the slot's generation instead; the callback is built with the
/// generation it was armed under and checks [`TimerSlot::is_current`] before
/// acting.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    pub fn arm<B, F>(&mut self, delay: Duration, build: B)
    where
        B: FnOnce(u64) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let fire = build(self.generation);
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            tokio::spawn(fire);
        }));
    }

    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// False once the slot was re-armed or cancelled after `generation` was
    /// handed out.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// True while the delay has not yet elapsed.
    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
