//! Periodic callback with explicit cancellation.
//!
//! The callback receives the ticker's [`CancellationToken`] so it can re-check
//! it after acquiring whatever lock guards its state. Whoever cancels the
//! token under that same lock gets the guarantee that no tick takes effect
//! afterwards, including one that was already waiting for the lock.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct Ticker {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Run `on_tick` every `period` on the current tokio runtime until the
    /// token is cancelled or the callback breaks. The first call happens one
    /// full period after spawning.
    pub fn spawn<F>(period: Duration, token: CancellationToken, mut on_tick: F) -> Self
    where
        F: FnMut(&CancellationToken) -> ControlFlow<()> + Send + 'static,
    {
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        if on_tick(&task_token).is_break() {
                            task_token.cancel();
                            break;
                        }
                    }
                }
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel and wait for the task to wind down.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
