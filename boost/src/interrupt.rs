use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Clonable, latching cancellation signal. Once triggered it stays
/// triggered, so tasks that start waiting late still observe it.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Debug, Default)]
struct InterruptInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolves when the interrupt fires; immediately if it already has.
    pub async fn wait(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        notified.as_mut().enable();

        if self.is_triggered() {
            return;
        }

        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let interrupt = Interrupt::new();
        let waiter = interrupt.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        interrupt.trigger();

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_already_triggered() {
        let interrupt = Interrupt::new();
        interrupt.trigger();

        interrupt.wait().await;
        assert!(interrupt.is_triggered());
    }
}
