//! One-shot broadcast signal.

use tokio::sync::watch;

/// A flag that can be raised once and awaited by any number of tasks.
///
/// Raising it again is a no-op. Waiters that arrive after it was raised
/// return immediately.
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raise the latch. Returns true if this call raised it.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is raised.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close under us.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_once() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_set());
        latch.wait().await;
    }

    #[tokio::test]
    async fn test_wakes_all_waiters() {
        let latch = Arc::new(Latch::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = Arc::clone(&latch);
                tokio::spawn(async move { latch.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.set();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
