//! Single-slot cross-task handoff.
//!
//! A [`Mailbox`] accepts exactly one value. Any number of tasks may race to
//! [`Mailbox::put`]; only the first wins. The owner waits with
//! [`Mailbox::take`], which is always bounded by a timeout.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of waiting on a mailbox
#[derive(Debug, PartialEq, Eq)]
pub enum Taken<T> {
    /// The delivered value
    Value(T),
    /// Nothing arrived before the deadline, or the value was already taken
    TimedOut,
}

impl<T> Taken<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Taken::TimedOut)
    }
}

pub struct Mailbox<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
    receiver: tokio::sync::Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    /// Deliver a value. Returns `false` if the mailbox was already resolved.
    pub fn put(&self, value: T) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Whether some `put` has already happened
    pub fn is_resolved(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Wait up to `timeout` for the value
    pub async fn take(&self, timeout: Duration) -> Taken<T> {
        let mut guard = self.receiver.lock().await;
        let Some(rx) = guard.as_mut() else {
            return Taken::TimedOut;
        };

        let outcome = tokio::time::timeout(timeout, rx).await;
        match outcome {
            Ok(Ok(value)) => {
                *guard = None;
                Taken::Value(value)
            }
            // Sender dropped without a value
            Ok(Err(_)) => {
                *guard = None;
                Taken::TimedOut
            }
            Err(_) => Taken::TimedOut,
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_then_take() {
        let mailbox = Mailbox::new();
        assert!(mailbox.put(7));
        assert_eq!(mailbox.take(Duration::from_millis(10)).await, Taken::Value(7));
    }

    #[tokio::test]
    async fn test_only_first_put_wins() {
        let mailbox = Mailbox::new();
        assert!(mailbox.put("first"));
        assert!(!mailbox.put("second"));
        assert!(mailbox.is_resolved());
        assert_eq!(
            mailbox.take(Duration::from_millis(10)).await,
            Taken::Value("first")
        );
    }

    #[tokio::test]
    async fn test_take_times_out() {
        let mailbox: Mailbox<u8> = Mailbox::new();
        let taken = mailbox.take(Duration::from_millis(20)).await;
        assert!(taken.is_timed_out());

        // A late value is still delivered to a second wait
        assert!(mailbox.put(1));
        assert_eq!(mailbox.take(Duration::from_millis(20)).await, Taken::Value(1));
    }

    #[tokio::test]
    async fn test_value_is_taken_once() {
        let mailbox = Mailbox::new();
        mailbox.put(1u8);
        assert_eq!(mailbox.take(Duration::from_millis(10)).await, Taken::Value(1));
        assert!(mailbox.take(Duration::from_millis(10)).await.is_timed_out());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_deliver_exactly_one() {
        let mailbox = Arc::new(Mailbox::new());
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let mailbox = mailbox.clone();
            handles.push(tokio::spawn(async move { mailbox.put(i) }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap_or(false) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(matches!(
            mailbox.take(Duration::from_millis(10)).await,
            Taken::Value(_)
        ));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_put_from_other_task() {
        let mailbox = Arc::new(Mailbox::new());
        let writer = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.put("late");
        });
        assert_eq!(
            mailbox.take(Duration::from_secs(2)).await,
            Taken::Value("late")
        );
    }
}
