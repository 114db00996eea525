//! Single-flight coalescing for expensive rebuild operations.
//!
//! When multiple callers request the same work concurrently (an index
//! refresh, typically), only the first performs it; the rest subscribe to a
//! broadcast channel and receive the first caller's outcome.

use std::future::Future;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::broadcast;

/// Error observed by a follower when the leading flight went away.
#[derive(Debug, Clone, Error)]
pub enum FlightError {
    /// The leader was cancelled before broadcasting a result.
    #[error("in-flight operation was cancelled")]
    Cancelled,
    /// The follower lagged behind the broadcast channel.
    #[error("lagged behind in-flight operation by {0} messages")]
    Lagged(u64),
}

enum Role<T> {
    Leader(broadcast::Sender<T>),
    Follower(broadcast::Receiver<T>),
}

/// Coalesces concurrent invocations of one logical operation.
///
/// At most one caller (the leader) runs the work; concurrent callers await
/// the leader's broadcast result. If the leader is cancelled mid-flight the
/// slot is cleared on drop, so followers observe [`FlightError::Cancelled`]
/// and the next caller starts a fresh flight.
pub struct SingleFlight<T> {
    slot: Mutex<Option<broadcast::Sender<T>>>,
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an idle single-flight slot.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Runs `work`, or joins the flight already running it.
    pub async fn run<F, Fut>(&self, work: F) -> Result<T, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let role = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match &*slot {
                Some(sender) => Role::Follower(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    *slot = Some(sender.clone());
                    Role::Leader(sender)
                }
            }
        };

        match role {
            Role::Leader(sender) => {
                // Clears the slot even if the leading future is dropped.
                let _guard = ClearGuard { slot: &self.slot };
                let outcome = work().await;
                drop(_guard);
                let _ = sender.send(outcome.clone());
                Ok(outcome)
            }
            Role::Follower(mut receiver) => match receiver.recv().await {
                Ok(outcome) => Ok(outcome),
                Err(broadcast::error::RecvError::Closed) => Err(FlightError::Cancelled),
                Err(broadcast::error::RecvError::Lagged(n)) => Err(FlightError::Lagged(n)),
            },
        }
    }

    /// Whether a flight is currently running.
    pub fn in_flight(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

struct ClearGuard<'a, T> {
    slot: &'a Mutex<Option<broadcast::Sender<T>>>,
}

impl<T> Drop for ClearGuard<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}
