//! Single-flight coordination of token refreshes

use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;

use crate::session::RefreshOutcome;

/// A refresh that is currently in progress
///
/// At most one exists at a time. Callers that find one await its outcome
/// instead of starting another.
#[derive(Debug)]
struct RefreshFlight {
    outcome: watch::Receiver<Option<RefreshOutcome>>,
}

/// Serializes refresh attempts so that only one is ever in flight
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    flight: Mutex<Option<RefreshFlight>>,
}

struct FlightGuard<'a> {
    slot: &'a Mutex<Option<RefreshFlight>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.slot).take();
    }
}

fn lock(slot: &Mutex<Option<RefreshFlight>>) -> MutexGuard<'_, Option<RefreshFlight>> {
    // Critical sections only swap the slot, so a poisoned lock is still consistent.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RefreshCoordinator {
    /// Constructs a coordinator with no refresh in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently in flight
    pub fn in_flight(&self) -> bool {
        lock(&self.flight).is_some()
    }

    /// Runs `lead` unless a refresh is already in flight, in which case the
    /// outcome of that refresh is returned instead
    ///
    /// The flight is released once `lead` settles, whatever its outcome. If the
    /// leading caller is dropped before settling, waiting callers race to
    /// start a fresh flight.
    pub async fn single_flight<F, Fut>(&self, lead: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let publisher = loop {
            let mut outcome = {
                let mut slot = lock(&self.flight);
                match slot.as_ref() {
                    Some(flight) => flight.outcome.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Some(RefreshFlight { outcome: rx });
                        break tx;
                    }
                }
            };

            tracing::debug!("refresh already in flight, awaiting its outcome");
            let settled = outcome.wait_for(Option::is_some).await.map(|settled| *settled);
            match settled {
                Ok(Some(result)) => return result,
                Ok(None) => {}
                Err(_) => {
                    tracing::debug!("in-flight refresh was abandoned before settling");
                }
            }
        };

        let _guard = FlightGuard { slot: &self.flight };
        let result = lead().await;
        publisher.send_replace(Some(result));
        result
    }
}
