use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::error::CoreError;
use crate::key::DerivativeKey;

type SharedResult = Result<Arc<Vec<u8>>, Arc<CoreError>>;

/// Collapses concurrent derivations for the same key into one unit of work.
///
/// The first caller to reach a given key becomes the leader and actually
/// does the work (probing the chain / invoking `Transform`); every other
/// caller racing the same key becomes a waiter and receives the leader's
/// result over a broadcast channel instead of repeating the work. A leader's
/// error is *not* sticky: the next caller for that key becomes a fresh
/// leader rather than inheriting the failure, per the coordinator's
/// `DERIVING -> DONE_ERR` transition being non-sticky.
pub struct SingleFlight {
    inflight: Mutex<HashMap<DerivativeKey, broadcast::Sender<SharedResult>>>,
}

/// What the caller should do: lead the derivation, or await the leader.
pub enum Role {
    Leader,
    Waiter(broadcast::Receiver<SharedResult>),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }

    /// Registers interest in `key`. Returns `Role::Leader` if this caller
    /// must do the work, or `Role::Waiter` with a receiver that will yield
    /// the leader's result.
    pub async fn join(&self, key: &DerivativeKey) -> Role {
        let mut inflight = self.inflight.lock().await;
        if let Some(sender) = inflight.get(key) {
            return Role::Waiter(sender.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        inflight.insert(key.clone(), tx);
        Role::Leader
    }

    /// Called by the leader once derivation completes (success or failure),
    /// broadcasting the result to every waiter and clearing the in-flight
    /// entry so the next caller for `key` starts fresh.
    pub async fn finish(&self, key: &DerivativeKey, result: SharedResult) {
        let sender = { self.inflight.lock().await.remove(key) };
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}
