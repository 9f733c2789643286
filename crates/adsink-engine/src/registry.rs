//! In-process registry of live runs.
//!
//! Serializes runs per tenant (one live run at a time) and owns each run's
//! cancellation channel. Entries exist only while a run is live; terminal
//! state lives in the ledger.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use uuid::Uuid;

use crate::EngineError;

struct LiveRun {
    run_id: Uuid,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
pub struct RunRegistry {
    inner: Mutex<HashMap<String, LiveRun>>,
}

impl RunRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the tenant slot for a new run and returns its cancellation
    /// receiver.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInProgress`] when the tenant already has a
    /// live run.
    pub fn try_register(
        &self,
        tenant_id: &str,
        run_id: Uuid,
    ) -> Result<watch::Receiver<bool>, EngineError> {
        let mut inner = self.inner.lock().expect("run registry lock poisoned");
        if inner.contains_key(tenant_id) {
            return Err(EngineError::RunInProgress {
                tenant_id: tenant_id.to_owned(),
            });
        }

        let (cancel, cancel_rx) = watch::channel(false);
        inner.insert(tenant_id.to_owned(), LiveRun { run_id, cancel });
        Ok(cancel_rx)
    }

    /// Releases the tenant slot, but only if it still belongs to `run_id`.
    pub fn deregister(&self, tenant_id: &str, run_id: Uuid) {
        let mut inner = self.inner.lock().expect("run registry lock poisoned");
        if inner.get(tenant_id).is_some_and(|live| live.run_id == run_id) {
            inner.remove(tenant_id);
        }
    }

    /// Signals cancellation to the live run with this id. Returns `false`
    /// when no such run is live (already terminal or unknown).
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let inner = self.inner.lock().expect("run registry lock poisoned");
        for live in inner.values() {
            if live.run_id == run_id {
                let _ = live.cancel.send(true);
                return true;
            }
        }
        false
    }

    /// Signals cancellation to every live run (process shutdown).
    pub fn cancel_all(&self) {
        let inner = self.inner.lock().expect("run registry lock poisoned");
        for live in inner.values() {
            let _ = live.cancel.send(true);
        }
    }

    /// The live run id for a tenant, if any.
    #[must_use]
    pub fn live_run(&self, tenant_id: &str) -> Option<Uuid> {
        let inner = self.inner.lock().expect("run registry lock poisoned");
        inner.get(tenant_id).map(|live| live.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_for_same_tenant_is_rejected() {
        let registry = RunRegistry::new();
        let first = Uuid::new_v4();

        registry
            .try_register("acme", first)
            .expect("first registration should succeed");

        let err = registry
            .try_register("acme", Uuid::new_v4())
            .expect_err("second registration should fail");
        assert!(matches!(err, EngineError::RunInProgress { ref tenant_id } if tenant_id == "acme"));

        // A different tenant is unaffected.
        registry
            .try_register("globex", Uuid::new_v4())
            .expect("other tenants run in parallel");
    }

    #[test]
    fn deregister_frees_the_slot_only_for_the_owning_run() {
        let registry = RunRegistry::new();
        let run_id = Uuid::new_v4();
        registry.try_register("acme", run_id).expect("registered");

        // A stale deregister from some other run id is a no-op.
        registry.deregister("acme", Uuid::new_v4());
        assert_eq!(registry.live_run("acme"), Some(run_id));

        registry.deregister("acme", run_id);
        assert_eq!(registry.live_run("acme"), None);
        registry
            .try_register("acme", Uuid::new_v4())
            .expect("slot should be free again");
    }

    #[test]
    fn cancel_reaches_the_registered_receiver() {
        let registry = RunRegistry::new();
        let run_id = Uuid::new_v4();
        let cancel_rx = registry.try_register("acme", run_id).expect("registered");

        assert!(!*cancel_rx.borrow());
        assert!(registry.cancel(run_id));
        assert!(*cancel_rx.borrow());

        assert!(!registry.cancel(Uuid::new_v4()), "unknown run id");
    }

    #[test]
    fn cancel_all_signals_every_live_run() {
        let registry = RunRegistry::new();
        let rx_a = registry
            .try_register("acme", Uuid::new_v4())
            .expect("registered");
        let rx_b = registry
            .try_register("globex", Uuid::new_v4())
            .expect("registered");

        registry.cancel_all();
        assert!(*rx_a.borrow());
        assert!(*rx_b.borrow());
    }
}
