use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::OauthError;

type FlightResult = Result<crate::credential::Credential, Arc<OauthError>>;
type Flight = Shared<BoxFuture<'static, FlightResult>>;

/// Guarantees at most one refresh in flight per credential id; additional callers observe the
/// leader's outcome.
///
/// An empty id bypasses coalescing entirely — it is never installed in `inflight`.
#[derive(Default)]
pub struct RefreshCoordinator {
    inflight: Mutex<HashMap<String, Flight>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make` under singleflight for `id`. If a refresh for `id` is already in flight, await
    /// its result instead of starting a new one.
    pub async fn run<F, Fut>(&self, id: &str, make: F) -> FlightResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<crate::credential::Credential, OauthError>> + Send + 'static,
    {
        if id.is_empty() {
            return make().await.map_err(Arc::new);
        }

        let mut guard = self.inflight.lock().await;
        if let Some(existing) = guard.get(id) {
            let flight = existing.clone();
            drop(guard);
            return flight.await;
        }

        let flight: Flight = make().map(|r| r.map_err(Arc::new)).boxed().shared();
        guard.insert(id.to_string(), flight.clone());
        drop(guard);

        let result = flight.await;
        self.inflight.lock().await.remove(id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_refreshes_for_same_id_execute_once() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let call_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = coordinator.clone();
            let call_count = call_count.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .run("cred-x", move || {
                        let call_count = call_count.clone();
                        async move {
                            call_count.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok(Credential::new_oauth("cred-x", "file"))
                        }
                    })
                    .await
            }));
        }

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap());
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| o.is_ok()));
    }

    #[tokio::test]
    async fn empty_id_bypasses_coalescing() {
        let coordinator = RefreshCoordinator::new();
        let call_count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let call_count = call_count.clone();
            coordinator
                .run("", move || {
                    let call_count = call_count.clone();
                    async move {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        Ok(Credential::new_oauth("", "file"))
                    }
                })
                .await
                .unwrap();
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }
}
