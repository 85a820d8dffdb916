use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type InitFuture<E> = Shared<BoxFuture<'static, Result<(), E>>>;

/// Run-once guard for asynchronous initialization
///
/// The first call to [`AsyncInit::run`] builds the initializer future and
/// stores it as a shared future. Every caller, whether it raced the first
/// one or arrived after completion, awaits that same future and observes
/// the same `Result`. A failed initialization is never retried.
///
/// The initializer future is owned by the guard rather than by the first
/// caller, so dropping the caller that triggered it does not restart it.
pub struct AsyncInit<E> {
    future: Mutex<Option<InitFuture<E>>>,
}

impl<E> Default for AsyncInit<E> {
    fn default() -> Self {
        Self {
            future: Mutex::new(None),
        }
    }
}

impl<E> std::fmt::Debug for AsyncInit<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncInit")
            .field("started", &self.future.lock().is_some())
            .finish()
    }
}

impl<E> AsyncInit<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the initializer if nobody has yet and wait for its outcome
    ///
    /// `init` is only invoked by the call that wins the race; later calls
    /// drop it unused.
    pub async fn run<F, Fut>(&self, init: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let future = {
            let mut slot = self.future.lock();
            match slot.as_ref() {
                Some(future) => future.clone(),
                None => {
                    let future = init().boxed().shared();
                    *slot = Some(future.clone());
                    future
                }
            }
        };
        future.await
    }

    /// Outcome of the initializer, if it already finished
    pub fn peek(&self) -> Option<Result<(), E>> {
        self.future
            .lock()
            .as_ref()
            .and_then(|future| future.peek().cloned())
    }

    /// Whether some caller has triggered the initializer
    pub fn is_started(&self) -> bool {
        self.future.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let init = Arc::new(AsyncInit::<String>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let init = init.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                init.run(|| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_not_retried() {
        let init = AsyncInit::<String>::new();
        let runs = AtomicUsize::new(0);

        let first = init
            .run(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            })
            .await;
        let second = init
            .run(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(first, Err("boom".to_string()));
        assert_eq!(second, Err("boom".to_string()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peek_reports_progress() {
        let init = AsyncInit::<String>::new();
        assert!(!init.is_started());
        assert!(init.peek().is_none());

        init.run(|| async { Ok(()) }).await.unwrap();

        assert!(init.is_started());
        assert_eq!(init.peek(), Some(Ok(())));
        // completed guard resolves without running anything
        init.run(|| async { Err("unreachable".to_string()) })
            .await
            .unwrap();
    }
}
