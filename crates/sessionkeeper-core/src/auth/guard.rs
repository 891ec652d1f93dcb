use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fire-and-forget mutual exclusion for reauthentication.
///
/// A call made while another is in flight returns `None` at once. It neither
/// waits nor queues.
#[derive(Debug, Default)]
pub struct ReauthGuard {
    busy: AtomicBool,
}

/// Clears the flag on drop, including unwinding and future cancellation.
struct Held<'a>(&'a AtomicBool);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReauthGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run `f` unless a run is already in progress.
    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _held = Held(&self.busy);
        Some(f().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_when_free() {
        let guard = ReauthGuard::new();
        assert_eq!(guard.run_exclusive(|| async { 7 }).await, Some(7));
        assert!(!guard.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_are_dropped() {
        let guard = Arc::new(ReauthGuard::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let slow = {
            let guard = Arc::clone(&guard);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                guard
                    .run_exclusive(|| async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(guard.is_held());

        let second = guard
            .run_exclusive(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(second.is_none());

        assert!(slow.await.unwrap().is_some());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!guard.is_held());
    }

    #[tokio::test]
    async fn test_released_after_error() {
        let guard = ReauthGuard::new();
        let result: Option<Result<(), &str>> = guard.run_exclusive(|| async { Err("storage") }).await;
        assert_eq!(result, Some(Err("storage")));
        assert!(!guard.is_held());
        assert_eq!(guard.run_exclusive(|| async { 1 }).await, Some(1));
    }

    #[tokio::test]
    async fn test_released_after_panic() {
        let guard = Arc::new(ReauthGuard::new());
        let task = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .run_exclusive(|| async {
                        panic!("boom");
                    })
                    .await
            })
        };
        assert!(task.await.is_err());
        assert!(!guard.is_held());
    }
}
