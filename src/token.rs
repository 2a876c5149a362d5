//! Cancellation tokens for provider computation
//!
//! A [`CancelToken`] is raced against a provider factory: whichever finishes
//! first decides the caller's outcome. Tokens are cloneable and cheap; a
//! token that can actually fire is produced together with its
//! [`CancelSource`], or from a deadline.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct TokenInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
    deadline: Option<Instant>,
}

/// A cloneable cancellation token.
///
/// # Examples
///
/// ```rust
/// use keyed_registry::CancelToken;
///
/// let (source, token) = CancelToken::new();
/// assert!(!token.is_cancelled());
/// source.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

/// The cancelling half of a token pair.
pub struct CancelSource {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a token together with the source that cancels it.
    pub fn new() -> (CancelSource, CancelToken) {
        let inner = Arc::new(TokenInner {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
            deadline: None,
        });
        (
            CancelSource {
                inner: Arc::clone(&inner),
            },
            CancelToken { inner },
        )
    }

    /// A token that never fires.
    pub fn never() -> CancelToken {
        CancelToken {
            inner: Arc::new(TokenInner {
                cancelled: Mutex::new(false),
                signal: Condvar::new(),
                deadline: None,
            }),
        }
    }

    /// A token that fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> CancelToken {
        CancelToken {
            inner: Arc::new(TokenInner {
                cancelled: Mutex::new(false),
                signal: Condvar::new(),
                deadline: Some(Instant::now() + timeout),
            }),
        }
    }

    /// True once the token has been cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled.lock() {
            return true;
        }
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Block until `done` reports completion or this token fires, whichever
    /// comes first. Returns true when completion won the race.
    ///
    /// The predicate is re-checked on every wakeup; producers signal through
    /// [`CancelToken::notify_waiters`] after publishing their result.
    pub(crate) fn block_until(&self, mut done: impl FnMut() -> bool) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if done() {
                return true;
            }
            if *cancelled {
                return false;
            }
            match self.inner.deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    self.inner.signal.wait_until(&mut cancelled, deadline);
                }
                None => self.inner.signal.wait(&mut cancelled),
            }
        }
    }

    /// Wake every `block_until` waiter on this token.
    ///
    /// The lock is taken first so a waiter between its predicate check and
    /// its wait cannot miss the wakeup.
    pub(crate) fn notify_waiters(&self) {
        let _guard = self.inner.cancelled.lock();
        self.inner.signal.notify_all();
    }
}

impl CancelSource {
    /// Fire the token, waking every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.signal.notify_all();
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl std::fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSource").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_wakes_waiter() {
        let (source, token) = CancelToken::new();

        let waiter = std::thread::spawn(move || token.block_until(|| false));
        std::thread::sleep(Duration::from_millis(20));
        source.cancel();

        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_completion_wins() {
        let token = CancelToken::never();
        let done = Arc::new(Mutex::new(false));

        let producer_token = token.clone();
        let producer_done = Arc::clone(&done);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            *producer_done.lock() = true;
            producer_token.notify_waiters();
        });

        assert!(token.block_until(|| *done.lock()));
    }

    #[test]
    fn test_timeout_fires() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        assert!(!token.block_until(|| false));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_already_done_wins_over_cancelled() {
        let (source, token) = CancelToken::new();
        source.cancel();
        // A result that is already available is adopted even after cancel.
        assert!(token.block_until(|| true));
    }
}
