//! Completion handles for asynchronous hardware operations.
//!
//! A [`Status`] observes one operation (a write, a stage, a composite of
//! several). It starts `Pending` and transitions exactly once to `Success`,
//! `Failure` or `Timeout`. The only way to drive that transition is the
//! paired [`Completion`], which stays with whoever issued the operation, so
//! code composing statuses can watch them but never complete them.
//!
//! # Threading
//!
//! - `wait()` blocks only the calling thread (condvar).
//! - Callbacks run on the thread that completes the status, outside the
//!   internal lock, each exactly once.
//! - `Completion::arm_timeout` parks one helper thread on the same condvar; it
//!   exits as soon as the status is terminal.

use crate::error::HalError;
use static_assertions::assert_impl_all;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Outcome of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not finished yet.
    Pending,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failure(HalError),
    /// Deadline passed before the operation finished.
    Timeout,
}

impl Outcome {
    /// Whether this is a final outcome.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Error carried by a failure.
    pub fn error(&self) -> Option<&HalError> {
        match self {
            Self::Failure(e) => Some(e),
            _ => None,
        }
    }
}

type Callback = Box<dyn FnOnce(&Outcome) + Send + 'static>;

struct StatusState {
    outcome: Outcome,
    callbacks: Vec<Callback>,
    finished_at: Option<Instant>,
}

struct StatusInner {
    target: String,
    started_at: Instant,
    state: Mutex<StatusState>,
    done: Condvar,
}

impl StatusInner {
    fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Observer handle of an operation.
#[derive(Clone)]
pub struct Status {
    inner: Arc<StatusInner>,
}

/// Completing handle of an operation.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<StatusInner>,
}

/// Non-owning completing handle, for callbacks registered on other
/// statuses.
#[derive(Clone)]
pub struct WeakCompletion {
    inner: Weak<StatusInner>,
}

assert_impl_all!(Status: Send, Sync, Clone);
assert_impl_all!(Completion: Send, Sync, Clone);

impl Status {
    /// Create a pending status and the handle that completes it.
    pub fn new(target: impl Into<String>) -> (Status, Completion) {
        let inner = Arc::new(StatusInner {
            target: target.into(),
            started_at: Instant::now(),
            state: Mutex::new(StatusState {
                outcome: Outcome::Pending,
                callbacks: Vec::new(),
                finished_at: None,
            }),
            done: Condvar::new(),
        });
        (
            Status {
                inner: Arc::clone(&inner),
            },
            Completion { inner },
        )
    }

    /// An already successful status.
    pub fn done(target: impl Into<String>) -> Status {
        let (status, completion) = Status::new(target);
        completion.succeed();
        status
    }

    /// An already failed status.
    pub fn failed(target: impl Into<String>, error: HalError) -> Status {
        let (status, completion) = Status::new(target);
        completion.fail(error);
        status
    }

    /// A status that succeeds once `delay` has elapsed.
    pub fn delay(target: impl Into<String>, delay: Duration) -> Status {
        let (status, completion) = Status::new(target);
        if delay.is_zero() {
            completion.succeed();
            return status;
        }
        let timer = completion.clone();
        let spawned = thread::Builder::new()
            .name("status-delay".to_string())
            .spawn(move || {
                thread::sleep(delay);
                timer.succeed();
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn delay thread for '{}': {}", status.target(), e);
            completion.succeed();
        }
        status
    }

    /// Description of the operation.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Current outcome.
    pub fn outcome(&self) -> Outcome {
        self.inner.lock().outcome.clone()
    }

    /// Whether the status is terminal.
    pub fn is_done(&self) -> bool {
        self.inner.lock().outcome.is_terminal()
    }

    /// Whether the status finished successfully.
    pub fn success(&self) -> bool {
        self.inner.lock().outcome.is_success()
    }

    /// Time from creation to completion, or to now while pending.
    pub fn elapsed(&self) -> Duration {
        let end = self.inner.lock().finished_at.unwrap_or_else(Instant::now);
        end.duration_since(self.inner.started_at)
    }

    /// Block until the status is terminal or `timeout` elapses.
    ///
    /// A wait that runs out returns `Outcome::Timeout` and leaves the status
    /// untouched; it may still complete later. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Outcome {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.inner.lock();
        loop {
            if state.outcome.is_terminal() {
                return state.outcome.clone();
            }
            state = match deadline {
                None => self
                    .inner
                    .done
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Outcome::Timeout;
                    }
                    self.inner
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Run `callback` with the final outcome.
    ///
    /// Runs immediately on the calling thread when the status is already
    /// terminal, otherwise on the completing thread at transition.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.lock();
            if !state.outcome.is_terminal() {
                state.callbacks.push(Box::new(callback));
                return;
            }
            state.outcome.clone()
        };
        callback(&outcome);
    }

    /// Chain a follow-up operation after success.
    ///
    /// `next` runs on the thread that completes this status. The returned
    /// status mirrors the follow-up; failures and timeouts of this status are
    /// forwarded without running `next`.
    pub fn and_then<F>(&self, next: F) -> Status
    where
        F: FnOnce() -> Result<Status, HalError> + Send + 'static,
    {
        let (chained, completion) = Status::new(self.target());
        self.add_callback(move |outcome| match outcome {
            Outcome::Success => match next() {
                Ok(follow) => follow.add_callback(move |o| {
                    completion.finish(o.clone());
                }),
                Err(e) => {
                    completion.fail(e);
                }
            },
            other => {
                completion.finish(other.clone());
            }
        });
        chained
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("target", &self.inner.target)
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl Completion {
    /// Observer handle of the same operation.
    pub fn status(&self) -> Status {
        Status {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether the status is terminal.
    pub fn is_done(&self) -> bool {
        self.inner.lock().outcome.is_terminal()
    }

    /// Handle that does not keep the status alive.
    pub fn downgrade(&self) -> WeakCompletion {
        WeakCompletion {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Mark success. Returns `false` if already terminal.
    pub fn succeed(&self) -> bool {
        self.finish(Outcome::Success)
    }

    /// Mark failure. Returns `false` if already terminal.
    pub fn fail(&self, error: HalError) -> bool {
        self.finish(Outcome::Failure(error))
    }

    /// Mark timeout. Returns `false` if already terminal.
    pub fn time_out(&self) -> bool {
        self.finish(Outcome::Timeout)
    }

    /// Time the status out if it is still pending after `timeout`.
    pub fn arm_timeout(&self, timeout: Duration) {
        let completion = self.clone();
        let spawned = thread::Builder::new()
            .name("status-timeout".to_string())
            .spawn(move || {
                completion.status().wait(Some(timeout));
                if completion.time_out() {
                    debug!(
                        "'{}' timed out after {:?}",
                        completion.inner.target, timeout
                    );
                }
            });
        if let Err(e) = spawned {
            warn!(
                "Failed to spawn timeout thread for '{}': {}",
                self.inner.target, e
            );
        }
    }

    /// Apply a terminal outcome once. Duplicate completions are ignored.
    pub fn finish(&self, outcome: Outcome) -> bool {
        if !outcome.is_terminal() {
            return false;
        }
        let callbacks = {
            let mut state = self.inner.lock();
            if state.outcome.is_terminal() {
                trace!(
                    "Ignoring duplicate completion of '{}' ({:?})",
                    self.inner.target, outcome
                );
                return false;
            }
            state.outcome = outcome.clone();
            state.finished_at = Some(Instant::now());
            std::mem::take(&mut state.callbacks)
        };
        self.inner.done.notify_all();

        if let Outcome::Failure(e) = &outcome {
            debug!("'{}' failed: {}", self.inner.target, e);
        } else {
            trace!("'{}' finished: {:?}", self.inner.target, outcome);
        }

        for callback in callbacks {
            callback(&outcome);
        }
        true
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("target", &self.inner.target)
            .finish()
    }
}

impl WeakCompletion {
    /// Completing handle, if the status is still alive.
    pub fn upgrade(&self) -> Option<Completion> {
        self.inner.upgrade().map(|inner| Completion { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn boom() -> HalError {
        HalError::NotConnected {
            signal: "boom".to_string(),
        }
    }

    #[test]
    fn duplicate_completion_is_a_no_op() {
        let (status, completion) = Status::new("write");
        assert!(completion.succeed());
        assert!(!completion.fail(boom()));
        assert!(!completion.time_out());
        assert_eq!(status.outcome(), Outcome::Success);
    }

    #[test]
    fn expired_wait_reports_timeout_without_completing() {
        let (status, completion) = Status::new("slow");
        assert_eq!(status.wait(Some(Duration::from_millis(10))), Outcome::Timeout);
        assert_eq!(status.outcome(), Outcome::Pending);
        completion.succeed();
        assert_eq!(status.wait(Some(Duration::ZERO)), Outcome::Success);
    }

    #[test]
    fn wait_wakes_on_completion_from_another_thread() {
        let (status, completion) = Status::new("remote");
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completion.fail(boom());
        });
        assert_eq!(status.wait(None), Outcome::Failure(boom()));
        handle.join().unwrap();
    }

    #[test]
    fn callbacks_run_exactly_once() {
        let (status, completion) = Status::new("cb");
        let calls = Arc::new(AtomicUsize::new(0));

        let before = Arc::clone(&calls);
        status.add_callback(move |o| {
            assert!(o.is_success());
            before.fetch_add(1, Ordering::SeqCst);
        });
        completion.succeed();
        completion.succeed();

        let after = Arc::clone(&calls);
        status.add_callback(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn and_then_runs_follow_up_on_success() {
        let (first, completion) = Status::new("first");
        let (second, second_completion) = Status::new("second");
        let follow = second.clone();
        let chained = first.and_then(move || Ok(follow));

        completion.succeed();
        assert_eq!(chained.outcome(), Outcome::Pending);
        second_completion.succeed();
        assert_eq!(chained.wait(Some(Duration::from_secs(1))), Outcome::Success);
    }

    #[test]
    fn and_then_forwards_failure_without_running_follow_up() {
        let ran = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ran);
        let chained = Status::failed("first", boom()).and_then(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Status::done("never"))
        });
        assert_eq!(chained.outcome(), Outcome::Failure(boom()));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn armed_timeout_completes_pending_status() {
        let (status, completion) = Status::new("armed");
        completion.arm_timeout(Duration::from_millis(20));
        assert_eq!(status.wait(Some(Duration::from_secs(2))), Outcome::Timeout);
        assert_eq!(status.outcome(), Outcome::Timeout);
        assert!(!completion.succeed());
    }

    #[test]
    fn delay_succeeds_after_duration() {
        let status = Status::delay("settle", Duration::from_millis(20));
        assert!(!status.is_done());
        assert_eq!(status.wait(Some(Duration::from_secs(2))), Outcome::Success);
        assert!(status.elapsed() >= Duration::from_millis(20));
        assert!(Status::delay("instant", Duration::ZERO).success());
    }
}
