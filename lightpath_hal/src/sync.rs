//! Status composition.
//!
//! [`combine`] folds several statuses into one composite that succeeds when
//! every child succeeds and fails on the first child failure or child
//! timeout. The overall deadline is measured from the call, so a composite
//! built with an already expired deadline and any unresolved child times out
//! immediately without blocking.
//!
//! Every call owns its counter and completion. The composite registers only
//! callbacks on its children and never holds their completions, so children
//! keep running (and finishing) after the composite has resolved.

use crate::error::HalError;
use crate::status::{Outcome, Status};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Composite of `statuses` with an optional timeout from now.
pub fn combine(statuses: &[Status], timeout: Option<Duration>) -> Status {
    let started = Instant::now();
    let deadline = timeout.and_then(|t| started.checked_add(t));
    combine_at(statuses, started, deadline)
}

/// Composite of `statuses` that times out at `deadline`.
pub fn combine_until(statuses: &[Status], deadline: Instant) -> Status {
    combine_at(statuses, Instant::now(), Some(deadline))
}

/// Block until every status finishes or `timeout` elapses.
pub fn wait_all(statuses: &[Status], timeout: Option<Duration>) -> Outcome {
    combine(statuses, timeout).wait(timeout)
}

/// Children that failed or timed out, with their errors.
pub fn partial_failures(statuses: &[Status]) -> Vec<(String, HalError)> {
    statuses
        .iter()
        .filter_map(|status| {
            let error = match status.outcome() {
                Outcome::Failure(e) => e,
                Outcome::Timeout => HalError::OperationTimeout {
                    target: status.target().to_string(),
                    timeout: status.elapsed(),
                },
                Outcome::Pending | Outcome::Success => return None,
            };
            Some((status.target().to_string(), error))
        })
        .collect()
}

fn combine_at(statuses: &[Status], started: Instant, deadline: Option<Instant>) -> Status {
    let (composite, completion) = Status::new(describe(statuses));
    if statuses.is_empty() {
        completion.succeed();
        return composite;
    }
    trace!("Combining {} statuses", statuses.len());

    let remaining = Arc::new(AtomicUsize::new(statuses.len()));
    for child in statuses {
        let remaining = Arc::clone(&remaining);
        let parent = completion.downgrade();
        let child_target = child.target().to_string();
        child.add_callback(move |outcome| {
            let Some(parent) = parent.upgrade() else {
                return;
            };
            match outcome {
                Outcome::Success => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        parent.succeed();
                    }
                }
                Outcome::Failure(e) => {
                    parent.fail(HalError::ChildFailed {
                        target: child_target,
                        source: Box::new(e.clone()),
                    });
                }
                Outcome::Timeout => {
                    let source = HalError::OperationTimeout {
                        target: child_target.clone(),
                        timeout: started.elapsed(),
                    };
                    parent.fail(HalError::ChildFailed {
                        target: child_target,
                        source: Box::new(source),
                    });
                }
                Outcome::Pending => {}
            }
        });
    }

    if let Some(deadline) = deadline {
        if !composite.is_done() {
            match deadline.checked_duration_since(Instant::now()) {
                Some(left) if !left.is_zero() => completion.arm_timeout(left),
                _ => {
                    completion.time_out();
                }
            }
        }
    }
    composite
}

fn describe(statuses: &[Status]) -> String {
    let targets: Vec<&str> = statuses.iter().map(Status::target).collect();
    format!("[{}]", targets.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn boom(name: &str) -> HalError {
        HalError::NotConnected {
            signal: name.to_string(),
        }
    }

    #[test]
    fn empty_combine_succeeds() {
        assert!(combine(&[], Some(Duration::ZERO)).success());
    }

    #[test]
    fn succeeds_when_every_child_succeeds() {
        let (a, ca) = Status::new("a");
        let (b, cb) = Status::new("b");
        let composite = combine(&[a, b], Some(Duration::from_secs(2)));
        assert_eq!(composite.target(), "[a, b]");
        ca.succeed();
        assert!(!composite.is_done());
        cb.succeed();
        assert_eq!(composite.outcome(), Outcome::Success);
    }

    #[test]
    fn first_failure_wins() {
        let (a, ca) = Status::new("a");
        let (b, cb) = Status::new("b");
        let composite = combine(&[a, b.clone()], None);
        cb.fail(boom("b"));
        ca.fail(boom("a"));
        assert_eq!(
            composite.outcome(),
            Outcome::Failure(HalError::ChildFailed {
                target: "b".to_string(),
                source: Box::new(boom("b")),
            })
        );
        assert_eq!(partial_failures(&[b]).len(), 1);
    }

    #[test]
    fn failure_resolves_composite_while_sibling_never_finishes() {
        let (s1, c1) = Status::new("s1");
        let (s2, _c2) = Status::new("s2");
        let composite = combine(&[s1, s2.clone()], None);
        c1.fail(boom("s1"));

        assert!(!s2.is_done());
        assert_eq!(
            composite.wait(Some(Duration::from_millis(100))),
            Outcome::Failure(HalError::ChildFailed {
                target: "s1".to_string(),
                source: Box::new(boom("s1")),
            })
        );
        assert_eq!(s2.outcome(), Outcome::Pending);
    }

    #[test]
    fn child_timeout_fails_the_composite() {
        let (a, ca) = Status::new("a");
        let composite = combine(&[a], None);
        ca.time_out();
        let error = composite.outcome().error().cloned().unwrap();
        assert!(matches!(
            error.root_cause(),
            HalError::OperationTimeout { target, .. } if target == "a"
        ));
    }

    #[test]
    fn expired_deadline_times_out_immediately() {
        let (a, _ca) = Status::new("a");
        let composite = combine_until(&[a, Status::done("b")], Instant::now());
        assert_eq!(composite.outcome(), Outcome::Timeout);
    }

    #[test]
    fn expired_deadline_with_finished_children_succeeds() {
        let composite = combine_until(&[Status::done("a")], Instant::now());
        assert!(composite.success());
    }

    #[test]
    fn deadline_elapses_while_children_pending() {
        let (a, ca) = Status::new("a");
        let composite = combine(&[a], Some(Duration::from_millis(20)));
        assert_eq!(composite.wait(Some(Duration::from_secs(2))), Outcome::Timeout);
        ca.succeed();
        assert_eq!(composite.outcome(), Outcome::Timeout);
    }

    #[test]
    fn wait_all_collects_completions_from_other_threads() {
        let pairs: Vec<_> = (0..4).map(|i| Status::new(format!("s{i}"))).collect();
        let statuses: Vec<Status> = pairs.iter().map(|(s, _)| s.clone()).collect();
        let handles: Vec<_> = pairs
            .into_iter()
            .map(|(_, c)| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    c.succeed();
                })
            })
            .collect();
        assert_eq!(
            wait_all(&statuses, Some(Duration::from_secs(2))),
            Outcome::Success
        );
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
