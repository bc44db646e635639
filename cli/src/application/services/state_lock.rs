//! Application service: exclusive state locking.
//!
//! Locks are taken with [`acquire_lock`] and always given back by
//! [`with_state_lock`], whatever the body returns.

use std::future::Future;
use std::time::Instant;

use anyhow::{Context, Result};
use infrasync_common::{LockInfo, LockOperation};

use crate::application::ports::{ProgressReporter, StateBackend};
use crate::domain::error::StateError;
use crate::domain::state::{LockAttempt, LockPolicy, StateRef, new_lock_info};

/// Proof that the caller holds the lock on `state`.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub state: StateRef,
    pub info: LockInfo,
}

impl LockHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.id
    }
}

/// Take the lock on `state`, waiting according to `policy`.
///
/// # Errors
///
/// - [`StateError::LockContention`] when the lock is held and the policy does
///   not wait.
/// - [`StateError::LockTimeout`] when the lock is still held after
///   `policy.timeout`.
pub async fn acquire_lock(
    backend: &impl StateBackend,
    reporter: &impl ProgressReporter,
    state: &StateRef,
    operation: LockOperation,
    who: &str,
    policy: &LockPolicy,
) -> Result<LockHandle> {
    let info = new_lock_info(operation, who);
    let started = Instant::now();
    let mut announced = false;
    loop {
        match backend.try_lock(state, &info).await? {
            LockAttempt::Acquired => {
                tracing::debug!(state = %state, lock_id = %info.id, %operation, "state lock acquired");
                return Ok(LockHandle {
                    state: state.clone(),
                    info,
                });
            }
            LockAttempt::Held(holder) => {
                if policy.fails_fast() {
                    return Err(StateError::LockContention {
                        state: state.to_string(),
                        holder,
                    }
                    .into());
                }
                let waited = started.elapsed();
                if waited >= policy.timeout {
                    return Err(StateError::LockTimeout {
                        state: state.to_string(),
                        waited_secs: waited.as_secs(),
                        holder,
                    }
                    .into());
                }
                if !announced {
                    reporter.step(&format!("Waiting for state lock held by {}", holder.who));
                    announced = true;
                }
                let remaining = policy.timeout.saturating_sub(waited);
                tokio::time::sleep(policy.poll_interval.min(remaining)).await;
            }
        }
    }
}

/// Release a lock taken with [`acquire_lock`].
///
/// # Errors
///
/// Returns an error if the lock is no longer held under this handle.
pub async fn release_lock(backend: &impl StateBackend, handle: &LockHandle) -> Result<()> {
    backend
        .unlock(&handle.state, handle.id())
        .await
        .with_context(|| format!("releasing state lock on {}", handle.state))?;
    tracing::debug!(state = %handle.state, lock_id = %handle.id(), "state lock released");
    Ok(())
}

/// Run `body` while holding the lock on `state`.
///
/// The lock is released after `body` finishes, on success and on failure.
/// A body error takes precedence over a release error.
///
/// # Errors
///
/// Returns lock acquisition errors, the body's error, or the release error.
pub async fn with_state_lock<B, R, F, Fut, T>(
    backend: &B,
    reporter: &R,
    state: &StateRef,
    operation: LockOperation,
    who: &str,
    policy: &LockPolicy,
    body: F,
) -> Result<T>
where
    B: StateBackend,
    R: ProgressReporter,
    F: FnOnce(LockHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let handle = acquire_lock(backend, reporter, state, operation, who, policy).await?;
    let result = body(handle.clone()).await;
    let released = release_lock(backend, &handle).await;
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            tracing::warn!(error = %release_err, "failed to release state lock after error");
            reporter.warn(&format!(
                "Lock on {state} may still be held (lock id {}); use 'infrasync state force-unlock'",
                handle.id()
            ));
            Err(e)
        }
    }
}

/// Remove a lock by id, regardless of who holds it.
///
/// # Errors
///
/// Returns an error if the state is not locked or is locked under another id.
pub async fn force_unlock(
    backend: &impl StateBackend,
    state: &StateRef,
    lock_id: &str,
) -> Result<LockInfo> {
    let holder = backend
        .lock_info(state)
        .await?
        .ok_or_else(|| StateError::NotLocked {
            state: state.to_string(),
        })?;
    if holder.id != lock_id {
        return Err(StateError::LockMismatch {
            state: state.to_string(),
            expected: lock_id.to_string(),
            actual: holder.id,
        }
        .into());
    }
    backend.unlock(state, lock_id).await?;
    tracing::info!(state = %state, lock_id, who = %holder.who, "state lock force-released");
    Ok(holder)
}
