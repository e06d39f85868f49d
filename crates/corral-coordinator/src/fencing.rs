//! Fencing guard
//!
//! TigerStyle: One shared leadership state; checks read it, transitions write it.
//!
//! Every fenced call passes through [`FencingGuard::check`] or
//! [`FencingGuard::admit`] before touching any other state. A call that must
//! stay fenced while it mutates (a registration commit, a capacity report)
//! holds the [`Admitted`] read guard for the duration of the mutation, so a
//! grant or revoke waits for it and can never interleave with it.
//!
//! Lock order: fencing guard, then registry shard, then monitor state.

use crate::error::{CoordinatorError, CoordinatorResult};
use corral_core::{FencingToken, LeaderEpoch, LeadershipState};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared leadership state of this coordinator
#[derive(Debug)]
pub struct FencingGuard {
    state: RwLock<LeadershipState>,
}

impl Default for FencingGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl FencingGuard {
    /// Create a guard that rejects everything until leadership is granted
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LeadershipState::Inactive),
        }
    }

    /// Reject `provided` unless it is the current token
    pub async fn check(&self, provided: &FencingToken) -> CoordinatorResult<()> {
        self.admit(provided).await.map(drop)
    }

    /// Like [`check`](Self::check), but keeps leadership pinned while held
    pub async fn admit(&self, provided: &FencingToken) -> CoordinatorResult<Admitted<'_>> {
        let state = self.state.read().await;
        if !state.admits(provided) {
            return Err(CoordinatorError::fencing_mismatch(*provided, state.token()));
        }
        Ok(Admitted { state })
    }

    /// Pin leadership if this coordinator is leader, whatever the caller's token
    ///
    /// Used by internal activity such as heartbeat eviction that carries no
    /// caller token but must not act while inactive.
    pub async fn active(&self) -> Option<Admitted<'_>> {
        let state = self.state.read().await;
        state.is_active().then_some(Admitted { state })
    }

    /// Exclusive access for a leadership transition
    pub async fn transition(&self) -> Transition<'_> {
        Transition {
            state: self.state.write().await,
        }
    }

    pub async fn current(&self) -> LeadershipState {
        *self.state.read().await
    }

    pub async fn current_token(&self) -> Option<FencingToken> {
        self.state.read().await.token()
    }
}

/// Proof that a call was admitted; leadership cannot change while it lives
#[derive(Debug)]
pub struct Admitted<'a> {
    state: RwLockReadGuard<'a, LeadershipState>,
}

impl Admitted<'_> {
    pub fn epoch(&self) -> Option<LeaderEpoch> {
        self.state.epoch()
    }
}

/// Write access to the leadership state
#[derive(Debug)]
pub struct Transition<'a> {
    state: RwLockWriteGuard<'a, LeadershipState>,
}

impl Transition<'_> {
    pub fn state(&self) -> LeadershipState {
        *self.state
    }

    /// Make `token` the only admitted token; returns the previous state
    pub fn install(&mut self, epoch: LeaderEpoch, token: FencingToken) -> LeadershipState {
        std::mem::replace(&mut *self.state, LeadershipState::Active { epoch, token })
    }

    /// Admit nothing; returns the previous state
    pub fn revoke(&mut self) -> LeadershipState {
        std::mem::replace(&mut *self.state, LeadershipState::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_inactive_rejects_everything() {
        let guard = FencingGuard::new();
        let err = guard.check(&FencingToken::from_raw(1)).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::FencingMismatch { current: None, .. }
        ));
        assert!(guard.active().await.is_none());
    }

    #[tokio::test]
    async fn test_install_admits_only_new_token() {
        let guard = FencingGuard::new();
        let old = FencingToken::from_raw(1);
        let new = FencingToken::from_raw(2);

        guard.transition().await.install(LeaderEpoch::new(1), old);
        guard.check(&old).await.unwrap();

        let previous = guard.transition().await.install(LeaderEpoch::new(2), new);
        assert_eq!(previous.token(), Some(old));

        assert!(guard.check(&old).await.is_err());
        let admitted = guard.admit(&new).await.unwrap();
        assert_eq!(admitted.epoch(), Some(LeaderEpoch::new(2)));
    }

    #[tokio::test]
    async fn test_revoke_rejects_previously_valid_token() {
        let guard = FencingGuard::new();
        let token = FencingToken::from_raw(9);
        guard.transition().await.install(LeaderEpoch::new(1), token);

        let previous = guard.transition().await.revoke();
        assert!(previous.is_active());
        assert!(guard.check(&token).await.is_err());
        assert_eq!(guard.current().await, LeadershipState::Inactive);
    }

    #[tokio::test]
    async fn test_transition_waits_for_admitted_calls() {
        let guard = Arc::new(FencingGuard::new());
        let token = FencingToken::from_raw(5);
        guard.transition().await.install(LeaderEpoch::new(1), token);

        let admitted = guard.admit(&token).await.unwrap();

        let revoker = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard.transition().await.revoke();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!revoker.is_finished());

        drop(admitted);
        revoker.await.unwrap();
        assert!(guard.check(&token).await.is_err());
    }
}
