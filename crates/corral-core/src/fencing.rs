//! Fencing tokens and leadership state
//!
//! TigerStyle: Leadership is an explicit tagged state, never an Option<u64>
//! whose zero value means something.
//!
//! A [`FencingToken`] is minted fresh every time this coordinator is granted
//! leadership. Tokens are opaque: they are only ever compared for equality
//! against the current one. The [`LeaderEpoch`] delivered by the election
//! service is kept alongside for ordering grant notifications and for logs.

use crate::io::RngProvider;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leadership term number as delivered by the election service
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LeaderEpoch(u64);

impl LeaderEpoch {
    pub const fn new(epoch: u64) -> Self {
        Self(epoch)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LeaderEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch:{}", self.0)
    }
}

/// Opaque token identifying one leadership session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FencingToken(u128);

impl FencingToken {
    /// Mint a fresh token
    ///
    /// Collisions with a previously issued token are astronomically unlikely
    /// with 128 random bits.
    pub fn generate(rng: &dyn RngProvider) -> Self {
        Self(rng.next_u128())
    }

    /// Build a token from raw bits (tests and wire decoding)
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ft:{:032x}", self.0)
    }
}

/// Leadership state of this coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    /// Leader for `epoch`; only calls carrying `token` are admitted
    Active {
        epoch: LeaderEpoch,
        token: FencingToken,
    },
    /// Not leader; every fenced call is rejected
    Inactive,
}

impl LeadershipState {
    /// Current token, if leader
    pub fn token(&self) -> Option<FencingToken> {
        match self {
            Self::Active { token, .. } => Some(*token),
            Self::Inactive => None,
        }
    }

    /// Current epoch, if leader
    pub fn epoch(&self) -> Option<LeaderEpoch> {
        match self {
            Self::Active { epoch, .. } => Some(*epoch),
            Self::Inactive => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Check whether `provided` is admitted under this state
    pub fn admits(&self, provided: &FencingToken) -> bool {
        self.token().as_ref() == Some(provided)
    }
}
