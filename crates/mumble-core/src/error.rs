//! Shared error taxonomy (spec §7), used by both Hub and Edge crates for
//! the domain-level failures that don't belong to I/O or protocol framing.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("channel {0} not found")]
    UnknownChannel(u32),
    #[error("channel tree rooted at {0} is cyclic")]
    CyclicChannelTree(u32),
    #[error("duplicate sibling channel name: {0}")]
    DuplicateSiblingName(String),
    #[error("moving channel {0} under {1} would create a cycle")]
    WouldCreateCycle(u32, u32),
    #[error("root channel cannot be removed")]
    RootUndeletable,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unknown session {0}")]
    UnknownSession(u32),
    #[error("unknown user {0}")]
    UnknownUser(u32),
    #[error("validation failed: {0}")]
    Validation(String),
}
