use std::fmt;

use crate::ids::{ChannelId, EntityId};

#[derive(Debug, PartialEq, Eq)]
pub enum DirectoryError {
    /// A split referenced a channel the directory does not hold. The reactor
    /// never does this; seeing it means the consistency domain is corrupt.
    UnknownChannel(ChannelId),
    /// A split whose components do not cover the old channel's members.
    MembershipMismatch(ChannelId),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::UnknownChannel(c) => write!(f, "unknown channel: {c}"),
            DirectoryError::MembershipMismatch(c) => {
                write!(f, "split components do not match members of channel {c}")
            }
        }
    }
}

impl std::error::Error for DirectoryError {}

#[derive(Debug)]
pub enum ReactorError {
    Directory(DirectoryError),
    /// A split touched an entity that has no channel.
    Unassigned(EntityId),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::Directory(e) => write!(f, "channel directory: {e}"),
            ReactorError::Unassigned(e) => write!(f, "entity {e} has contacts but no channel"),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReactorError::Directory(e) => Some(e),
            ReactorError::Unassigned(_) => None,
        }
    }
}

impl From<DirectoryError> for ReactorError {
    fn from(e: DirectoryError) -> Self {
        ReactorError::Directory(e)
    }
}

#[derive(Debug)]
pub enum SnapshotError {
    Json(serde_json::Error),
    UnsupportedVersion(String),
    Inconsistent(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Json(e) => write!(f, "snapshot JSON error: {e}"),
            SnapshotError::UnsupportedVersion(v) => write!(f, "unsupported snapshot version: {v}"),
            SnapshotError::Inconsistent(msg) => write!(f, "inconsistent snapshot: {msg}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Json(e)
    }
}
