//! Leaflet Storage Types - Pure type definitions
//!
//! This crate contains only plain data types with no async runtime or storage
//! dependencies, so both the domain core and the HTTP server can share them.

pub mod catalog;
pub mod datalayer;
pub mod map;
pub mod user;

pub use catalog::*;
pub use datalayer::*;
pub use map::*;
pub use user::*;

use serde::{Deserialize, Serialize};

/// Database identifier of a user
pub type UserId = i64;

/// Database identifier of a map
pub type MapId = i64;

/// Database identifier of a datalayer
pub type DataLayerId = i64;

pub type TileLayerId = i64;
pub type LicenceId = i64;
pub type PictogramId = i64;

/// Error returned when an integer stored in the database does not name a
/// known status value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct InvalidStatus {
    pub kind: &'static str,
    pub value: i64,
}

/// Who may edit a map.
///
/// Variants are ordered from the most open to the most restrictive, which the
/// permission gate relies on (`status >= Editors` means a check is needed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditStatus {
    Anonymous = 1,
    Editors = 2,
    Owner = 3,
}

impl Default for EditStatus {
    fn default() -> Self {
        EditStatus::Owner
    }
}

impl EditStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for EditStatus {
    type Error = InvalidStatus;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EditStatus::Anonymous),
            2 => Ok(EditStatus::Editors),
            3 => Ok(EditStatus::Owner),
            _ => Err(InvalidStatus {
                kind: "edit status",
                value,
            }),
        }
    }
}

impl std::fmt::Display for EditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditStatus::Anonymous => write!(f, "anonymous"),
            EditStatus::Editors => write!(f, "editors"),
            EditStatus::Owner => write!(f, "owner"),
        }
    }
}

/// Who may see a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    /// Listed and viewable by everyone
    Public = 1,
    /// Viewable by anyone with the link, not listed
    Open = 2,
    /// Owner and editors only
    Private = 3,
}

impl Default for ShareStatus {
    fn default() -> Self {
        ShareStatus::Public
    }
}

impl ShareStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for ShareStatus {
    type Error = InvalidStatus;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ShareStatus::Public),
            2 => Ok(ShareStatus::Open),
            3 => Ok(ShareStatus::Private),
            _ => Err(InvalidStatus {
                kind: "share status",
                value,
            }),
        }
    }
}

impl std::fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareStatus::Public => write!(f, "public"),
            ShareStatus::Open => write!(f, "open"),
            ShareStatus::Private => write!(f, "private"),
        }
    }
}
