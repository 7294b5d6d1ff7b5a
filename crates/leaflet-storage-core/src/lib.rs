//! Leaflet Storage Core Library
//!
//! Domain logic for the map storage server: permission rules, value signing,
//! the datalayer file store, geographic format conversion and the storage
//! ports the server's database implements. Nothing here knows about HTTP.

// Re-export pure types
pub use leaflet_storage_types::*;

pub mod error;
pub mod files;
pub mod geo;
pub mod permissions;
pub mod ports;
pub mod signing;
pub mod slug;

pub use error::{Result, StorageError};
pub use files::DataLayerFiles;
pub use permissions::Denied;
pub use signing::Signer;
