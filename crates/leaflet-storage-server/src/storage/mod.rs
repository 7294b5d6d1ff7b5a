//! Storage layer
//!
//! SQLite (embedded) for maps, datalayers, users and the catalogue.
//! DashMap (in-memory) for per-datalayer write locks.

pub mod db;
pub mod locks;

pub use db::Database;
pub use locks::DataLayerLocks;
