//! Business logic services

pub mod auth;
pub mod datalayers;
pub mod maps;

pub use auth::AuthService;
pub use datalayers::DataLayerService;
pub use maps::{Access, MapService};
