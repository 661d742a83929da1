//! Core library for the nourish nutrition tracker: domain models, the
//! file-backed store with schema migrations, live queries, the repository
//! layer, the chat message cipher, and the remote profile-store contract.

pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod profile;
pub mod repository;

pub use context::AppContext;
pub use error::{Result, StoreError};
