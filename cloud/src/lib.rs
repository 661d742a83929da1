//! HTTP implementation of the nourish profile-store contract.
//!
//! The core crate defines [`nourish_core::profile::ProfileStore`]; this
//! crate implements it with `reqwest` against the profile document
//! service, keeping all network concerns out of the core library.

pub mod client;

pub use client::HttpProfileStore;
