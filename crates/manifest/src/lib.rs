//! Remote repository manifest and hub metadata API client.
//!
//! A [`Repository`] is the immutable, flattened description of a model or
//! dataset on the hub: its identity, last-modified timestamp and every file
//! entry with its authoritative size. Large objects additionally carry the
//! SHA-256 of their content.
//!
//! The [`Client`] fetches manifests, resolves the final transfer location of
//! a file (following the large-object redirect by hand) and opens plain or
//! ranged content requests with bearer authentication.

pub mod client;
pub mod error;
pub mod types;

pub use client::Client;
pub use error::ApiError;
pub use types::{EntryKind, RemoteFile, RepoKind, RepoRef, Repository};
