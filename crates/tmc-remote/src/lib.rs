//! Remote Thing Model repositories.
//!
//! [`HttpRepo`] reads a catalog directory published on a plain web server
//! (read-only, index cached on disk). [`PeerRepo`] talks to another tmc
//! server over its REST API and supports the full repository contract except
//! integrity checks.

pub mod cache;
pub mod client;
pub mod config;
pub mod http;
pub mod peer;

pub use cache::{HttpCache, DEFAULT_MAX_AGE};
pub use client::{HttpClient, HttpResponse, Method};
pub use config::{Auth, RemoteConfig, ID_PLACEHOLDER};
pub use http::HttpRepo;
pub use peer::PeerRepo;
