//! A Google compute metadata server for workloads on any Kubernetes cluster
//!
//! Pods reach the server through the address their admission patch points
//! `metadata.google.internal` at. A metadata request is answered on behalf of
//! the calling pod:
//!
//! - [`locator`] finds the pod owning the request's source address
//! - [`resolver`] maps the pod's service account to a cloud identity
//! - [`token`] mints tokens for that identity, with [`guardian`] making sure
//!   the server is allowed to
//!
//! The admission side lives in [`webhook`], which rewires new pods to the
//! server and hands them pull secrets for the managed registries.
//!
//! [`server::router`] assembles both surfaces over a shared [`server::Context`].
#![deny(unsafe_code)]

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod guardian;
pub mod locator;
pub mod metadata;
pub mod resolver;
pub mod server;
pub mod token;
pub mod webhook;

#[cfg(test)] mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{router, Context};

/// Field manager and `managed-by` label of objects this server writes.
pub const FIELD_MANAGER: &str = "lcm";
