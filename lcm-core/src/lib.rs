//! Types and client-less behavior shared by the lcm metadata server
//!
//! Nothing in this crate performs I/O. It holds the data model that the
//! backend adapters in `lcm-client` speak, and the pure halves of the engine:
//!
//! - [`registry`] decides which registries need pull secrets and builds them
//! - [`iam`] models IAM policies and the principals workload identity uses
//! - [`token`] holds minted credentials and their wire format
//! - [`metadata`] holds metadata protocol constants and pod rewiring targets
//! - [`patch`] builds idempotent JSON patches against a pod spec
#![deny(unsafe_code)]

pub mod iam;
pub mod metadata;
pub mod patch;
pub mod registry;
pub mod token;

pub use iam::{Binding, Policy, Project};
pub use metadata::{MetadataType, Rewiring};
pub use patch::{ContainerKind, PodPatch};
pub use token::{AccessToken, TokenResponse};
