//! chartdeck-state: embedded state store for the deployment portal.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for environments, configuration variables, deployment batches
//! (`RequestDeployment`) with their per-unit children (`Deployment`), and
//! chart release metadata used for dependency analysis.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Numeric ids come from a per-table sequence and are zero-padded in keys so
//! that iteration order matches creation order. Variables use the composite
//! key `{environment_id}:{scope_len}:{scope}:{name}`, which makes writes
//! upserts on the `(environment, scope, name)` triple. The scope is length
//! prefixed so a `:` inside it cannot make two triples collide. Batch children
//! are indexed by `{request_id}:{deployment_id}` so reconciling a batch reads
//! only its own rows.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
