//! chartdeck-backend: the collaborators the orchestration core talks to.
//!
//! The core never executes deployments itself. It hands [`DeploymentUnit`]s
//! to a [`ChartBackend`] (a cluster package manager), reads image tags from
//! an [`ImageRegistry`], and moves work through message channels.
//!
//! # Components
//!
//! - **`types`**: deployment units, release listings, wire messages
//! - **`kubeconfig`**: per-environment credential documents
//! - **`backend`**: the [`ChartBackend`] trait and the template-fetch gate
//! - **`registry`**: image registry and service → image lookup traits
//! - **`transport`**: dispatch publishing over tokio channels
//! - **`executor`**: consumes dispatch messages, emits completions
//! - **`helm`** / **`crane`**: CLI-backed production implementations

pub mod backend;
pub mod crane;
pub mod error;
pub mod executor;
pub mod helm;
pub mod kubeconfig;
pub mod registry;
pub mod transport;
pub mod types;

pub use backend::{ChartBackend, TemplateGate};
pub use crane::CraneRegistry;
pub use error::{BackendError, BackendResult};
pub use executor::BackendExecutor;
pub use helm::HelmCli;
pub use kubeconfig::Kubeconfig;
pub use registry::{ImageRegistry, ServiceImageLookup, StaticImageLookup};
pub use transport::{ChannelTransport, DispatchPublisher, completion_channel, dispatch_channel};
pub use types::*;
