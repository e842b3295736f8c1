//! chartdeck-dispatch: batch deployment dispatch and outcome tracking.
//!
//! ```text
//! Dispatcher::dispatch(user, units)
//!   ├── RequestDeployment (1 row)
//!   ├── Deployment children (N rows, processed = false)
//!   └── DispatchPublisher::publish ──▶ backend executor
//!                                          │
//! DeploymentTracker::run ◀── CompletionMessage
//!   ├── settle the child
//!   └── reconcile the parent from persisted children
//! ```

pub mod dispatcher;
pub mod error;
pub mod tracker;

pub use dispatcher::{DeploymentRequest, Dispatcher};
pub use error::{DispatchError, DispatchResult};
pub use tracker::{DeploymentTracker, TrackerStats, reconcile_request};
