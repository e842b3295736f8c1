//! chartdeck-insight: read-side analyses for reporting endpoints.
//!
//! # Components
//!
//! - **`version`**: tag canonicalization into comparable integers
//! - **`cache`**: concurrent cache with TTL and capacity policy
//! - **`upgrade`**: upgrade detection for running services, single or bulk
//! - **`graph`**: recursive chart dependency graphs

pub mod cache;
pub mod error;
pub mod graph;
pub mod upgrade;
pub mod version;

pub use cache::{CachePolicy, CacheStats, PolicyCache};
pub use error::{InsightError, InsightResult};
pub use graph::{DependencyGraph, DependencyGraphBuilder, Link};
pub use upgrade::{UpgradeDetector, UpgradeQuery, UpgradeReport};
pub use version::{canonicalize, canonicalize_failures};
