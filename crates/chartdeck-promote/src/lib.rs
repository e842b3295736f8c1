//! chartdeck-promote: moving one environment's state onto another.
//!
//! # Components
//!
//! - **`diff`**: variable comparison between two environments
//! - **`plan`**: release-label grammar and purge/deploy planning
//! - **`promoter`**: variable copy plus the detached release phase

pub mod diff;
pub mod error;
pub mod plan;
pub mod promoter;

pub use diff::{VariableDiff, compare};
pub use error::{PromoteError, PromoteResult};
pub use plan::{ChartLabel, DeployItem, PromotionPlan, PurgeItem, parse_chart_label, strip_namespace_suffix};
pub use promoter::{PromotionHandle, PromotionMode, PromotionReport, Promoter};
