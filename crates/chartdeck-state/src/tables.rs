//! redb table definitions for the chartdeck state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Numeric ids are rendered with [`id_key`] so lexical order equals
//! numeric order.

use redb::TableDefinition;

/// Shape shared by every JSON record table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Environments keyed by zero-padded id.
pub const ENVIRONMENTS: JsonTable = TableDefinition::new("environments");

/// Variables keyed by `{environment_id}:{scope_len}:{scope}:{name}`.
pub const VARIABLES: JsonTable = TableDefinition::new("variables");

/// Deployment batches keyed by zero-padded id.
pub const REQUESTS: JsonTable = TableDefinition::new("requests");

/// Per-unit deployment records keyed by zero-padded id.
pub const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");

/// Index of a batch's children: `{request_id}:{deployment_id}` → deployment id.
pub const REQUEST_CHILDREN: TableDefinition<&str, u64> = TableDefinition::new("request_children");

/// Chart release metadata keyed by `{chart_len}:{chart}:{version}`.
pub const CHART_RELEASES: JsonTable = TableDefinition::new("chart_releases");

/// Id sequences keyed by table name; the value is the last issued id.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Render a numeric id as a fixed-width key.
pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}

/// Prefix a free-form key part with its byte length.
///
/// Keeps composite keys unambiguous when a part contains the separator.
pub fn length_prefixed(part: &str) -> String {
    format!("{}:{part}", part.len())
}
