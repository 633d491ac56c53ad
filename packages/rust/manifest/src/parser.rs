//! Parser for dbt's `manifest.json`.
//!
//! Only the fields needed for documentation are modelled; everything else in
//! the artifact is ignored so newer manifest versions keep loading.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde_json::Value;
use tracing::{debug, warn};

use docgen_shared::{ColumnInfo, DocgenError, ModelInfo, ResourceType, Result};

/// Materialization assumed when a node's config does not name one.
const DEFAULT_MATERIALIZATION: &str = "table";

// ---------------------------------------------------------------------------
// Raw manifest structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawManifest {
    /// Node entries in file order, duplicates included.
    #[serde(deserialize_with = "nodes_in_file_order")]
    nodes: Vec<(String, Value)>,
}

#[derive(Debug, Deserialize)]
struct RawModelNode {
    unique_id: Option<String>,
    name: Option<String>,
    patch_path: Option<String>,
    #[serde(default)]
    columns: serde_json::Map<String, Value>,
    compiled_code: Option<String>,
    compiled_sql: Option<String>,
    raw_code: Option<String>,
    raw_sql: Option<String>,
    #[serde(default)]
    config: RawConfig,
    #[serde(default)]
    depends_on: RawDependsOn,
    #[serde(default)]
    tags: Vec<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    materialized: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDependsOn {
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: Option<String>,
    data_type: Option<String>,
    description: Option<String>,
}

/// Collect the `nodes` object as an ordered list of entries.
///
/// A plain map would silently keep the last of two identical keys; the
/// loader needs to see both to keep the first and warn.
fn nodes_in_file_order<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, Value)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NodesVisitor;

    impl<'de> Visitor<'de> for NodesVisitor {
        type Value = Vec<(String, Value)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object of manifest nodes keyed by unique id")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, Value>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(NodesVisitor)
}

// ---------------------------------------------------------------------------
// Public parser
// ---------------------------------------------------------------------------

/// Parse manifest JSON into model entries, in file order, deduplicated by unique id.
pub fn parse_manifest(content: &str) -> Result<Vec<ModelInfo>> {
    let manifest: RawManifest = serde_json::from_str(content)
        .map_err(|e| DocgenError::malformed(format!("invalid manifest JSON: {e}")))?;

    let mut seen = HashSet::new();
    let mut models = Vec::new();

    for (key, node) in manifest.nodes {
        let resource_type = node
            .get("resource_type")
            .and_then(Value::as_str)
            .map(ResourceType::from)
            .unwrap_or(ResourceType::Other);

        if resource_type != ResourceType::Model {
            continue;
        }

        let model = model_from_node(&key, node)?;

        if !seen.insert(model.unique_id.clone()) {
            warn!(unique_id = %model.unique_id, "duplicate manifest entry, keeping the first occurrence");
            continue;
        }

        debug!(unique_id = %model.unique_id, columns = model.columns.len(), "parsed model node");
        models.push(model);
    }

    Ok(models)
}

/// Convert one raw model node, enforcing the required fields.
fn model_from_node(key: &str, node: Value) -> Result<ModelInfo> {
    let raw: RawModelNode = serde_json::from_value(node)
        .map_err(|e| DocgenError::malformed(format!("node '{key}': {e}")))?;

    let unique_id = required(key, "unique_id", raw.unique_id)?;
    let name = required(key, "name", raw.name)?;
    let patch_path = required(key, "patch_path", raw.patch_path)?;

    let mut columns = Vec::with_capacity(raw.columns.len());
    for (column_key, column) in raw.columns {
        let column: RawColumn = serde_json::from_value(column).map_err(|e| {
            DocgenError::malformed(format!("node '{key}', column '{column_key}': {e}"))
        })?;
        columns.push(ColumnInfo {
            name: column.name.filter(|n| !n.is_empty()).unwrap_or(column_key),
            data_type: non_empty(column.data_type),
            description: non_empty(column.description),
        });
    }

    let logic = raw
        .compiled_code
        .or(raw.compiled_sql)
        .or(raw.raw_code)
        .or(raw.raw_sql)
        .unwrap_or_default();

    Ok(ModelInfo {
        unique_id,
        name,
        resource_type: ResourceType::Model,
        schema_file_path: strip_package_prefix(&patch_path),
        columns,
        logic,
        materialization: raw
            .config
            .materialized
            .unwrap_or_else(|| DEFAULT_MATERIALIZATION.to_string()),
        depends_on: raw.depends_on.nodes,
        tags: raw.tags,
        description: raw.description.unwrap_or_default(),
    })
}

fn required(key: &str, field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DocgenError::malformed(format!(
            "model node '{key}' is missing required field '{field}'"
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `shop://models/schema.yml` → `models/schema.yml`.
fn strip_package_prefix(patch_path: &str) -> PathBuf {
    let relative = patch_path
        .split_once("://")
        .map_or(patch_path, |(_, rest)| rest);
    PathBuf::from(relative)
}
