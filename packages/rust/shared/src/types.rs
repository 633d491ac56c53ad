//! Core domain types for documentation generation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DocgenError, Result};

// ---------------------------------------------------------------------------
// ModelInfo
// ---------------------------------------------------------------------------

/// Resource type of a manifest node. Only `Model` entries are documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Model,
    Other,
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        if value == "model" {
            Self::Model
        } else {
            Self::Other
        }
    }
}

/// One declared column of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, if the project declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Existing hand-written or generated description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One transformation unit extracted from the manifest. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Globally unique node id (e.g. `model.shop.customer_lifetime_value`).
    pub unique_id: String,
    /// Human-readable model name.
    pub name: String,
    pub resource_type: ResourceType,
    /// Schema descriptor path relative to the project root.
    pub schema_file_path: PathBuf,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// Compiled SQL when available, raw SQL otherwise.
    pub logic: String,
    pub materialization: String,
    /// Upstream node ids.
    pub depends_on: Vec<String>,
    pub tags: Vec<String>,
    /// Existing model-level description from the manifest.
    pub description: String,
}

impl ModelInfo {
    /// Deterministic documentation-block name for this model.
    pub fn doc_block_name(&self) -> DocBlockName {
        DocBlockName::for_model(&self.name)
    }

    /// Short names of upstream dependencies (last `.` segment of each id).
    pub fn dependency_names(&self) -> Vec<&str> {
        self.depends_on
            .iter()
            .map(|dep| dep.rsplit('.').next().unwrap_or(dep.as_str()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Doc block naming
// ---------------------------------------------------------------------------

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_identifier(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// Name of a documentation block, always `<sanitized model name>_doc`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocBlockName(String);

impl DocBlockName {
    pub fn for_model(model_name: &str) -> Self {
        Self(format!("{}_doc", sanitize_identifier(model_name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the block inside the docs directory.
    pub fn file_name(&self) -> String {
        format!("{}.md", self.0)
    }

    /// The Jinja expression schema files use to reference this block.
    pub fn reference(&self) -> String {
        doc_reference(&self.0)
    }
}

impl std::fmt::Display for DocBlockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{{ doc('<name>') }}` for a block name.
pub fn doc_reference(block_name: &str) -> String {
    format!("{{{{ doc('{block_name}') }}}}")
}

// ---------------------------------------------------------------------------
// GenerationResult
// ---------------------------------------------------------------------------

/// The three sections every generated document must contain, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    BusinessOverview,
    TechnicalImplementation,
    DataDictionary,
}

impl SectionKind {
    pub const ALL: [Self; 3] = [
        Self::BusinessOverview,
        Self::TechnicalImplementation,
        Self::DataDictionary,
    ];

    /// Heading text used both in prompts and in written blocks.
    pub fn heading(&self) -> &'static str {
        match self {
            Self::BusinessOverview => "Business Overview",
            Self::TechnicalImplementation => "Technical Implementation",
            Self::DataDictionary => "Data Dictionary",
        }
    }
}

/// Validated output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub business_overview: String,
    pub technical_implementation: String,
    pub data_dictionary: String,
}

impl GenerationResult {
    /// Build a result, rejecting any section that is empty after trimming.
    pub fn new(
        business_overview: impl Into<String>,
        technical_implementation: impl Into<String>,
        data_dictionary: impl Into<String>,
    ) -> Result<Self> {
        let result = Self {
            business_overview: business_overview.into().trim().to_string(),
            technical_implementation: technical_implementation.into().trim().to_string(),
            data_dictionary: data_dictionary.into().trim().to_string(),
        };

        for kind in SectionKind::ALL {
            if result.section(kind).is_empty() {
                return Err(DocgenError::invalid(format!(
                    "section '{}' is empty",
                    kind.heading()
                )));
            }
        }

        Ok(result)
    }

    pub fn section(&self, kind: SectionKind) -> &str {
        match kind {
            SectionKind::BusinessOverview => &self.business_overview,
            SectionKind::TechnicalImplementation => &self.technical_implementation,
            SectionKind::DataDictionary => &self.data_dictionary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_identifier("customer_lifetime_value"), "customer_lifetime_value");
        assert_eq!(sanitize_identifier("stg-orders.v2"), "stg_orders_v2");
        assert_eq!(sanitize_identifier("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_identifier(""), "unnamed");
    }

    #[test]
    fn doc_block_name_and_reference() {
        let name = DocBlockName::for_model("customer_lifetime_value");
        assert_eq!(name.as_str(), "customer_lifetime_value_doc");
        assert_eq!(name.file_name(), "customer_lifetime_value_doc.md");
        assert_eq!(name.reference(), "{{ doc('customer_lifetime_value_doc') }}");
    }

    #[test]
    fn generation_result_rejects_blank_sections() {
        let err = GenerationResult::new("overview", "  \n ", "table").unwrap_err();
        assert!(err.to_string().contains("Technical Implementation"));

        let ok = GenerationResult::new(" overview\n", "impl", "table").unwrap();
        assert_eq!(ok.business_overview, "overview");
    }

    #[test]
    fn resource_type_from_str() {
        assert_eq!(ResourceType::from("model"), ResourceType::Model);
        assert_eq!(ResourceType::from("seed"), ResourceType::Other);
    }

    #[test]
    fn dependency_short_names() {
        let model = ModelInfo {
            unique_id: "model.shop.clv".into(),
            name: "clv".into(),
            resource_type: ResourceType::Model,
            schema_file_path: "models/schema.yml".into(),
            columns: vec![],
            logic: String::new(),
            materialization: "table".into(),
            depends_on: vec!["model.shop.stg_orders".into(), "source.shop.raw.customers".into()],
            tags: vec![],
            description: String::new(),
        };
        assert_eq!(model.dependency_names(), vec!["stg_orders", "customers"]);
    }
}
