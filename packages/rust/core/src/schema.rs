//! Schema file (`schema.yml`) description updates.
//!
//! All models declared in one file are updated in a single read-modify-write.
//! The file is fingerprinted when read and re-checked just before the rename,
//! so a concurrent edit aborts the update instead of being lost.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use docgen_shared::{DescriptionPolicy, DocBlockName, DocgenError, Result};

/// One model whose entry should reference its doc block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub unique_id: String,
    pub model_name: String,
    pub block: DocBlockName,
}

/// Every pending reference for a single schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaUpdateRecord {
    pub path: PathBuf,
    pub entries: Vec<SchemaEntry>,
}

/// What happened to one model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The description now references the doc block.
    Updated,
    /// The reference was already in place.
    AlreadyCurrent,
    /// A hand-written description was kept under `skip-if-present`.
    KeptExisting,
    /// No entry in `models:` has this name.
    Missing,
}

/// Result of applying one [`SchemaUpdateRecord`].
#[derive(Debug, Clone)]
pub struct SchemaUpdateReport {
    pub path: PathBuf,
    /// Keyed by model `unique_id`.
    pub outcomes: BTreeMap<String, EntryOutcome>,
    /// Whether the file on disk was replaced.
    pub rewritten: bool,
}

/// Read and mutated, not yet written.
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    path: PathBuf,
    fingerprint: String,
    new_content: Option<String>,
    outcomes: BTreeMap<String, EntryOutcome>,
}

impl PreparedUpdate {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outcomes(&self) -> &BTreeMap<String, EntryOutcome> {
        &self.outcomes
    }

    pub fn needs_write(&self) -> bool {
        self.new_content.is_some()
    }

    /// Re-fingerprint the file and, if unchanged since `prepare`, replace it atomically.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn commit(self) -> Result<SchemaUpdateReport> {
        let Some(content) = self.new_content else {
            debug!("schema file already current");
            return Ok(SchemaUpdateReport {
                path: self.path,
                outcomes: self.outcomes,
                rewritten: false,
            });
        };

        let current = std::fs::read(&self.path).map_err(|e| DocgenError::write(&self.path, e))?;
        if fingerprint(&current) != self.fingerprint {
            warn!("schema file changed since it was read");
            return Err(DocgenError::SchemaConflict { path: self.path });
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "schema.yml".to_string());
        let temp = self.path.with_file_name(format!(".{file_name}.docgen.tmp"));

        std::fs::write(&temp, &content).map_err(|e| DocgenError::write(&self.path, e))?;
        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(DocgenError::write(&self.path, e));
        }

        info!(
            updated = self
                .outcomes
                .values()
                .filter(|o| **o == EntryOutcome::Updated)
                .count(),
            "schema file rewritten"
        );

        Ok(SchemaUpdateReport {
            path: self.path,
            outcomes: self.outcomes,
            rewritten: true,
        })
    }
}

/// Applies doc block references to schema files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaUpdater {
    policy: DescriptionPolicy,
}

impl SchemaUpdater {
    pub fn new(policy: DescriptionPolicy) -> Self {
        Self { policy }
    }

    /// Read, fingerprint and mutate in memory. Nothing is written.
    #[instrument(skip_all, fields(path = %record.path.display(), entries = record.entries.len()))]
    pub fn prepare(&self, record: &SchemaUpdateRecord) -> Result<PreparedUpdate> {
        let path = &record.path;
        let bytes = std::fs::read(path).map_err(|e| DocgenError::SchemaMalformed {
            path: path.clone(),
            message: format!("cannot read schema file: {e}"),
        })?;
        let fingerprint = fingerprint(&bytes);

        let text = String::from_utf8(bytes).map_err(|_| malformed(path, "not valid UTF-8"))?;
        let mut document: Value = serde_yaml::from_str(&text)
            .map_err(|e| malformed(path, format!("invalid YAML: {e}")))?;

        let root = document
            .as_mapping_mut()
            .ok_or_else(|| malformed(path, "top level is not a mapping"))?;

        let mut empty = Vec::new();
        let models = match root.get_mut("models") {
            Some(Value::Sequence(models)) => models,
            Some(Value::Null) | None => &mut empty,
            Some(_) => return Err(malformed(path, "`models` is not a list")),
        };

        let mut outcomes = BTreeMap::new();
        for entry in &record.entries {
            let outcome = match find_model(models, &entry.model_name) {
                Some(model) => self.apply_entry(model, &entry.block),
                None => {
                    warn!(model = %entry.model_name, "model not declared in schema file");
                    EntryOutcome::Missing
                }
            };
            outcomes.insert(entry.unique_id.clone(), outcome);
        }

        let new_content = if outcomes.values().any(|o| *o == EntryOutcome::Updated) {
            let rendered = serde_yaml::to_string(&document)
                .map_err(|e| DocgenError::write(path, format!("cannot serialize YAML: {e}")))?;
            (rendered != text).then_some(rendered)
        } else {
            None
        };

        Ok(PreparedUpdate {
            path: path.clone(),
            fingerprint,
            new_content,
            outcomes,
        })
    }

    /// `prepare` followed by `commit`.
    pub fn apply(&self, record: &SchemaUpdateRecord) -> Result<SchemaUpdateReport> {
        self.prepare(record)?.commit()
    }

    fn apply_entry(&self, model: &mut Mapping, block: &DocBlockName) -> EntryOutcome {
        let reference = block.reference();
        let existing = model
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        if existing == reference {
            return EntryOutcome::AlreadyCurrent;
        }
        if !existing.is_empty() && self.policy == DescriptionPolicy::SkipIfPresent {
            return EntryOutcome::KeptExisting;
        }

        model.insert(Value::from("description"), Value::from(reference));
        EntryOutcome::Updated
    }
}

/// First `models:` entry whose `name` matches.
fn find_model<'a>(models: &'a mut [Value], name: &str) -> Option<&'a mut Mapping> {
    models
        .iter_mut()
        .filter_map(Value::as_mapping_mut)
        .find(|m| m.get("name").and_then(Value::as_str) == Some(name))
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn malformed(path: &Path, message: impl Into<String>) -> DocgenError {
    DocgenError::SchemaMalformed {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "\
version: 2
models:
  - name: customer_lifetime_value
    description: ''
    config:
      tags: [finance]
    columns:
      - name: customer_id
        tests: [unique, not_null]
      - name: clv_12_months
  - name: orders
    description: Hand-written order facts.
  - name: untouched
    meta:
      owner: analytics
sources:
  - name: raw
    tables:
      - name: payments
";

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("docgen-schema-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_schema(content: &str) -> (PathBuf, PathBuf) {
        let dir = temp_dir();
        let path = dir.join("schema.yml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn entry(name: &str) -> SchemaEntry {
        SchemaEntry {
            unique_id: format!("model.shop.{name}"),
            model_name: name.to_string(),
            block: DocBlockName::for_model(name),
        }
    }

    fn record(path: &Path, names: &[&str]) -> SchemaUpdateRecord {
        SchemaUpdateRecord {
            path: path.to_path_buf(),
            entries: names.iter().map(|n| entry(n)).collect(),
        }
    }

    fn model<'a>(doc: &'a Value, name: &str) -> &'a Value {
        doc["models"]
            .as_sequence()
            .unwrap()
            .iter()
            .find(|m| m["name"].as_str() == Some(name))
            .unwrap()
    }

    #[test]
    fn updates_descriptions_and_preserves_other_content() {
        let (dir, path) = write_schema(SCHEMA);
        let report = SchemaUpdater::default()
            .apply(&record(&path, &["customer_lifetime_value", "orders"]))
            .unwrap();

        assert!(report.rewritten);
        assert_eq!(report.outcomes["model.shop.customer_lifetime_value"], EntryOutcome::Updated);
        assert_eq!(report.outcomes["model.shop.orders"], EntryOutcome::Updated);

        let before: Value = serde_yaml::from_str(SCHEMA).unwrap();
        let after: Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(
            model(&after, "customer_lifetime_value")["description"].as_str(),
            Some("{{ doc('customer_lifetime_value_doc') }}")
        );
        assert_eq!(
            model(&after, "orders")["description"].as_str(),
            Some("{{ doc('orders_doc') }}")
        );
        assert_eq!(
            model(&after, "customer_lifetime_value")["columns"],
            model(&before, "customer_lifetime_value")["columns"]
        );
        assert_eq!(model(&after, "untouched"), model(&before, "untouched"));
        assert_eq!(after["sources"], before["sources"]);
        assert_eq!(after["version"], before["version"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let (dir, path) = write_schema(SCHEMA);
        let updater = SchemaUpdater::default();
        let rec = record(&path, &["customer_lifetime_value"]);

        updater.apply(&rec).unwrap();
        let once = std::fs::read_to_string(&path).unwrap();

        let report = updater.apply(&rec).unwrap();
        let twice = std::fs::read_to_string(&path).unwrap();

        assert!(!report.rewritten);
        assert_eq!(report.outcomes["model.shop.customer_lifetime_value"], EntryOutcome::AlreadyCurrent);
        assert_eq!(once, twice);
        assert_eq!(twice.matches("customer_lifetime_value_doc").count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn concurrent_edit_is_a_conflict_and_file_is_untouched() {
        let (dir, path) = write_schema(SCHEMA);
        let prepared = SchemaUpdater::default()
            .prepare(&record(&path, &["customer_lifetime_value"]))
            .unwrap();
        assert!(prepared.needs_write());

        let edited = format!("{SCHEMA}# edited by someone else\n");
        std::fs::write(&path, &edited).unwrap();

        let err = prepared.commit().unwrap_err();
        assert!(matches!(err, DocgenError::SchemaConflict { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), edited);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn skip_if_present_keeps_hand_written_description() {
        let (dir, path) = write_schema(SCHEMA);
        let report = SchemaUpdater::new(DescriptionPolicy::SkipIfPresent)
            .apply(&record(&path, &["orders", "customer_lifetime_value"]))
            .unwrap();

        assert_eq!(report.outcomes["model.shop.orders"], EntryOutcome::KeptExisting);
        assert_eq!(report.outcomes["model.shop.customer_lifetime_value"], EntryOutcome::Updated);

        let after: Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            model(&after, "orders")["description"].as_str(),
            Some("Hand-written order facts.")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn nothing_to_change_leaves_file_bytes_alone() {
        let (dir, path) = write_schema(SCHEMA);
        let report = SchemaUpdater::new(DescriptionPolicy::SkipIfPresent)
            .apply(&record(&path, &["orders"]))
            .unwrap();

        assert!(!report.rewritten);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SCHEMA);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_model_entry_is_reported() {
        let (dir, path) = write_schema(SCHEMA);
        let report = SchemaUpdater::default()
            .apply(&record(&path, &["ghost", "orders"]))
            .unwrap();

        assert_eq!(report.outcomes["model.shop.ghost"], EntryOutcome::Missing);
        assert_eq!(report.outcomes["model.shop.orders"], EntryOutcome::Updated);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unparseable_file_is_malformed() {
        let (dir, path) = write_schema("models: [unclosed\n");
        let err = SchemaUpdater::default()
            .apply(&record(&path, &["orders"]))
            .unwrap_err();
        assert!(matches!(err, DocgenError::SchemaMalformed { .. }));

        let (dir2, path2) = write_schema("models: 3\n");
        let err = SchemaUpdater::default()
            .apply(&record(&path2, &["orders"]))
            .unwrap_err();
        assert!(err.to_string().contains("not a list"));

        std::fs::remove_dir_all(&dir).ok();
        std::fs::remove_dir_all(&dir2).ok();
    }

    #[test]
    fn missing_file_is_malformed() {
        let dir = temp_dir();
        let err = SchemaUpdater::default()
            .apply(&record(&dir.join("absent.yml"), &["orders"]))
            .unwrap_err();
        assert!(matches!(err, DocgenError::SchemaMalformed { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }
}
