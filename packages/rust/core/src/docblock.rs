//! Documentation block files.
//!
//! Each model gets `<docs_dir>/<block_name>.md` holding a single
//! `{% docs <block_name> %}` block with the three generated sections.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use docgen_shared::{DocBlockName, DocgenError, GenerationResult, Result, SectionKind};

/// Render the block file content. Deterministic for a given name and result.
pub fn render_doc_block(name: &DocBlockName, result: &GenerationResult) -> String {
    let sections: Vec<String> = SectionKind::ALL
        .into_iter()
        .map(|kind| format!("## {}\n\n{}", kind.heading(), result.section(kind)))
        .collect();

    format!("{{% docs {name} %}}\n{}\n{{% enddocs %}}\n", sections.join("\n\n"))
}

/// Writes documentation block files into one directory.
#[derive(Debug, Clone)]
pub struct DocBlockWriter {
    docs_dir: PathBuf,
}

impl DocBlockWriter {
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
        }
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    /// Target path for a block.
    pub fn path_for(&self, name: &DocBlockName) -> PathBuf {
        self.docs_dir.join(name.file_name())
    }

    /// Write (or overwrite) the block file atomically: temp file, then rename.
    #[instrument(skip_all, fields(block = %name))]
    pub fn write(&self, name: &DocBlockName, result: &GenerationResult) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.docs_dir).map_err(|e| DocgenError::write(&self.docs_dir, e))?;

        let target = self.path_for(name);
        let content = render_doc_block(name, result);

        if std::fs::read_to_string(&target).is_ok_and(|existing| existing == content) {
            debug!(path = %target.display(), "doc block unchanged");
            return Ok(target);
        }

        let temp = self.docs_dir.join(format!(".{}.tmp", name.file_name()));
        std::fs::write(&temp, &content).map_err(|e| DocgenError::write(&target, e))?;
        if let Err(e) = std::fs::rename(&temp, &target) {
            let _ = std::fs::remove_file(&temp);
            return Err(DocgenError::write(&target, e));
        }

        debug!(path = %target.display(), bytes = content.len(), "wrote doc block");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("docgen-docblock-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn result() -> GenerationResult {
        GenerationResult::new(
            "Predicts customer value.",
            "Sums order amounts.",
            "| Column Name | Data Type |\n|---|---|\n| customer_id | integer |",
        )
        .unwrap()
    }

    #[test]
    fn renders_named_block_with_three_sections() {
        let name = DocBlockName::for_model("customer_lifetime_value");
        let content = render_doc_block(&name, &result());

        assert!(content.starts_with("{% docs customer_lifetime_value_doc %}\n## Business Overview\n\nPredicts customer value.\n\n"));
        assert!(content.contains("## Technical Implementation\n\nSums order amounts.\n\n## Data Dictionary\n\n| Column Name |"));
        assert!(content.ends_with("| customer_id | integer |\n{% enddocs %}\n"));
        assert_eq!(content.matches("{% docs ").count(), 1);
    }

    #[test]
    fn write_is_idempotent() {
        let dir = temp_dir();
        let writer = DocBlockWriter::new(dir.join("docs"));
        let name = DocBlockName::for_model("customer_lifetime_value");

        let path = writer.write(&name, &result()).unwrap();
        assert_eq!(path, dir.join("docs/customer_lifetime_value_doc.md"));
        let first = std::fs::read_to_string(&path).unwrap();

        writer.write(&name, &result()).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);

        let leftovers: Vec<_> = std::fs::read_dir(dir.join("docs"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn overwrite_replaces_previous_content() {
        let dir = temp_dir();
        let writer = DocBlockWriter::new(&dir);
        let name = DocBlockName::for_model("orders");

        writer.write(&name, &result()).unwrap();
        let updated = GenerationResult::new("New overview.", "New impl.", "New table.").unwrap();
        let path = writer.write(&name, &updated).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("New overview."));
        assert!(!content.contains("Predicts customer value."));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unwritable_directory_is_write_error() {
        let dir = temp_dir();
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let writer = DocBlockWriter::new(blocker.join("docs"));
        let err = writer.write(&DocBlockName::for_model("orders"), &result()).unwrap_err();
        assert!(matches!(err, DocgenError::Write { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }
}
