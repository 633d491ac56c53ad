//! dbt project discovery and manifest loading.
//!
//! Locates the dbt project that contains the working directory, resolves the
//! `manifest.json` produced by `dbt compile`, and extracts the model nodes
//! that documentation is generated for.

mod parser;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, instrument};

use docgen_shared::{DocgenError, ModelInfo, Result};

pub use parser::parse_manifest;

/// File that marks the root of a dbt project.
const PROJECT_FILE: &str = "dbt_project.yml";

/// Target directory used when `dbt_project.yml` does not set `target-path`.
const DEFAULT_TARGET_PATH: &str = "target";

/// Artifact file name inside the target directory.
const MANIFEST_FILE: &str = "manifest.json";

// ---------------------------------------------------------------------------
// Project discovery
// ---------------------------------------------------------------------------

/// Subset of `dbt_project.yml` the tool reads.
#[derive(Debug, Deserialize)]
struct DbtProject {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "target-path", default)]
    target_path: Option<String>,
}

/// Walk from `start` up through its ancestors to the first directory holding `dbt_project.yml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        if dir.join(PROJECT_FILE).is_file() {
            info!(path = %dir.display(), "found dbt project");
            return Ok(dir.to_path_buf());
        }
    }

    Err(DocgenError::config(format!(
        "{PROJECT_FILE} not found in {} or any parent directory; run inside a dbt project",
        start.display()
    )))
}

/// Resolve `<root>/<target-path>/manifest.json` from the project file.
pub fn resolve_manifest_path(project_root: &Path) -> Result<PathBuf> {
    let project_file = project_root.join(PROJECT_FILE);
    let content =
        std::fs::read_to_string(&project_file).map_err(|e| DocgenError::io(&project_file, e))?;

    let project: DbtProject = serde_yaml::from_str(&content).map_err(|e| {
        DocgenError::config(format!("failed to parse {}: {e}", project_file.display()))
    })?;

    let target = project
        .target_path
        .unwrap_or_else(|| DEFAULT_TARGET_PATH.to_string());

    info!(
        project = project.name.as_deref().unwrap_or("unknown"),
        target = %target,
        "resolved target directory"
    );

    Ok(project_root.join(target).join(MANIFEST_FILE))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load every model node from the manifest at `path`, in artifact order.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_models(path: &Path) -> Result<Vec<ModelInfo>> {
    if !path.exists() {
        return Err(DocgenError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| DocgenError::io(path, e))?;
    let models = parse_manifest(&content)?;

    info!(models = models.len(), "extracted model information");
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("docgen-manifest-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn finds_project_root_from_nested_dir() {
        let root = temp_dir();
        std::fs::write(root.join("dbt_project.yml"), "name: shop\n").unwrap();
        let nested = root.join("models/marts");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested).unwrap(), root);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_project_is_config_error() {
        let root = temp_dir();
        let err = find_project_root(&root).unwrap_err();
        assert!(err.to_string().contains("dbt_project.yml"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn manifest_path_honours_target_path() {
        let root = temp_dir();
        std::fs::write(root.join("dbt_project.yml"), "name: shop\ntarget-path: build\n").unwrap();
        assert_eq!(
            resolve_manifest_path(&root).unwrap(),
            root.join("build/manifest.json")
        );

        std::fs::write(root.join("dbt_project.yml"), "name: shop\n").unwrap();
        assert_eq!(
            resolve_manifest_path(&root).unwrap(),
            root.join("target/manifest.json")
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn load_missing_manifest_is_not_found() {
        let root = temp_dir();
        let err = load_models(&root.join("target/manifest.json")).unwrap_err();
        assert!(matches!(err, DocgenError::ArtifactNotFound { .. }));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn load_reads_models_from_disk() {
        let root = temp_dir();
        let path = root.join("manifest.json");
        std::fs::write(
            &path,
            r#"{"nodes": {"model.p.a": {"unique_id": "model.p.a", "name": "a",
                "resource_type": "model", "patch_path": "p://models/a.yml"}}}"#,
        )
        .unwrap();

        let models = load_models(&path).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "a");

        let _ = std::fs::remove_dir_all(&root);
    }
}
