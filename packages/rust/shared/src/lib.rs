//! Shared types, error model, and configuration for dbt-docgen.
//!
//! This crate is the foundation depended on by all other docgen crates.
//! It provides:
//! - [`DocgenError`]: the unified error type and its [`FailureKind`] taxonomy
//! - Domain types ([`ModelInfo`], [`ColumnInfo`], [`GenerationResult`], [`DocBlockName`])
//! - Configuration ([`AppConfig`], [`GenerationConfig`], [`ProviderConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DescriptionPolicy, GenerationConfig, GenerationSection, OutputSection,
    ProviderConfig, ProviderKind, ProviderSection, config_dir, find_config_file, init_config,
    load_config, load_config_from, resolve_api_key,
};
pub use error::{DocgenError, FailureKind, Result};
pub use types::{
    ColumnInfo, DocBlockName, GenerationResult, ModelInfo, ResourceType, SectionKind,
    doc_reference, sanitize_identifier,
};
