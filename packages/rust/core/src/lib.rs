//! Core pipeline orchestration for dbt-docgen.
//!
//! This crate ties together manifest loading, generation, doc block writing
//! and schema file updates into the end-to-end `generate` workflow.

pub mod docblock;
pub mod pipeline;
pub mod schema;

pub use docblock::{DocBlockWriter, render_doc_block};
pub use pipeline::{
    ModelOutcome, ModelStatus, PipelineConfig, ProgressReporter, RunSummary, SilentProgress,
    run_pipeline,
};
pub use schema::{
    EntryOutcome, PreparedUpdate, SchemaEntry, SchemaUpdateRecord, SchemaUpdateReport,
    SchemaUpdater,
};
