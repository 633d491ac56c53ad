//! Prompt construction.
//!
//! Prompts are pure functions of a [`ModelInfo`]: no clock, no randomness,
//! no I/O. Identical models always yield byte-identical prompts.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use docgen_shared::{DocgenError, ModelInfo, Result, SectionKind};

/// System message sent with every request.
pub const SYSTEM_PROMPT: &str =
    "You are a technical documentation expert specializing in data engineering and dbt.";

/// Placeholders recognised in custom templates.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(model_name|materialization|dependencies|tags|description|columns|logic)\}")
        .expect("placeholder pattern is valid")
});

/// A rendered request: system instructions plus the user message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Strategy for turning model metadata into a prompt.
pub trait PromptStrategy: Send + Sync {
    fn build(&self, model: &ModelInfo) -> Prompt;

    /// Human-readable strategy name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Built-in strategy
// ---------------------------------------------------------------------------

/// The built-in prompt layout.
#[derive(Debug, Clone)]
pub struct StandardPrompt {
    max_logic_chars: usize,
}

impl StandardPrompt {
    pub fn new(max_logic_chars: usize) -> Self {
        Self { max_logic_chars }
    }
}

impl PromptStrategy for StandardPrompt {
    fn build(&self, model: &ModelInfo) -> Prompt {
        let mut user = String::new();

        user.push_str(
            "Based on the following dbt model information from manifest.json, \
             write comprehensive documentation for the model.\n\n",
        );

        user.push_str("MODEL CONTEXT\n");
        let _ = writeln!(user, "- Model name: {}", model.name);
        let _ = writeln!(user, "- Materialization: {}", model.materialization);
        let _ = writeln!(user, "- Dependencies: {}", or_none(&model.dependency_names().join(", ")));
        let _ = writeln!(user, "- Tags: {}", or_none(&model.tags.join(", ")));
        if !model.description.trim().is_empty() {
            let _ = writeln!(user, "- Existing description: {}", model.description.trim());
        }

        user.push_str("\nCOLUMNS\n");
        user.push_str(&render_columns(model));

        user.push_str("\nTRANSFORMATION LOGIC\n```sql\n");
        user.push_str(&truncate_logic(&model.logic, self.max_logic_chars));
        user.push_str("\n```\n\n");

        user.push_str(&section_instructions());

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    fn name(&self) -> &str {
        "standard"
    }
}

// ---------------------------------------------------------------------------
// Template strategy
// ---------------------------------------------------------------------------

/// A user-supplied template with `{placeholder}` substitution.
///
/// The section instructions are always appended after the rendered template.
#[derive(Debug, Clone)]
pub struct TemplatePrompt {
    template: String,
    max_logic_chars: usize,
}

impl TemplatePrompt {
    pub fn new(template: impl Into<String>, max_logic_chars: usize) -> Self {
        Self {
            template: template.into(),
            max_logic_chars,
        }
    }

    /// Load the template from a file.
    pub fn from_file(path: &Path, max_logic_chars: usize) -> Result<Self> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            DocgenError::config(format!("cannot read prompt template {}: {e}", path.display()))
        })?;
        Ok(Self::new(template, max_logic_chars))
    }
}

impl PromptStrategy for TemplatePrompt {
    fn build(&self, model: &ModelInfo) -> Prompt {
        // Single pass, so substituted values are never re-scanned for placeholders.
        let rendered = PLACEHOLDER_RE.replace_all(&self.template, |caps: &Captures<'_>| {
            match &caps[1] {
                "model_name" => model.name.clone(),
                "materialization" => model.materialization.clone(),
                "dependencies" => or_none(&model.dependency_names().join(", ")).to_string(),
                "tags" => or_none(&model.tags.join(", ")).to_string(),
                "description" => model.description.trim().to_string(),
                "columns" => render_columns(model),
                "logic" => truncate_logic(&model.logic, self.max_logic_chars),
                other => format!("{{{other}}}"),
            }
        });

        let mut user = rendered.trim_end().to_string();
        user.push_str("\n\n");
        user.push_str(&section_instructions());

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    fn name(&self) -> &str {
        "template"
    }
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// Instructions that pin the response to the three labelled sections.
pub fn section_instructions() -> String {
    let [overview, implementation, dictionary] = SectionKind::ALL.map(|kind| kind.heading());

    format!(
        "OUTPUT FORMAT\n\
         Respond with exactly three Markdown sections using these headings, verbatim and in this order.\n\n\
         ## {overview}\n\
         A clear, non-technical explanation of what this model does, its business purpose, \
         and how stakeholders should interpret the data. Focus on business value and use cases.\n\n\
         ## {implementation}\n\
         The key transformations, joins and business logic. Highlight complex calculations, \
         window functions and data quality considerations. Mention the materialization strategy \
         and refresh pattern.\n\n\
         ## {dictionary}\n\
         A Markdown table with one row per column and these columns: \
         Column Name | Data Type | Business Description | Source/Calculation | Example Value | Data Quality Notes.\n\n\
         Do not add any other top-level sections. Keep the language accessible while staying \
         technically accurate.\n"
    )
}

/// One line per column: `- name (type): existing description`.
fn render_columns(model: &ModelInfo) -> String {
    if model.columns.is_empty() {
        return "- none declared\n".to_string();
    }

    let mut out = String::new();
    for column in &model.columns {
        let data_type = column.data_type.as_deref().unwrap_or("unknown");
        match column.description.as_deref() {
            Some(desc) => {
                let _ = writeln!(out, "- {} ({data_type}): {}", column.name, desc.trim());
            }
            None => {
                let _ = writeln!(out, "- {} ({data_type})", column.name);
            }
        }
    }
    out
}

/// Keep the first `max_chars` characters of `logic`, marking the cut.
pub fn truncate_logic(logic: &str, max_chars: usize) -> String {
    let logic = logic.trim();
    match logic.char_indices().nth(max_chars) {
        None => logic.to_string(),
        Some((cut, _)) => {
            format!("{}\n[... logic truncated after {max_chars} characters ...]", &logic[..cut])
        }
    }
}

fn or_none(value: &str) -> &str {
    if value.is_empty() { "none" } else { value }
}
