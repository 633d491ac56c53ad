//! Splits a model response into the three required documentation sections.

use std::sync::LazyLock;

use regex::Regex;

use docgen_shared::{DocgenError, GenerationResult, Result, SectionKind};

/// A section heading: `## Business Overview`, `**2. Data Dictionary:**`, etc.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s{0,3}(?:#{1,4}\s*|\*\*\s*)(?:\d+[.)]\s*)?(business overview|technical implementation|data dictionary)\s*:?\s*(?:\*\*)?\s*:?\s*$",
    )
    .expect("heading pattern is valid")
});

/// A Jinja `docs`/`enddocs` tag, which would split the rendered block.
static DOCS_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*(?:end)?docs\b").expect("docs tag pattern is valid")
});

fn heading_kind(line: &str) -> Option<SectionKind> {
    let caps = HEADING_RE.captures(line)?;
    let label = caps.get(1)?.as_str();
    SectionKind::ALL
        .into_iter()
        .find(|kind| kind.heading().eq_ignore_ascii_case(label))
}

/// Parse and normalize a raw response into a [`GenerationResult`].
///
/// Text before the first recognised heading is dropped. A missing, repeated
/// or empty section makes the whole response invalid, as does a section
/// containing a `{% docs %}` or `{% enddocs %}` tag.
pub fn parse_sections(text: &str) -> Result<GenerationResult> {
    let normalized = text.replace("\r\n", "\n");

    let mut sections: [Option<Vec<&str>>; 3] = [None, None, None];
    let mut current: Option<usize> = None;

    for line in normalized.lines() {
        if let Some(kind) = heading_kind(line) {
            let idx = index_of(kind);
            if sections[idx].is_some() {
                return Err(DocgenError::invalid(format!(
                    "section '{}' appears more than once",
                    kind.heading()
                )));
            }
            sections[idx] = Some(Vec::new());
            current = Some(idx);
            continue;
        }

        if let Some(lines) = current.and_then(|idx| sections[idx].as_mut()) {
            lines.push(line.trim_end());
        }
    }

    let mut bodies = Vec::with_capacity(3);
    for kind in SectionKind::ALL {
        let lines = sections[index_of(kind)].take().ok_or_else(|| {
            DocgenError::invalid(format!("missing section '{}'", kind.heading()))
        })?;
        let body = lines.join("\n").trim_matches('\n').to_string();
        if DOCS_TAG_RE.is_match(&body) {
            return Err(DocgenError::invalid(format!(
                "section '{}' contains a docs block tag",
                kind.heading()
            )));
        }
        bodies.push(body);
    }

    let [overview, implementation, dictionary]: [String; 3] = bodies
        .try_into()
        .map_err(|_| DocgenError::invalid("unexpected section count"))?;

    GenerationResult::new(overview, implementation, dictionary)
}

fn index_of(kind: SectionKind) -> usize {
    match kind {
        SectionKind::BusinessOverview => 0,
        SectionKind::TechnicalImplementation => 1,
        SectionKind::DataDictionary => 2,
    }
}
