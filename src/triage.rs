//! Triage: split a document into typed units.
//!
//! The [`Triage`] trait is the seam; [`ParagraphTriage`] is the built-in
//! implementation, which partitions plain text on blank lines and classifies
//! each block by shape. Layout-aware parsers plug in behind the same trait.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::CapabilityError;

/// Semantic type of a triaged unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    Title,
    Text,
    Table,
    List,
    Other,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Title => "Title",
            UnitKind::Text => "Text",
            UnitKind::Table => "Table",
            UnitKind::List => "List",
            UnitKind::Other => "Other",
        }
    }
}

/// One unit of work: a contiguous piece of the document with a stable
/// position. Unit ids are `{document_id}_unit_{index}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub document_id: String,
    /// Position in document order. Stage outputs are indexed by this, so it
    /// must be dense and zero-based.
    pub index: usize,
    pub kind: UnitKind,
    pub content: String,
}

/// Partitions document text into ordered [`Unit`]s.
#[async_trait]
pub trait Triage: Send + Sync {
    async fn triage(&self, document_id: &str, text: &str) -> Result<Vec<Unit>, CapabilityError>;
}

// =============================================================================
// ParagraphTriage
// =============================================================================

static BLANK_LINE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n[ \t]*\r?\n+").expect("Invalid blank line split regex"));

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(?:[-*•]|\d{1,3}[.)])[ \t]+").expect("Invalid list marker regex")
});

/// Longest line that can still be classified as a title.
const TITLE_MAX_LEN: usize = 90;

/// Blocks shorter than this (after trimming) are noise, not units.
const MIN_UNIT_LEN: usize = 2;

/// Blank-line paragraph triage with shape-based classification.
///
/// Heuristics, in order: pipe- or tab-delimited rows across multiple lines are
/// a table; a block where most lines carry a bullet or `1.` marker is a list;
/// a short single line without a sentence-final period is a title; anything
/// else with real length is text, and short leftovers are `Other`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphTriage;

impl ParagraphTriage {
    pub fn new() -> Self {
        Self
    }

    fn classify(block: &str) -> UnitKind {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();

        if Self::looks_like_table(&lines) {
            return UnitKind::Table;
        }
        if Self::looks_like_list(&lines) {
            return UnitKind::List;
        }
        if lines.len() == 1 {
            let line = lines[0].trim();
            if line.len() <= TITLE_MAX_LEN && !line.ends_with('.') && !line.ends_with(',') {
                return UnitKind::Title;
            }
            if line.len() < 40 {
                return UnitKind::Other;
            }
        }
        UnitKind::Text
    }

    fn looks_like_table(lines: &[&str]) -> bool {
        if lines.len() < 2 {
            return false;
        }
        let delimited = lines
            .iter()
            .filter(|l| l.matches('|').count() >= 2 || l.matches('\t').count() >= 2)
            .count();
        delimited * 2 >= lines.len()
    }

    fn looks_like_list(lines: &[&str]) -> bool {
        if lines.is_empty() {
            return false;
        }
        let marked = lines.iter().filter(|l| LIST_MARKER.is_match(l)).count();
        marked * 2 > lines.len()
    }
}

#[async_trait]
impl Triage for ParagraphTriage {
    async fn triage(&self, document_id: &str, text: &str) -> Result<Vec<Unit>, CapabilityError> {
        let mut units = Vec::new();
        let mut index = 0usize;

        for block in BLANK_LINE_SPLIT.split(text) {
            let content = block.trim();
            if content.len() < MIN_UNIT_LEN {
                continue;
            }
            let kind = Self::classify(content);
            debug!(index, kind = kind.as_str(), len = content.len(), "triaged unit");
            units.push(Unit {
                id: format!("{document_id}_unit_{index}"),
                document_id: document_id.to_string(),
                index,
                kind,
                content: content.to_string(),
            });
            index += 1;
        }

        info!(document_id, units = units.len(), "triage complete");
        Ok(units)
    }
}
