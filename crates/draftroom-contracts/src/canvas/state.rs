use std::collections::HashSet;

use uuid::Uuid;

use super::types::{GenerationResult, Section, Source};

pub const SECTION_TITLE: &str = "Drafted Analysis";

/// Immutable snapshot of the document canvas.
///
/// Transitions never mutate `self`; they return the next snapshot:
/// - sections are kept in generation order and never reordered
/// - sources are the union of every result's sources, keyed by `uri`,
///   in the order each `uri` was first seen
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanvasState {
    sections: Vec<Section>,
    sources: Vec<Source>,
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.sources.is_empty()
    }

    pub fn append_section(&self, result: &GenerationResult) -> Self {
        self.append_section_with_id(result, Uuid::new_v4().to_string())
    }

    pub fn append_section_with_id(&self, result: &GenerationResult, id: String) -> Self {
        let mut sections = self.sections.clone();
        sections.push(Section {
            id,
            title: SECTION_TITLE.to_string(),
            content: result.text.clone(),
            is_generating: false,
        });
        Self {
            sections,
            sources: merge_sources(&self.sources, &result.sources),
        }
    }

    pub fn clear(&self) -> Self {
        Self::default()
    }

    pub fn last_section(&self) -> Option<&Section> {
        self.sections.last()
    }
}

fn merge_sources(existing: &[Source], incoming: &[Source]) -> Vec<Source> {
    let mut seen: HashSet<&str> = HashSet::new();
    existing
        .iter()
        .chain(incoming.iter())
        .filter(|source| seen.insert(source.uri.as_str()))
        .cloned()
        .collect()
}
