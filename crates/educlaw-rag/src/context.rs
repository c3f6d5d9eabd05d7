//! Prompt context assembly from search results.
//!
//! Two modes: simple keeps raw relevance order; smart re-reads the top hits
//! in document order, pulls in one adjacent fragment per hit, and groups
//! everything under source headings with relevance markers.

use std::collections::{HashMap, HashSet};

use educlaw_core::types::SearchResult;

/// Cap on assembled context length in characters.
const MAX_CONTEXT_CHARS: usize = 4000;

/// Scores at or above this get the strong relevance marker.
const STRONG_SCORE: f32 = 0.75;

/// How many top results anchor smart selection.
const SMART_TOP: usize = 3;

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    smart: bool,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self { smart: true }
    }
}

impl ContextBuilder {
    pub fn new(smart: bool) -> Self {
        Self { smart }
    }

    /// Assemble the grounding block handed to the completion provider.
    pub fn build(&self, question: &str, results: &[SearchResult]) -> String {
        if results.is_empty() {
            return String::new();
        }
        tracing::debug!(
            "Building {} context for {:?} from {} results",
            if self.smart { "smart" } else { "simple" },
            question,
            results.len()
        );
        if self.smart {
            build_smart(results)
        } else {
            build_simple(results)
        }
    }
}

/// Relevance order, one annotated line per result.
fn build_simple(results: &[SearchResult]) -> String {
    let mut context = String::new();
    for (i, r) in results.iter().enumerate() {
        let entry = format!("{}. [{}] {}\n", i + 1, r.source.title, r.chunk.text);
        if context.len() + entry.len() > MAX_CONTEXT_CHARS {
            break;
        }
        context.push_str(&entry);
    }
    context.trim_end().to_string()
}

/// Top hits plus one adjacent fragment each, deduplicated, re-sorted into
/// document order, grouped under source headings.
fn build_smart(results: &[SearchResult]) -> String {
    let mut selected: Vec<&SearchResult> = Vec::new();
    let mut selected_ids: HashSet<&str> = HashSet::new();

    let top = &results[..results.len().min(SMART_TOP)];
    for r in top {
        if selected_ids.insert(r.chunk.id.as_str()) {
            selected.push(r);
        }
    }

    // One textual neighbor per top hit, drawn from the wider result set.
    for r in top {
        let neighbor = results.iter().find(|cand| {
            !selected_ids.contains(cand.chunk.id.as_str())
                && cand.chunk.content_id == r.chunk.content_id
                && (cand.chunk.chunk_index - r.chunk.chunk_index).abs() == 1
        });
        if let Some(n) = neighbor {
            selected_ids.insert(n.chunk.id.as_str());
            selected.push(n);
        }
    }

    // Documents ordered by their best selected score; fragments inside a
    // document in original reading order.
    let mut doc_order: Vec<&str> = Vec::new();
    let mut best: HashMap<&str, f32> = HashMap::new();
    for r in &selected {
        let id = r.chunk.content_id.as_str();
        let entry = best.entry(id).or_insert(f32::MIN);
        if r.score > *entry {
            *entry = r.score;
        }
        if !doc_order.contains(&id) {
            doc_order.push(id);
        }
    }
    doc_order.sort_by(|a, b| {
        best[b]
            .partial_cmp(&best[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });

    let mut context = String::new();
    'outer: for doc_id in doc_order {
        let mut fragments: Vec<&SearchResult> = selected
            .iter()
            .copied()
            .filter(|r| r.chunk.content_id == doc_id)
            .collect();
        fragments.sort_by_key(|r| r.chunk.chunk_index);

        let Some(first) = fragments.first() else { continue };
        let header = format!("### {} ({})\n", first.source.title, first.source.subject);
        if context.len() + header.len() > MAX_CONTEXT_CHARS {
            break;
        }
        context.push_str(&header);

        for r in fragments {
            let marker = if r.score >= STRONG_SCORE { "strong" } else { "medium" };
            let entry = format!("[relevance: {marker}] {}\n", r.chunk.text);
            if context.len() + entry.len() > MAX_CONTEXT_CHARS {
                break 'outer;
            }
            context.push_str(&entry);
        }
        context.push('\n');
    }
    context.trim_end().to_string()
}
