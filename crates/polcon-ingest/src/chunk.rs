//! Chunking: clauses -> section-bounded, overlapping extraction windows.

use crate::text::{slugify, word_count};
use crate::{ClauseUnit, PartyType, PolicyDocument};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// A contiguous run of clauses from one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub policy_id: String,
    pub party_type: PartyType,
    pub section_id: String,
    pub section_path: String,
    /// Byte offsets into the cleaned policy text.
    pub char_start: usize,
    pub char_end: usize,
    /// SHA-256 hex of `text`
    pub chunk_hash: String,
    pub text: String,
    pub clause_ids: Vec<String>,
    /// Size in words
    pub units: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target chunk size in words; chunks grow up to 1.2x this.
    pub target_units: usize,
    /// Share of the previous chunk repeated at the start of the next one.
    pub overlap_pct: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_units: 1000,
            overlap_pct: 0.12,
        }
    }
}

impl ChunkerConfig {
    pub fn new(target_units: usize, overlap_pct: f64) -> Self {
        Self {
            target_units,
            overlap_pct,
        }
    }

    pub fn max_units(&self) -> usize {
        ((self.target_units.max(1) as f64) * 1.2).ceil() as usize
    }

    /// Overlap share clamped to the 10-15% band.
    pub fn effective_overlap(&self) -> f64 {
        self.overlap_pct.clamp(0.10, 0.15)
    }
}

/// Chunk every section of a document in order.
///
/// Chunk ids are unique within the document: a section whose slug is
/// already taken by another section (repeated titles, or long paths that
/// agree up to the slug length) gets its section id appended.
pub fn chunk_document(doc: &PolicyDocument, config: &ChunkerConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut slugs = SectionSlugs::default();
    let mut start = 0;
    while start < doc.clauses.len() {
        let section_id = &doc.clauses[start].section_id;
        let end = doc.clauses[start..]
            .iter()
            .position(|c| &c.section_id != section_id)
            .map(|p| start + p)
            .unwrap_or(doc.clauses.len());
        let clauses = &doc.clauses[start..end];
        let (slug, ordinal) = slugs.claim(section_id, &clauses[0].section_path);
        let produced = chunk_section(doc, clauses, config, &slug, ordinal, &mut chunks);
        slugs.advance(section_id, produced);
        start = end;
    }

    tracing::debug!(policy_id = %doc.policy_id, chunks = chunks.len(), "chunked policy");
    chunks
}

/// Slug and next ordinal per section.
#[derive(Default)]
struct SectionSlugs {
    taken: HashSet<String>,
    sections: HashMap<String, (String, usize)>,
}

impl SectionSlugs {
    fn claim(&mut self, section_id: &str, section_path: &str) -> (String, usize) {
        if let Some((slug, next)) = self.sections.get(section_id) {
            return (slug.clone(), *next);
        }
        let base = slugify(section_path);
        let mut slug = base.clone();
        let mut n = 1;
        while self.taken.contains(&slug) {
            slug = if n == 1 {
                format!("{base}-{section_id}")
            } else {
                format!("{base}-{section_id}-{n}")
            };
            n += 1;
        }
        self.taken.insert(slug.clone());
        self.sections.insert(section_id.to_string(), (slug.clone(), 0));
        (slug, 0)
    }

    fn advance(&mut self, section_id: &str, produced: usize) {
        if let Some((_, next)) = self.sections.get_mut(section_id) {
            *next += produced;
        }
    }
}

/// Returns the number of chunks produced.
fn chunk_section(
    doc: &PolicyDocument,
    clauses: &[ClauseUnit],
    config: &ChunkerConfig,
    slug: &str,
    first_ordinal: usize,
    out: &mut Vec<Chunk>,
) -> usize {
    let units: Vec<usize> = clauses.iter().map(|c| word_count(doc.clause_text(c))).collect();
    let max = config.max_units();
    let overlap = config.effective_overlap();

    let mut first = 0;
    let mut ordinal = first_ordinal;
    while first < clauses.len() {
        let mut last = first;
        let mut size = 0;
        while last < clauses.len() {
            if last > first && size + units[last] > max {
                break;
            }
            size += units[last];
            last += 1;
        }

        out.push(make_chunk(doc, &clauses[first..last], slug, ordinal, size));
        ordinal += 1;
        if last >= clauses.len() {
            break;
        }

        // step back over trailing clauses that fit in the overlap budget,
        // always keeping at least one clause of progress
        let budget = (size as f64 * overlap).round() as usize;
        let mut next = last;
        let mut carried = 0;
        while next > first + 1 && carried + units[next - 1] <= budget {
            carried += units[next - 1];
            next -= 1;
        }
        first = next;
    }
    ordinal - first_ordinal
}

fn make_chunk(doc: &PolicyDocument, clauses: &[ClauseUnit], slug: &str, ordinal: usize, units: usize) -> Chunk {
    let first = &clauses[0];
    let last = &clauses[clauses.len() - 1];
    let text = doc.text[first.start_offset..last.end_offset].to_string();
    Chunk {
        chunk_id: format!("{}:{}:{}", doc.policy_id, slug, ordinal),
        policy_id: doc.policy_id.clone(),
        party_type: doc.party_type,
        section_id: first.section_id.clone(),
        section_path: first.section_path.clone(),
        char_start: first.start_offset,
        char_end: last.end_offset,
        chunk_hash: sha256_hex(&text),
        clause_ids: clauses.iter().map(|c| c.clause_id.clone()).collect(),
        text,
        units,
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ingest, PolicyInput};

    fn doc(text: &str) -> PolicyDocument {
        ingest(&PolicyInput::new("fp", PartyType::FirstParty, text)).unwrap()
    }

    #[test]
    fn chunks_never_cross_sections() {
        let d = doc("## A\n\nOne sentence here. Two sentence here.\n\n## B\n\nThree sentence here.");
        let chunks = chunk_document(&d, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, "fp:a:0");
        assert_eq!(chunks[0].text, "One sentence here. Two sentence here.");
        assert_eq!(chunks[1].section_path, "B");
        for chunk in &chunks {
            assert_eq!(&d.text[chunk.char_start..chunk.char_end], chunk.text);
            assert_eq!(chunk.chunk_hash.len(), 64);
        }
    }

    #[test]
    fn repeated_section_titles_get_distinct_ids() {
        let d = doc("## Sharing\n\nWe do not share your location.\n\n## Sharing\n\nWe share your email address.\n\n## Sharing\n\nWe sell nothing.");
        let chunks = chunk_document(&d, &ChunkerConfig::default());
        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "fp:sharing:0");
        assert!(ids[1].starts_with("fp:sharing-s"));
        assert!(ids[2].starts_with("fp:sharing-s"));
        assert_ne!(ids[1], ids[2]);
        assert!(chunks.iter().all(|c| c.section_path == "Sharing"));
    }

    #[test]
    fn long_paths_sharing_a_slug_prefix_get_distinct_ids() {
        let stem = "Information We Collect Automatically When You Use Our Services";
        let d = doc(&format!("## {stem} On Mobile\n\nWe collect device identifiers.\n\n## {stem} On The Web\n\nWe collect cookies."));
        let chunks = chunk_document(&d, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(slugify(&chunks[0].section_path), slugify(&chunks[1].section_path));
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
    }

    #[test]
    fn long_sections_split_within_section() {
        let body: Vec<String> = (0..40).map(|i| format!("Sentence number {i} has five words.")).collect();
        let d = doc(&format!("## Long\n\n{}", body.join(" ")));
        // 6 words per sentence; max 12 * 1.2 = 15 -> two sentences per chunk
        let chunks = chunk_document(&d, &ChunkerConfig::new(12, 0.5));
        assert!(chunks.len() > 10);
        assert!(chunks.iter().all(|c| c.section_path == "Long"));
        assert!(chunks.iter().all(|c| c.units <= 15));
        // overlap is clamped to 15% of 12 words, less than one sentence
        assert!(chunks.windows(2).all(|w| w[0].char_end <= w[1].char_start));
        let covered: usize = chunks.iter().map(|c| c.clause_ids.len()).sum();
        assert_eq!(covered, 40);
    }

    #[test]
    fn overlap_repeats_trailing_clauses() {
        let eight = |i: usize| format!("This sentence {i} contains exactly eight words total.");
        let sentences = [eight(0), eight(1), "Tiny.".to_string(), eight(2), eight(3)];
        let d = doc(&sentences.join(" "));
        // max = 24 words; clause units: 8, 8, 1, 8, 8
        let chunks = chunk_document(&d, &ChunkerConfig::new(20, 0.15));
        assert_eq!(chunks.len(), 2);
        // first chunk holds 17 words, budget round(17 * 0.15) = 3 carries "Tiny."
        assert_eq!(chunks[0].clause_ids, vec!["fp:c0000", "fp:c0001", "fp:c0002"]);
        assert_eq!(chunks[1].clause_ids, vec!["fp:c0002", "fp:c0003", "fp:c0004"]);
        assert!(chunks[1].char_start < chunks[0].char_end);
    }

    #[test]
    fn oversized_clause_is_its_own_chunk() {
        let long = vec!["word"; 50].join(" ") + ".";
        let d = doc(&format!("Short one. {} Short two.", long.replacen('w', "W", 1)));
        let chunks = chunk_document(&d, &ChunkerConfig::new(10, 0.1));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].units, 50);
    }
}
