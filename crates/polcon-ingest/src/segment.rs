//! Segmentation: cleaned text -> section tree + clauses.
//!
//! Headings are recognized line by line:
//! - markdown (`## Sharing`), level = number of `#`
//! - numbered (`2.1 Partners`, `Section 4`), level = numeric depth
//! - ALL-CAPS short lines, level 1
//! - short Title-Case lines standing alone, level 2
//! - lines matching a collector-supplied hint, hinted level
//!
//! A clause belongs to the innermost section containing its start, which
//! is always the section of the closest heading above it.

use crate::clean::{clean_text, control_ratio};
use crate::text::{collapse_ws, sentence_spans};
use crate::{HintedHeading, IngestionError, PartyType, PolicyInput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const ROOT_SECTION_ID: &str = "s0";
pub const ROOT_SECTION_PATH: &str = "Document";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub title: String,
    /// 0 for the document root
    pub level: usize,
    /// Breadcrumb of titles, `A > B`
    pub section_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Sentence,
    Bullet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseUnit {
    pub clause_id: String,
    pub section_id: String,
    pub section_path: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub kind: ClauseKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub sections: usize,
    pub headings: usize,
    pub clauses: usize,
    pub definitions: usize,
    pub chars: usize,
}

/// An ingested policy. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub policy_id: String,
    pub party_type: PartyType,
    pub raw_text: String,
    /// Cleaned text; every offset in the pipeline points into this.
    pub text: String,
    pub sections: Vec<Section>,
    pub clauses: Vec<ClauseUnit>,
    /// term -> definition, from "X means ..." sentences
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,
}

impl PolicyDocument {
    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    pub fn root(&self) -> &Section {
        &self.sections[0]
    }

    pub fn clause_text(&self, clause: &ClauseUnit) -> &str {
        &self.text[clause.start_offset..clause.end_offset]
    }

    /// Checked slice of the cleaned text.
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        self.text.get(start..end)
    }

    pub fn stats(&self) -> SegmentStats {
        SegmentStats {
            sections: self.sections.len(),
            headings: self.sections.len().saturating_sub(1),
            clauses: self.clauses.len(),
            definitions: self.definitions.len(),
            chars: self.text.chars().count(),
        }
    }
}

// ============================================================================
// Heading patterns
// ============================================================================

fn markdown_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").expect("valid regex"))
}

fn numbered_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?i:section|article)\s+)?(\d+(?:\.\d+)*)[.:)]?\s+(\p{Lu}.{0,78})$").expect("valid regex")
    })
}

fn bare_section_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i:section|article)\s+(\d+(?:\.\d+)*)[.:]?$").expect("valid regex"))
}

fn bullet_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[-*\u{2022}\u{00B7}]|\(?[a-z0-9]{1,3}\)|\d{1,3}[.)])\s+\S").expect("valid regex"))
}

fn definition_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^[^\p{L}]*["\u{201C}']?(\p{Lu}[\p{L}\s-]{1,40}?)["\u{201D}']?\s+(?:means|refers to|shall mean|is defined as)\s+(.+?)\.?$"#,
        )
        .expect("valid regex")
    })
}

const SMALL_WORDS: &[&str] = &["a", "an", "and", "as", "at", "by", "for", "from", "in", "of", "on", "or", "the", "to", "we", "with", "your", "our", "how"];

// ============================================================================
// Segmenter
// ============================================================================

#[derive(Debug, Clone)]
pub struct Segmenter {
    /// Reject input whose control-character share exceeds this.
    pub max_control_ratio: f64,
}

struct Line<'a> {
    start: usize,
    text: &'a str,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    pub fn new() -> Self {
        Self { max_control_ratio: 0.1 }
    }

    pub fn segment(&self, input: &PolicyInput) -> Result<PolicyDocument, IngestionError> {
        if input.text.contains('\0') {
            return Err(IngestionError::NotText {
                policy_id: input.policy_id.clone(),
                reason: "contains NUL bytes".to_string(),
            });
        }
        let ratio = control_ratio(&input.text);
        if ratio > self.max_control_ratio {
            return Err(IngestionError::NotText {
                policy_id: input.policy_id.clone(),
                reason: format!("{:.0}% control characters", ratio * 100.0),
            });
        }

        let text = clean_text(&input.text);
        if text.is_empty() {
            return Err(IngestionError::Empty(input.policy_id.clone()));
        }

        let lines = split_lines(&text);
        let hints = input.section_hint.as_deref().unwrap_or(&[]);

        let mut sections = vec![Section {
            section_id: ROOT_SECTION_ID.to_string(),
            title: ROOT_SECTION_PATH.to_string(),
            level: 0,
            section_path: ROOT_SECTION_PATH.to_string(),
            parent: None,
            start_offset: 0,
            end_offset: text.len(),
        }];
        let mut open: Vec<usize> = vec![0];
        let mut clauses = Vec::new();
        let mut body: Vec<&Line> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            let prev_blank = i == 0 || lines[i - 1].text.is_empty();
            let next_blank = i + 1 >= lines.len() || lines[i + 1].text.is_empty();

            let Some((level, title)) = classify_heading(line.text, prev_blank, next_blank, hints) else {
                body.push(line);
                continue;
            };

            let current = open.last().copied().unwrap_or(0);
            emit_clauses(&text, &body, &sections[current], &input.policy_id, &mut clauses);
            body.clear();

            while open.len() > 1 {
                let top = open.last().copied().unwrap_or(0);
                if sections[top].level < level {
                    break;
                }
                sections[top].end_offset = line.start;
                open.pop();
            }
            let parent = open.last().copied().unwrap_or(0);
            let section_path = if parent == 0 {
                title.clone()
            } else {
                format!("{} > {}", sections[parent].section_path, title)
            };
            let idx = sections.len();
            sections.push(Section {
                section_id: format!("s{idx}"),
                title,
                level,
                section_path,
                parent: Some(sections[parent].section_id.clone()),
                start_offset: line.start,
                end_offset: text.len(),
            });
            open.push(idx);
        }
        let current = open.last().copied().unwrap_or(0);
        emit_clauses(&text, &body, &sections[current], &input.policy_id, &mut clauses);

        let definitions = extract_definitions(&text, &clauses);

        let doc = PolicyDocument {
            policy_id: input.policy_id.clone(),
            party_type: input.party_type,
            raw_text: input.text.clone(),
            text,
            sections,
            clauses,
            definitions,
        };
        Ok(doc)
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for part in text.split('\n') {
        lines.push(Line { start, text: part });
        start += part.len() + 1;
    }
    lines
}

fn classify_heading(line: &str, prev_blank: bool, next_blank: bool, hints: &[HintedHeading]) -> Option<(usize, String)> {
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = markdown_heading().captures(line) {
        return Some((caps[1].len(), caps[2].trim().to_string()));
    }

    let stripped = line.trim_end_matches(':').trim();
    if let Some(hint) = hints.iter().find(|h| h.title.trim().eq_ignore_ascii_case(stripped)) {
        return Some((hint.level.max(1), stripped.to_string()));
    }

    if !prev_blank || line.chars().count() > 80 {
        return None;
    }

    if let Some(caps) = bare_section_heading().captures(line) {
        return Some((caps[1].split('.').count(), stripped.to_string()));
    }
    if let Some(caps) = numbered_heading().captures(line) {
        let title = caps[2].trim();
        if !title.ends_with(['.', ';', ',']) && title.split_whitespace().count() <= 12 {
            return Some((caps[1].split('.').count(), stripped.to_string()));
        }
    }

    if is_all_caps(stripped) {
        return Some((1, stripped.to_string()));
    }
    if next_blank && is_title_case(line) {
        return Some((2, stripped.to_string()));
    }
    None
}

fn is_all_caps(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase()) && !line.ends_with(['.', ';', ','])
}

fn is_title_case(line: &str) -> bool {
    let line = line.strip_suffix(':').unwrap_or(line);
    if line.ends_with(['.', '!', '?', ';', ',']) || bullet_line().is_match(line) {
        return false;
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() || words.len() > 8 || line.len() > 60 {
        return false;
    }
    let starts_upper = |w: &str| w.chars().next().is_some_and(|c| c.is_uppercase() || c.is_ascii_digit());
    if !starts_upper(words[0]) {
        return false;
    }
    words.iter().skip(1).all(|w| {
        let lower = w.to_lowercase();
        starts_upper(w) || SMALL_WORDS.contains(&lower.trim_matches(|c: char| !c.is_alphanumeric()))
    })
}

/// Split a section body into bullet clauses and sentence clauses.
fn emit_clauses(text: &str, body: &[&Line], section: &Section, policy_id: &str, out: &mut Vec<ClauseUnit>) {
    let mut blocks: Vec<(usize, usize, ClauseKind)> = Vec::new();
    let mut current: Option<(usize, usize, ClauseKind)> = None;

    for line in body {
        if line.text.is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }
        let end = line.start + line.text.len();
        if bullet_line().is_match(line.text) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some((line.start, end, ClauseKind::Bullet));
        } else if let Some((_, block_end, _)) = current.as_mut() {
            *block_end = end;
        } else {
            current = Some((line.start, end, ClauseKind::Sentence));
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    for (start, end, kind) in blocks {
        let spans = match kind {
            ClauseKind::Bullet => vec![(0, end - start)],
            ClauseKind::Sentence => sentence_spans(&text[start..end]),
        };
        for (s, e) in spans {
            out.push(ClauseUnit {
                clause_id: format!("{}:c{:04}", policy_id, out.len()),
                section_id: section.section_id.clone(),
                section_path: section.section_path.clone(),
                start_offset: start + s,
                end_offset: start + e,
                kind,
            });
        }
    }
}

fn extract_definitions(text: &str, clauses: &[ClauseUnit]) -> BTreeMap<String, String> {
    let mut definitions = BTreeMap::new();
    for clause in clauses {
        let clause_text = collapse_ws(&text[clause.start_offset..clause.end_offset]);
        if let Some(caps) = definition_pattern().captures(&clause_text) {
            let term = caps[1].trim().to_string();
            definitions.entry(term).or_insert_with(|| caps[2].trim().to_string());
        }
    }
    definitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> PolicyDocument {
        Segmenter::new()
            .segment(&PolicyInput::new("p", PartyType::FirstParty, text))
            .unwrap()
    }

    #[test]
    fn markdown_sections_form_a_tree() {
        let d = doc("# Privacy Policy\n\nIntro text.\n\n## Sharing\n\nWe share data. We sell nothing.\n\n## Retention\n\nWe keep data.\n\n# Contact\n\nWrite to us.");
        let paths: Vec<&str> = d.sections.iter().map(|s| s.section_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["Document", "Privacy Policy", "Privacy Policy > Sharing", "Privacy Policy > Retention", "Contact"]
        );
        assert_eq!(d.sections[2].parent.as_deref(), Some("s1"));
        assert_eq!(d.sections[1].end_offset, d.sections[4].start_offset);

        let sharing: Vec<&str> = d
            .clauses
            .iter()
            .filter(|c| c.section_id == "s2")
            .map(|c| d.clause_text(c))
            .collect();
        assert_eq!(sharing, vec!["We share data.", "We sell nothing."]);
    }

    #[test]
    fn every_clause_lies_inside_its_section() {
        let d = doc("INTRODUCTION\n\nHello there. General terms.\n\n1. Data We Collect\n\nWe collect email.\n\n1.1 Cookies\n\nWe use cookies.\n\n2. Sharing\n\n- with partners\n- with vendors");
        for clause in &d.clauses {
            let section = d.section(&clause.section_id).unwrap();
            assert!(section.start_offset <= clause.start_offset);
            assert!(clause.end_offset <= section.end_offset);
        }
        let cookies = d.sections.iter().find(|s| s.title == "1.1 Cookies").unwrap();
        assert_eq!(cookies.level, 2);
        assert_eq!(cookies.section_path, "1. Data We Collect > 1.1 Cookies");
        let bullets = d.clauses.iter().filter(|c| c.kind == ClauseKind::Bullet).count();
        assert_eq!(bullets, 2);
    }

    #[test]
    fn plain_text_gets_root_section_only() {
        let d = doc("We collect your email address. We never sell it.");
        assert_eq!(d.sections.len(), 1);
        assert_eq!(d.clauses.len(), 2);
        assert!(d.clauses.iter().all(|c| c.section_path == ROOT_SECTION_PATH));
    }

    #[test]
    fn title_case_heading_needs_blank_lines() {
        let d = doc("Information We Collect\n\nWe collect your email address.");
        assert_eq!(d.sections.len(), 2);
        assert_eq!(d.sections[1].level, 2);
        let d = doc("We Collect Data\nfrom many places.");
        assert_eq!(d.sections.len(), 1);
    }

    #[test]
    fn section_hints_mark_headings() {
        let input = PolicyInput::new("p", PartyType::ThirdParty, "Overview\nWe collect data.\nPartner Data\nWe receive data.")
            .with_section_hint(vec![HintedHeading { title: "partner data".into(), level: 1 }]);
        let d = Segmenter::new().segment(&input).unwrap();
        assert_eq!(d.sections.len(), 2);
        assert_eq!(d.sections[1].title, "Partner Data");
    }

    #[test]
    fn definitions_are_collected() {
        let d = doc("\"Personal Data\" means any information relating to you. We collect Personal Data.");
        assert_eq!(
            d.definitions.get("Personal Data").map(String::as_str),
            Some("any information relating to you")
        );
    }

    #[test]
    fn rejects_empty_and_binary_input() {
        let seg = Segmenter::new();
        assert_eq!(
            seg.segment(&PolicyInput::new("e", PartyType::FirstParty, "  \n\t ")),
            Err(IngestionError::Empty("e".into()))
        );
        assert!(matches!(
            seg.segment(&PolicyInput::new("b", PartyType::FirstParty, "abc\0def")),
            Err(IngestionError::NotText { .. })
        ));
        assert!(matches!(
            PolicyInput::from_bytes("b", PartyType::FirstParty, &[0xff, 0xfe, 0x00]),
            Err(IngestionError::NotText { .. })
        ));
    }
}
