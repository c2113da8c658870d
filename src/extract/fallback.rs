//! Salvage for replies the extraction strategies could not fully map.
//!
//! The reconciler scrubs prompt scaffolding (section labels, separators,
//! fence markers) from the reply and hands what is left to the most probable
//! missing section. It only ever reuses text from the reply.

use super::lines::{split_label, trim_leading_markup};
use crate::error::{PromptError, PromptResult};
use crate::prompt::{OutputSchema, SOURCE_SECTION_KEY};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::{debug, warn};

static FENCE_MARKER_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct FallbackReconciler {
    separators: Vec<String>,
}

impl FallbackReconciler {
    pub fn new(separators: &[String]) -> Self {
        Self {
            separators: separators
                .iter()
                .filter(|separator| !separator.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Remove prompt scaffolding from `text`.
    ///
    /// Fence markers are dropped wherever they appear. A schema key or alias
    /// is dropped only when it labels a line, i.e. it starts the line and is
    /// followed by a separator or nothing, so prose mentioning a language
    /// name survives. Leading separators and lines left empty are dropped.
    pub fn scrub(&self, text: &str, schema: &OutputSchema) -> String {
        let fence = FENCE_MARKER_REGEX.get_or_init(|| Regex::new(r"(?i)```[ \t]*json|```").unwrap());
        let text = fence.replace_all(text, "");
        let keywords = scaffold_keywords(schema);

        text.lines()
            .map(|line| self.scrub_line(line, &keywords))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn scrub_line<'l>(&self, line: &'l str, keywords: &[String]) -> &'l str {
        let mut rest = trim_leading_markup(line);
        loop {
            if let Some(after) = self.strip_separator(rest) {
                rest = trim_leading_markup(after);
                continue;
            }

            let label_end = keywords.iter().find_map(|keyword| {
                let head = rest.get(..keyword.len())?;
                if !head.eq_ignore_ascii_case(keyword) {
                    return None;
                }
                let after = trim_leading_markup(&rest[keyword.len()..]);
                (after.is_empty() || self.strip_separator(after).is_some()).then_some(after)
            });

            match label_end {
                Some(after) => rest = after,
                None => return rest.trim_end(),
            }
        }
    }

    fn strip_separator<'l>(&self, text: &'l str) -> Option<&'l str> {
        self.separators
            .iter()
            .find(|separator| text.starts_with(separator.as_str()))
            .map(|separator| &text[separator.len()..])
    }

    /// Text of `text` not already captured by a populated section.
    fn residue(&self, text: &str, schema: &OutputSchema, sections: &BTreeMap<String, String>) -> String {
        let captured: HashSet<&str> = sections
            .values()
            .flat_map(|value| value.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        self.scrub(text, schema)
            .lines()
            .filter(|line| {
                let value = split_label(line, &self.separators)
                    .map_or(*line, |(_, value)| trim_leading_markup(value));
                !captured.contains(line.trim()) && !captured.contains(value)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fill missing sections from the scrubbed reply.
    ///
    /// A missing required source section receives the residue. If no target
    /// section has content either, the residue also goes to the lowest-order
    /// target unless it was just used as the source.
    ///
    /// # Returns
    /// * `Ok(reasons)`: one human-readable reason per assignment (possibly none)
    /// * `Err(PromptError::EmptyResidueAfterScrub)`: nothing but scaffolding
    ///   was left and no section carries content; `sections` is cleared.
    ///   Empty values next to real content are left in place.
    pub fn reconcile(
        &self,
        text: &str,
        schema: &OutputSchema,
        sections: &mut BTreeMap<String, String>,
    ) -> PromptResult<Vec<String>> {
        let residue = self.residue(text, schema, sections);

        if residue.is_empty() {
            if sections.values().all(|value| value.trim().is_empty()) {
                sections.clear();
                warn!("Reply contained only prompt scaffolding");
                return Err(PromptError::EmptyResidueAfterScrub);
            }
            debug!("Nothing left to reassign after scrubbing");
            return Ok(Vec::new());
        }

        let mut reasons = Vec::new();
        let mut assigned_to_source = false;

        let source_missing = schema
            .source_section()
            .is_some_and(|section| section.required && is_missing(sections, SOURCE_SECTION_KEY));
        if source_missing {
            sections.insert(SOURCE_SECTION_KEY.to_string(), residue.clone());
            reasons.push("using sanitized raw content as transcription".to_string());
            assigned_to_source = true;
        }

        let targets = schema.target_sections();
        let any_target = targets
            .iter()
            .any(|section| !is_missing(sections, section.canonical_key()));
        if let Some(first) = targets.first() {
            if !any_target && !assigned_to_source {
                sections.insert(first.language_code.clone(), residue.clone());
                reasons.push(format!(
                    "using sanitized raw content as translation for {}",
                    first.language_code
                ));
            }
        }

        if !reasons.is_empty() {
            warn!("Fallback applied: {}", reasons.join("; "));
        }
        Ok(reasons)
    }
}

fn is_missing(sections: &BTreeMap<String, String>, key: &str) -> bool {
    sections.get(key).map_or(true, |value| value.trim().is_empty())
}

/// Section keys and aliases, longest first, without case-insensitive duplicates.
fn scaffold_keywords(schema: &OutputSchema) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords: Vec<String> = schema
        .sections
        .iter()
        .flat_map(|section| section.patterns())
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty() && seen.insert(keyword.to_lowercase()))
        .map(str::to_string)
        .collect();
    keywords.sort_by_key(|keyword| std::cmp::Reverse(keyword.chars().count()));
    keywords
}
