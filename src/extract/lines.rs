//! Line-oriented extraction: `Label<separator> value` lines matched to schema
//! sections by fuzzy label scoring.

use crate::i18n::LanguageRegistry;
use crate::prompt::{OutputSchema, OutputSection};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Label separators in priority order.
pub const DEFAULT_SEPARATORS: &[&str] = &[":", "：", "->", "=>"];

/// Contained terms this short must sit on an ASCII word boundary, so a label
/// like "Sentence" does not match the pattern "en".
const SHORT_TERM_CHARS: usize = 2;

static NOISE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Split a line at the first separator (in priority order) that does not
/// start the line.
pub(crate) fn split_label<'t>(line: &'t str, separators: &[String]) -> Option<(&'t str, &'t str)> {
    separators
        .iter()
        .filter(|separator| !separator.is_empty())
        .find_map(|separator| match line.find(separator.as_str()) {
            Some(idx) if idx > 0 => Some((&line[..idx], &line[idx + separator.len()..])),
            _ => None,
        })
}

/// How well a label the model wrote matches a section pattern.
///
/// * 100: equal, ignoring case
/// * 90: equal once whitespace and punctuation are removed
/// * 80: equal once trimmed
/// * 50..80: the label contains the pattern, scaled by length ratio
/// * 40..70: the pattern contains the label, scaled by length ratio
/// * 0: unrelated, or either side empty
pub fn match_score(input: &str, pattern: &str) -> u32 {
    let input = input.to_lowercase();
    let pattern = pattern.to_lowercase();
    if input.trim().is_empty() || pattern.trim().is_empty() {
        return 0;
    }

    if input == pattern {
        return 100;
    }

    let regex = NOISE_REGEX.get_or_init(|| Regex::new(r"[\s\p{P}]+").unwrap());
    let stripped_input = regex.replace_all(&input, "");
    let stripped_pattern = regex.replace_all(&pattern, "");
    if !stripped_input.is_empty() && stripped_input == stripped_pattern {
        return 90;
    }

    let input = input.trim();
    let pattern = pattern.trim();
    if input == pattern {
        return 80;
    }

    let input_len = input.chars().count();
    let pattern_len = pattern.chars().count();
    if contains_term(input, pattern) {
        return 50 + (30 * pattern_len / input_len) as u32;
    }
    if contains_term(pattern, input) {
        return 40 + (30 * input_len / pattern_len) as u32;
    }
    0
}

/// Case-sensitive containment; short ASCII terms must stand alone.
pub(crate) fn contains_term(haystack: &str, term: &str) -> bool {
    if term.chars().count() > SHORT_TERM_CHARS || !term.is_ascii() {
        return haystack.contains(term);
    }
    find_term(haystack, term, 0).is_some()
}

/// Byte offset of the first occurrence of `term` at or after `from` that is
/// not preceded or followed by an alphanumeric character.
pub(crate) fn find_term(haystack: &str, term: &str, from: usize) -> Option<usize> {
    if term.is_empty() {
        return None;
    }
    let mut start = from;
    while let Some(found) = haystack.get(start..).and_then(|rest| rest.find(term)) {
        let idx = start + found;
        let end = idx + term.len();
        let before = haystack[..idx].chars().next_back();
        let after = haystack[end..].chars().next();
        if !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric) {
            return Some(idx);
        }
        start = idx + haystack[idx..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

/// Best-scoring section for a label. Sections are visited in ascending order
/// and only a strictly greater score replaces the winner, so ties go to the
/// lowest order.
pub(crate) fn best_section<'s>(label: &str, ordered: &[&'s OutputSection]) -> Option<&'s OutputSection> {
    let mut best: Option<(&'s OutputSection, u32)> = None;
    for &section in ordered {
        let score = section
            .patterns()
            .map(|pattern| match_score(label, pattern))
            .max()
            .unwrap_or(0);
        if score > 0 && best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((section, score));
        }
    }
    best.map(|(section, _)| section)
}

/// Canonical key for a label: the best schema section, else a language the
/// label names, else the label itself.
pub(crate) fn resolve_label(
    label: &str,
    ordered: &[&OutputSection],
    registry: &LanguageRegistry,
) -> String {
    if let Some(section) = best_section(label, ordered) {
        return section.canonical_key().to_string();
    }
    match registry.identify_from_free_text(label) {
        Ok(code) => code.to_string(),
        Err(_) => label.to_string(),
    }
}

fn trim_markup(text: &str) -> &str {
    text.trim().trim_matches(['*', '_']).trim()
}

pub(crate) fn trim_leading_markup(text: &str) -> &str {
    text.trim().trim_start_matches(['*', '_']).trim()
}

/// Parse `Label: value` lines into canonical sections.
///
/// Lines without a separator continue the open section; text before the
/// first label and the contents of ```json fences are ignored. A section seen
/// twice keeps its last non-empty value.
pub fn parse_lines(
    text: &str,
    schema: &OutputSchema,
    registry: &LanguageRegistry,
    separators: &[String],
) -> BTreeMap<String, String> {
    let ordered = schema.sections_by_order();
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut open: Option<(String, Vec<String>)> = None;
    let mut in_json_fence = false;

    for line in text.lines() {
        let line = line.trim();
        if let Some(fence_tail) = line.strip_prefix("```") {
            in_json_fence = !in_json_fence
                && fence_tail.trim_start().to_lowercase().starts_with("json")
                && !fence_tail.contains("```");
            continue;
        }
        if line.is_empty() || in_json_fence {
            continue;
        }

        let labelled = split_label(line, separators)
            .map(|(label, value)| (trim_markup(label), trim_leading_markup(value)))
            .filter(|(label, _)| !label.is_empty());

        match labelled {
            Some((label, value)) => {
                if let Some((key, parts)) = open.take() {
                    store(&mut sections, key, &parts);
                }
                let key = resolve_label(label, &ordered, registry);
                let parts = if value.is_empty() {
                    Vec::new()
                } else {
                    vec![value.to_string()]
                };
                open = Some((key, parts));
            }
            None => {
                if let Some((_, parts)) = open.as_mut() {
                    parts.push(line.to_string());
                }
            }
        }
    }

    if let Some((key, parts)) = open.take() {
        store(&mut sections, key, &parts);
    }
    sections
}

fn store(sections: &mut BTreeMap<String, String>, key: String, parts: &[String]) {
    let value = parts.join("\n").trim().to_string();
    if !value.is_empty() {
        sections.insert(key, value);
    } else {
        sections.entry(key).or_default();
    }
}
