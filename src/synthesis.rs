//! Turn vision-model element hints into concrete selector candidates
//!
//! Candidates come out in structural preference order:
//!
//! 1. `data-*` test attributes (`[data-testid="send"]`)
//! 2. a stable `id` (`#prompt-textarea`)
//! 3. accessible/form attributes (`textarea[aria-label="Message"]`)
//! 4. stable classes scoped by tag (`button.send-btn`)
//! 5. visible text (`//button[normalize-space()='Send']`)
//! 6. the bare tag
//!
//! Ids and classes that look machine-generated (CSS-in-JS hashes, React
//! `useId` values, long digit runs) are skipped since they change between
//! deployments.

use std::collections::HashSet;

use crate::types::{ElementDescriptor, SelectorCandidate, Strategy, StructuralClass};

/// Test-hook attributes tried before any other `data-*` attribute
const PREFERRED_DATA_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-test-id",
    "data-test",
    "data-qa",
    "data-cy",
];

/// Non-`data-*` attributes stable enough to anchor on
const ANCHOR_ATTRIBUTES: &[&str] = &["aria-label", "name", "placeholder", "title"];

/// Longest visible text still used as a text anchor
const MAX_TEXT_LEN: usize = 80;

/// Most classes combined into one class selector
const MAX_CLASSES: usize = 2;

/// All candidates derivable from `descriptor`, deduplicated, most preferred first
pub fn synthesize(descriptor: &ElementDescriptor) -> Vec<SelectorCandidate> {
    let tag = descriptor
        .tag
        .as_deref()
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| is_identifier(t));

    let mut out = Vec::new();

    for (name, value) in ordered_data_attributes(descriptor) {
        out.push(SelectorCandidate::new(
            Strategy::AttributeMatch,
            format!("[{}=\"{}\"]", name, css_string(value)),
            StructuralClass::DataAttributeBased,
        ));
    }

    if let Some(id) = descriptor.id.as_deref().map(str::trim) {
        if !id.is_empty() && !looks_generated(id) {
            let expression = if is_identifier(id) {
                format!("#{id}")
            } else {
                format!("[id=\"{}\"]", css_string(id))
            };
            out.push(SelectorCandidate::new(
                Strategy::Css,
                expression,
                StructuralClass::IdBased,
            ));
        }
    }

    for name in ANCHOR_ATTRIBUTES {
        let Some(value) = descriptor.attributes.get(*name).map(|v| v.trim()) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        out.push(SelectorCandidate::new(
            Strategy::AttributeMatch,
            format!(
                "{}[{}=\"{}\"]",
                tag.as_deref().unwrap_or(""),
                name,
                css_string(value)
            ),
            StructuralClass::StableClassBased,
        ));
    }

    let classes: Vec<&str> = descriptor
        .classes
        .iter()
        .map(|c| c.trim())
        .filter(|c| is_identifier(c) && !looks_generated(c))
        .take(MAX_CLASSES)
        .collect();
    if !classes.is_empty() {
        out.push(SelectorCandidate::new(
            Strategy::Css,
            format!("{}.{}", tag.as_deref().unwrap_or(""), classes.join(".")),
            StructuralClass::StableClassBased,
        ));
    }

    if let Some(text) = descriptor.text.as_deref().map(collapse_whitespace) {
        if !text.is_empty() && text.chars().count() <= MAX_TEXT_LEN {
            let candidate = match tag.as_deref() {
                Some(tag) => SelectorCandidate::new(
                    Strategy::XPath,
                    format!("//{}[normalize-space()={}]", tag, xpath_literal(&text)),
                    StructuralClass::PositionalOrBasicTag,
                ),
                None => SelectorCandidate::new(
                    Strategy::TextMatch,
                    text,
                    StructuralClass::PositionalOrBasicTag,
                ),
            };
            out.push(candidate);
        }
    }

    if let Some(tag) = tag {
        out.push(SelectorCandidate::new(
            Strategy::Css,
            tag,
            StructuralClass::PositionalOrBasicTag,
        ));
    }

    dedupe(out)
}

fn ordered_data_attributes(descriptor: &ElementDescriptor) -> Vec<(&str, &str)> {
    let mut attributes: Vec<(&str, &str)> = descriptor
        .data_attributes
        .iter()
        .filter_map(|(name, value)| {
            let name = name.trim();
            let value = value.trim();
            let usable = name.len() > "data-".len()
                && name.starts_with("data-")
                && is_identifier(name)
                && !value.is_empty();
            usable.then_some((name, value))
        })
        .collect();
    // BTreeMap order within each group keeps output deterministic
    attributes.sort_by_key(|(name, _)| {
        PREFERRED_DATA_ATTRIBUTES
            .iter()
            .position(|preferred| preferred == name)
            .unwrap_or(PREFERRED_DATA_ATTRIBUTES.len())
    });
    attributes
}

fn dedupe(candidates: Vec<SelectorCandidate>) -> Vec<SelectorCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert((c.strategy, c.expression.clone())))
        .collect()
}

/// Usable unescaped as a CSS identifier (tag, id, class, attribute name)
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let leading_ok = match chars.next() {
        Some('-') => chars
            .clone()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_'),
        Some(c) => c.is_ascii_alphabetic() || c == '_',
        None => false,
    };
    leading_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Heuristic for ids and classes minted by build tooling or frameworks
pub fn looks_generated(value: &str) -> bool {
    // React useId (":r1:"), Radix ("radix-:R2:")
    if value.contains(':') {
        return true;
    }
    // styled-components / emotion ("sc-bdfBwQ", "css-1x2y3z")
    if let Some(rest) = value.strip_prefix("sc-").or_else(|| value.strip_prefix("css-")) {
        return !rest.is_empty();
    }
    // CSS modules ("Button_primary__3xY7a")
    if let Some((_, suffix)) = value.rsplit_once("__") {
        if suffix.len() >= 5 && suffix.chars().any(|c| c.is_ascii_digit()) {
            return true;
        }
    }

    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    let longest_digit_run = value
        .split(|c: char| !c.is_ascii_digit())
        .map(str::len)
        .max()
        .unwrap_or(0);
    if longest_digit_run >= 4 {
        return true;
    }

    // hash-like segment: letters and several digits interleaved, no separators
    value
        .split(['-', '_'])
        .any(|segment| {
            let seg_digits = segment.chars().filter(|c| c.is_ascii_digit()).count();
            segment.len() >= 6
                && seg_digits >= 2
                && seg_digits < segment.len()
                && segment.chars().all(|c| c.is_ascii_alphanumeric())
        })
        || (digits > 0 && digits * 2 >= value.len() && value.len() >= 6)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape for a double-quoted CSS string
fn css_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// XPath 1.0 string literal; falls back to `concat()` when both quote kinds occur
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value
        .split('\'')
        .map(|part| format!("'{part}'"))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

#[cfg(test)]
#[path = "synthesis_test.rs"]
mod synthesis_test;
