//! Canonical output names for imported models.
//!
//! Compiled model names carry a lot of noise, e.g.
//! `de_dust2_lr1_agg0_12_lp1_nz_nsh`. The canonical name keeps only the
//! parts that identify the geometry (aggregate or category tag, detail
//! marker, texture variant) and appends the per-model disambiguation hex so
//! names never collide across models.
//!
//! Each step is an ordered list of rules evaluated first-match-wins, so a new
//! tag can be added to a step without touching the others.

use std::sync::LazyLock;

use regex::Regex;

/// Everything after the last `lr<digits>_` prefix.
static ROUGH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*lr\d*_(.+)").expect("valid rough name pattern"));

static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid separator pattern"));

/// A named pattern that either matches a slice of its input or doesn't.
pub struct PatternRule {
    pub name: &'static str,
    regex: LazyLock<Regex>,
}

impl PatternRule {
    pub fn find<'a>(&self, haystack: &'a str) -> Option<&'a str> {
        self.regex.find(haystack).map(|m| m.as_str())
    }
}

macro_rules! pattern_rule {
    ($name:literal, $pattern:literal) => {
        PatternRule {
            name: $name,
            regex: LazyLock::new(|| Regex::new($pattern).expect($name)),
        }
    };
}

/// Tags that start the canonical name, searched in the rough name.
pub static START_RULES: [PatternRule; 2] = [
    pattern_rule!("aggregate group", r"agg\d*_\d*"),
    pattern_rule!("category", r"^[a-z]*\d*[a-z]*_"),
];

/// Detail markers, searched anywhere in the raw identifier.
pub static DETAIL_RULES: [PatternRule; 2] = [
    pattern_rule!("low poly", r"_lp\d*"),
    pattern_rule!("overlay", r"_overlay\d*"),
];

/// Texture variant suffixes. `_nz_nsh` must be tried before the shorter
/// suffixes it contains.
pub const VARIANT_SUFFIXES: [&str; 3] = ["_nz_nsh", "_nz", "_nsh"];

/// Return the match of the first rule in `rules` that matches `haystack`.
pub fn first_match<'a>(
    rules: &[PatternRule],
    haystack: &'a str,
) -> Option<(&'static str, &'a str)> {
    rules
        .iter()
        .find_map(|rule| rule.find(haystack).map(|m| (rule.name, m)))
}

/// Return the first suffix in `suffixes` that `haystack` ends with.
pub fn first_suffix<'s>(suffixes: &[&'s str], haystack: &str) -> Option<&'s str> {
    suffixes
        .iter()
        .copied()
        .find(|suffix| haystack.ends_with(suffix))
}

/// Collapse every run of `_` into a single `_`.
pub fn collapse_separators(name: &str) -> String {
    SEPARATOR_RUN.replace_all(name, "_").into_owned()
}

/// Derive the canonical name for `raw` (a model basename without extension)
/// disambiguated by `suffix`. An empty suffix leaves no trailing separator.
pub fn canonical_name(raw: &str, suffix: &str) -> String {
    let Some(rough) = ROUGH_NAME.captures(raw).and_then(|c| c.get(1)) else {
        return finish(format!("{raw}_{suffix}"), suffix);
    };

    let start = first_match(&START_RULES, rough.as_str())
        .map(|(_, tag)| tag)
        .unwrap_or(raw);

    let mut name = start.to_string();
    if let Some((_, detail)) = first_match(&DETAIL_RULES, raw) {
        name.push_str(detail);
    }
    if let Some(variant) = first_suffix(&VARIANT_SUFFIXES, raw) {
        name.push_str(variant);
    }
    name.push('_');
    name.push_str(suffix);

    finish(name, suffix)
}

/// Collapse separator runs. Only the separator left by an empty `suffix` is
/// trimmed, a non-empty one is kept verbatim.
fn finish(name: String, suffix: &str) -> String {
    let name = collapse_separators(&name);
    if !suffix.is_empty() {
        return name;
    }
    match name.strip_suffix('_') {
        Some(trimmed) => trimmed.to_string(),
        None => name,
    }
}
