//! Version-aware ordering of image tags.
//!
//! Tags are compared as semantic versions whenever possible. Parsing is lenient the way
//! registry tooling usually is: a leading `v` is accepted and missing minor or patch
//! components count as zero, so `v1.2` orders as `1.2.0`. Leading zeros are dropped
//! from numeric components, so date tags like `2024.01.05` order as `2024.1.5`.

use semver::Version;

/// Tags that never denote a fixed version.
pub const FLOATING_TAGS: &[&str] = &["latest"];

pub fn is_floating(tag: &str) -> bool {
    FLOATING_TAGS.contains(&tag)
}

/// Parses a tag as a semantic version, returning `None` for anything else.
pub fn parse(tag: &str) -> Option<Version> {
    let tag = tag.trim();
    let tag = tag
        .strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag);

    let split = tag.find(['-', '+']).unwrap_or(tag.len());
    let (core, suffix) = tag.split_at(split);

    let components: Vec<&str> = core.split('.').collect();
    if components.is_empty()
        || components.len() > 3
        || components
            .iter()
            .any(|c| c.is_empty() || !c.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = components
        .iter()
        .map(|c| match c.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        })
        .collect::<Vec<_>>()
        .join(".");
    for _ in components.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).ok()
}

/// Returns the most recent of `versions`, or an empty string when there are none.
///
/// If at least one entry parses as a semantic version, entries that do not are ignored
/// and the highest semantic version wins. Only when nothing parses does the
/// lexicographically greatest string win. As a consequence a non-semver tag is never
/// chosen over a semver one, even if it sorts higher as a string.
pub fn latest<S: AsRef<str>>(versions: &[S]) -> String {
    let parsed = versions
        .iter()
        .filter_map(|v| parse(v.as_ref()).map(|parsed| (parsed, v.as_ref())));

    if let Some((_, original)) = parsed.max_by(|(a, _), (b, _)| a.cmp(b)) {
        return original.to_string();
    }

    versions
        .iter()
        .map(AsRef::as_ref)
        .max()
        .unwrap_or_default()
        .to_string()
}
