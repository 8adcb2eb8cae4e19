use std::cmp::Ordering;

use node_semver::Version;

/// Lenient semantic-version parse: a leading `v` is dropped and missing minor
/// or patch parts are filled with zero.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let mut normalized = parts.join(".");
    for _ in parts.len()..3 {
        normalized.push_str(".0");
    }
    normalized.push_str(suffix);
    Version::parse(&normalized).ok()
}

/// Order version names newest first.
///
/// Semantic versions come before everything else and compare semantically;
/// the remaining names compare lexicographically descending. Ties between
/// equal semantic versions (`v1.0` and `1.0.0`) fall back to the text so the
/// order stays total.
pub fn compare_desc(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => vb.cmp(&va).then_with(|| b.cmp(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    }
}

pub fn sort_versions_desc(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_desc(a, b));
}

/// Whether `version` is current relative to `latest`.
///
/// References that always track the newest release (`HEAD`, the default
/// branch, `~latest`) count as current.
pub fn is_up_to_date(version: &str, latest: &str, latest_refs: &[&str]) -> bool {
    if version.is_empty() || latest.is_empty() {
        return false;
    }
    if version == latest || latest_refs.contains(&version) {
        return true;
    }
    match (parse_version(version), parse_version(latest)) {
        (Some(current), Some(newest)) => current >= newest,
        _ => false,
    }
}
