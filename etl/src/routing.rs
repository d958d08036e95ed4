//! Expansion of wildcard index patterns into per-index source objects.

use crate::types::{ObjectKind, SourceObject};

/// Returns `true` when `name` is a wildcard pattern rather than a concrete object.
pub fn is_pattern(name: &str) -> bool {
    name.contains('*')
}

/// Matches `name` against a pattern in which `*` stands for any run of characters.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return pattern == name;
    };
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };

    let middle: Vec<&str> = parts.collect();
    let Some((last, middle)) = middle.split_last() else {
        // No wildcard at all.
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}

/// Derives the destination table prefix of a pattern object.
///
/// `perfhist-*` yields `perfhist`. An explicit destination without wildcards is used as is.
pub fn destination_prefix(object: &SourceObject) -> String {
    let base = if is_pattern(&object.destination) {
        object.destination.split('*').next().unwrap_or_default()
    } else {
        object.destination.as_str()
    };

    base.trim_end_matches(['-', '_', '.'])
        .replace(['-', '.'], "_")
}

/// Picks the destination table for one index matched by a pattern.
///
/// The first keyword contained in the index name wins. Otherwise the second dash-separated
/// segment of the index name is used, and indices without one land in `<prefix>_other`.
pub fn route_index(index: &str, prefix: &str, keywords: &[String]) -> String {
    let lowered = index.to_lowercase();
    if let Some(keyword) = keywords
        .iter()
        .find(|keyword| lowered.contains(&keyword.to_lowercase()))
    {
        return format!("{prefix}_{}", keyword.to_lowercase());
    }

    match index.split('-').nth(1) {
        Some(segment) if !segment.is_empty() => format!("{prefix}_{segment}"),
        _ => format!("{prefix}_other"),
    }
}

/// Expands a pattern object into one object per matched index.
pub fn expand_pattern(object: &SourceObject, indices: &[String]) -> Vec<SourceObject> {
    let prefix = destination_prefix(object);

    indices
        .iter()
        .map(|index| {
            let mut expanded = object.clone();
            expanded.name = index.clone();
            expanded.destination = route_index(index, &prefix, &object.route_keywords);
            expanded
        })
        .collect()
}

/// Returns `true` when the object must be expanded before it can be processed.
pub fn needs_expansion(object: &SourceObject) -> bool {
    object.kind == ObjectKind::SearchIndex && is_pattern(&object.name)
}
