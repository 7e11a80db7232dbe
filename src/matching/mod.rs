//! Attribute matching for C-FIND identifiers (PS3.4 C.2.2.2)
//!
//! [`matches`] decides whether a stored instance satisfies a query
//! identifier and [`project`] builds the identifier returned for a match.
//! Both are pure functions over attribute sets.

mod range;
mod wildcard;

use dicom_core::{Tag, VR};
use dicom_dictionary_std::tags;
use dimse::{Attribute, AttributeSet};

/// How a single query key is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Empty value, `*`, or a sequence key: every candidate matches
    Universal,
    /// Exact match on one value
    Single,
    /// Backslash-separated list of UIDs, any of which may match
    UidList,
    /// `*` and `?` wildcards on a string value
    Wildcard,
    /// Inclusive date/time range, open on either side
    Range,
}

/// Keys that describe the query itself rather than the objects searched
const CONTROL_KEYS: [Tag; 2] = [tags::QUERY_RETRIEVE_LEVEL, tags::SPECIFIC_CHARACTER_SET];

fn is_date_time(vr: VR) -> bool {
    matches!(vr, VR::DA | VR::TM | VR::DT)
}

/// VRs whose values may carry wildcards
fn supports_wildcards(vr: VR) -> bool {
    matches!(
        vr,
        VR::AE | VR::CS | VR::LO | VR::LT | VR::PN | VR::SH | VR::ST | VR::UC | VR::UT
    )
}

pub fn classify(attr: &Attribute) -> MatchKind {
    let value = attr.trimmed();
    if attr.vr == VR::SQ || value.is_empty() || value.chars().all(|c| c == '*') {
        return MatchKind::Universal;
    }
    if attr.vr == VR::UI && value.contains('\\') {
        return MatchKind::UidList;
    }
    if is_date_time(attr.vr) && range::split_bounds(attr.vr, value).is_some() {
        return MatchKind::Range;
    }
    if supports_wildcards(attr.vr) && value.contains(['*', '?']) {
        return MatchKind::Wildcard;
    }
    MatchKind::Single
}

/// Keys of the query that participate in matching
fn match_keys(query: &AttributeSet) -> impl Iterator<Item = (&Tag, &Attribute)> {
    query
        .iter()
        .filter(|(tag, _)| !CONTROL_KEYS.contains(*tag) && tag.group() != 0x0000)
}

/// Whether `candidate` satisfies every key of `query`
pub fn matches(query: &AttributeSet, candidate: &AttributeSet) -> bool {
    match_keys(query).all(|(tag, key)| {
        let kind = classify(key);
        if kind == MatchKind::Universal {
            return true;
        }
        let Some(value) = candidate.get(*tag) else {
            return false;
        };
        match_value(kind, key, value)
    })
}

fn match_value(kind: MatchKind, key: &Attribute, candidate: &Attribute) -> bool {
    let wanted = key.trimmed();
    match kind {
        MatchKind::Universal => true,
        MatchKind::Single => candidate.values().any(|v| v == wanted),
        MatchKind::UidList => {
            let uids: Vec<&str> = key.values().collect();
            candidate.values().any(|v| uids.contains(&v))
        }
        MatchKind::Wildcard => candidate.values().any(|v| wildcard::matches(wanted, v)),
        MatchKind::Range => match range::DateTimeRange::parse(key.vr, wanted) {
            Some(range) => candidate.values().any(|v| range.contains(v)),
            None => false,
        },
    }
}

/// Identifier returned for a matching candidate: every query key with the
/// candidate's value (zero length when the candidate lacks it), plus the SOP
/// Class and SOP Instance UIDs.
pub fn project(query: &AttributeSet, candidate: &AttributeSet) -> AttributeSet {
    let mut response = AttributeSet::new();

    for (tag, key) in query.iter() {
        if *tag == tags::QUERY_RETRIEVE_LEVEL {
            response.put(*tag, key.vr, key.value.as_str());
            continue;
        }
        if *tag == tags::SPECIFIC_CHARACTER_SET || key.vr == VR::SQ {
            continue;
        }
        match candidate.get(*tag) {
            Some(value) => response.put(*tag, value.vr, value.value.as_str()),
            None => response.put(*tag, key.vr, ""),
        };
    }

    if let Some(charset) = candidate.get(tags::SPECIFIC_CHARACTER_SET) {
        response.put(tags::SPECIFIC_CHARACTER_SET, charset.vr, charset.value.as_str());
    }
    for tag in [tags::SOP_CLASS_UID, tags::SOP_INSTANCE_UID] {
        if let Some(value) = candidate.get(tag) {
            response.put(tag, value.vr, value.value.as_str());
        }
    }

    response
}

/// Single-value keys of the query, usable for exact index lookups
pub fn exact_keys(query: &AttributeSet) -> Vec<(Tag, &str)> {
    match_keys(query)
        .filter(|(_, key)| classify(key) == MatchKind::Single)
        .map(|(tag, key)| (*tag, key.trimmed()))
        .collect()
}
