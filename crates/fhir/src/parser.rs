//! Generic path navigation over the parsed bundle tree.
//!
//! A bundle is a [`serde_json::Value`] mixing several resource kinds under
//! one generic container. This module provides the primitives the extractors
//! are built on:
//! - lazy descent by dotted path with array flattening ([`find_all`])
//! - composable predicate filtering ([`filter_with`] with [`string_value`]
//!   and [`profile_value`] matchers)
//! - fail-fast scalar accessors that distinguish an absent key from a value
//!   of the wrong shape
//!
//! Navigation never mutates the tree. Absent keys or type mismatches while
//! descending short-circuit that branch to an empty sub-sequence; only the
//! scalar accessors turn absence into an error.

use crate::{FhirError, FhirResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

// ============================================================================
// Path traversal
// ============================================================================

/// Returns all sub-nodes reached from `root` by descending through the
/// dotted `path`, flattening arrays at every segment.
///
/// The returned iterator is lazy, finite and single-pass; give each
/// traversal its own instance. Emitted nodes are never arrays: any array
/// encountered along the way is expanded into its elements.
///
/// # Arguments
///
/// * `root` - The node to start from.
/// * `path` - Dot-separated object keys, for example `"entry.resource"`.
pub fn find_all<'a>(root: &'a Value, path: &'a str) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
    path.split('.').fold(flatten(root), |nodes, segment| {
        Box::new(nodes.flat_map(move |node| step(node, segment)))
    })
}

/// Keeps the nodes for which any value reached via `path` satisfies the
/// matcher.
///
/// Mirrors the common FHIR lookup "the identifier whose `system` is X":
/// `filter_with(find_all(resource, "identifier"), "system", string_value(X))`.
pub fn filter_with<'a, I, M>(
    nodes: I,
    path: &'a str,
    matcher: M,
) -> impl Iterator<Item = &'a Value> + 'a
where
    I: Iterator<Item = &'a Value> + 'a,
    M: Fn(&Value) -> bool + 'a,
{
    nodes.filter(move |node| find_all(node, path).any(|value| matcher(value)))
}

fn flatten<'a>(node: &'a Value) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
    match node {
        Value::Array(items) => Box::new(items.iter().flat_map(flatten)),
        other => Box::new(std::iter::once(other)),
    }
}

fn step<'a>(node: &'a Value, segment: &str) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
    match node {
        Value::Object(map) => match map.get(segment) {
            Some(child) => flatten(child),
            None => Box::new(std::iter::empty()),
        },
        // Scalars cannot be descended into; this branch yields nothing.
        _ => Box::new(std::iter::empty()),
    }
}

// ============================================================================
// Matchers
// ============================================================================

/// Matches a scalar string exactly.
pub fn string_value(expected: &str) -> impl Fn(&Value) -> bool + '_ {
    move |value| value.as_str() == Some(expected)
}

/// Matches a recorded profile identifier against a canonical URI and an
/// optional version constraint.
///
/// The recorded value may be spelled `URI` or `URI|version`. The URI must
/// match exactly; omitting the version matches any recorded version, a
/// deliberate compatibility concession for documents produced by slightly
/// different server revisions.
pub fn profile_value<'a>(uri: &'a str, version: Option<&'a str>) -> impl Fn(&Value) -> bool + 'a {
    move |value| {
        let Some(recorded) = value.as_str() else {
            return false;
        };
        let (recorded_uri, recorded_version) = match recorded.split_once('|') {
            Some((head, tail)) => (head, Some(tail)),
            None => (recorded, None),
        };
        recorded_uri == uri && version.map_or(true, |required| recorded_version == Some(required))
    }
}

// ============================================================================
// Scalar accessors
// ============================================================================

/// Returns the value under `key`, looking through a single wrapping array.
///
/// FHIR wraps most singleton fields in one-element arrays (`basedOn`,
/// `recipient`, `payload`); this accessor descends into the first element
/// before reading the key.
///
/// # Errors
///
/// Returns [`FhirError::MissingField`] if the key is absent (or the wrapping
/// array is empty) and [`FhirError::MistypedField`] if the node holding the
/// key is not an object.
pub fn contained<'a>(node: &'a Value, key: &str) -> FhirResult<&'a Value> {
    let node = match node {
        Value::Array(items) => items.first().ok_or_else(|| FhirError::MissingField {
            path: key.to_owned(),
        })?,
        other => other,
    };

    match node {
        Value::Object(map) => map.get(key).ok_or_else(|| FhirError::MissingField {
            path: key.to_owned(),
        }),
        _ => Err(FhirError::MistypedField {
            path: key.to_owned(),
            expected: "object",
        }),
    }
}

/// Variant of [`contained`] that reports absence as `None` instead of
/// failing. Explicit JSON `null` counts as absent.
pub fn contained_or_null<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    let node = match node {
        Value::Array(items) => items.first()?,
        other => other,
    };
    node.as_object()?.get(key).filter(|value| !value.is_null())
}

/// Returns the string under `key`.
///
/// # Errors
///
/// Returns [`FhirError::MissingField`] if the key is absent and
/// [`FhirError::MistypedField`] if the value is not a string.
pub fn contained_string<'a>(node: &'a Value, key: &str) -> FhirResult<&'a str> {
    match contained(node, key)? {
        Value::String(text) => Ok(text),
        _ => Err(FhirError::MistypedField {
            path: key.to_owned(),
            expected: "string",
        }),
    }
}

/// Variant of [`contained_string`] that reports absence (or a non-string
/// value) as `None` instead of failing.
pub fn contained_string_or_null<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    contained_or_null(node, key).and_then(Value::as_str)
}

/// Returns the array under `key`, or `None` if absent or not an array.
pub fn contained_array_or_null<'a>(node: &'a Value, key: &str) -> Option<&'a [Value]> {
    contained_or_null(node, key).and_then(Value::as_array).map(Vec::as_slice)
}

/// Interprets a scalar node as a FHIR instant.
///
/// Accepts RFC 3339 date-times (`instant`/`dateTime`) and bare
/// `YYYY-MM-DD` dates, the latter read as midnight UTC.
///
/// # Errors
///
/// Returns [`FhirError::MistypedField`] (under `path`) if the node is not a
/// string in either format.
pub fn as_instant(value: &Value, path: &str) -> FhirResult<DateTime<Utc>> {
    value
        .as_str()
        .and_then(parse_instant)
        .ok_or_else(|| FhirError::MistypedField {
            path: path.to_owned(),
            expected: "instant",
        })
}

/// Returns the instant under `key`, failing fast when absent or malformed.
pub fn contained_instant(node: &Value, key: &str) -> FhirResult<DateTime<Utc>> {
    as_instant(contained(node, key)?, key)
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "entry": [
                { "resource": { "id": "a", "meta": { "profile": ["urn:x|1.1.1"] } } },
                { "resource": { "id": "b", "meta": { "profile": ["urn:y"] } } },
                { "resource": { "id": "c" } }
            ]
        })
    }

    #[test]
    fn find_all_flattens_arrays_at_each_segment() {
        let bundle = sample_bundle();
        let ids: Vec<_> = find_all(&bundle, "entry.resource.id")
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn find_all_yields_nothing_for_absent_key() {
        let bundle = sample_bundle();
        assert_eq!(find_all(&bundle, "entry.missing.id").count(), 0);
    }

    #[test]
    fn find_all_short_circuits_on_scalar_mid_path() {
        let node = json!({ "entry": "not-an-object" });
        assert_eq!(find_all(&node, "entry.resource").count(), 0);
    }

    #[test]
    fn filter_with_keeps_matching_nodes_only() {
        let bundle = sample_bundle();
        let matched: Vec<_> = filter_with(
            find_all(&bundle, "entry.resource"),
            "meta.profile",
            profile_value("urn:x", None),
        )
        .filter_map(|resource| contained_string_or_null(resource, "id"))
        .collect();
        assert_eq!(matched, vec!["a"]);
    }

    #[test]
    fn profile_value_without_version_matches_any_spelling() {
        let matcher = profile_value("urn:x", None);
        assert!(matcher(&json!("urn:x")));
        assert!(matcher(&json!("urn:x|1.1.1")));
        assert!(matcher(&json!("urn:x|1.2")));
        assert!(!matcher(&json!("urn:xy")));
        assert!(!matcher(&json!(42)));
    }

    #[test]
    fn profile_value_with_version_requires_exact_pairing() {
        let matcher = profile_value("urn:x", Some("1.1.1"));
        assert!(matcher(&json!("urn:x|1.1.1")));
        assert!(!matcher(&json!("urn:x")));
        assert!(!matcher(&json!("urn:x|1.2")));
    }

    #[test]
    fn contained_looks_through_wrapping_array() {
        let node = json!({ "basedOn": [{ "reference": "Task/1" }] });
        let based_on = contained(&node, "basedOn").expect("basedOn present");
        let reference = contained_string(based_on, "reference").expect("reference present");
        assert_eq!(reference, "Task/1");
    }

    #[test]
    fn contained_string_distinguishes_absent_from_mistyped() {
        let node = json!({ "sent": 42 });

        match contained_string(&node, "missing") {
            Err(FhirError::MissingField { path }) => assert_eq!(path, "missing"),
            other => panic!("expected MissingField, got {other:?}"),
        }

        match contained_string(&node, "sent") {
            Err(FhirError::MistypedField { path, expected }) => {
                assert_eq!(path, "sent");
                assert_eq!(expected, "string");
            }
            other => panic!("expected MistypedField, got {other:?}"),
        }
    }

    #[test]
    fn contained_string_or_null_swallows_absence() {
        let node = json!({ "payload": { "contentString": null } });
        let payload = contained(&node, "payload").expect("payload present");
        assert_eq!(contained_string_or_null(payload, "contentString"), None);
        assert_eq!(contained_string_or_null(payload, "missing"), None);
    }

    #[test]
    fn as_instant_accepts_date_times_and_dates() {
        let instant =
            as_instant(&json!("2022-01-30T10:15:00Z"), "sent").expect("date-time parses");
        assert_eq!(instant.to_rfc3339(), "2022-01-30T10:15:00+00:00");

        let midnight = as_instant(&json!("2021-06-10"), "valueDate").expect("date parses");
        assert_eq!(midnight.to_rfc3339(), "2021-06-10T00:00:00+00:00");
    }

    #[test]
    fn as_instant_rejects_garbage() {
        match as_instant(&json!("soon"), "sent") {
            Err(FhirError::MistypedField { path, expected }) => {
                assert_eq!(path, "sent");
                assert_eq!(expected, "instant");
            }
            other => panic!("expected MistypedField, got {other:?}"),
        }
    }
}
