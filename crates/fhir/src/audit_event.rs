//! AuditEvent resource extraction.
//!
//! Audit events record who touched a prescription and when. They are
//! immutable: created only by extraction, never mutated.
//!
//! The human-readable description arrives wrapped in a fixed XHTML envelope;
//! the envelope markers are stripped verbatim rather than parsed, since the
//! broker emits them byte-identically.

use crate::{parser, FhirResult, PRESCRIPTION_ID_SYSTEM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile identifying an audit event, pinned to the broker revision
/// currently served.
pub const AUDIT_EVENT_PROFILE: &str =
    "https://gematik.de/fhir/StructureDefinition/ErxAuditEvent";

/// Version constraint for [`AUDIT_EVENT_PROFILE`].
pub const AUDIT_EVENT_PROFILE_VERSION: &str = "1.1.1";

const XHTML_DIV_OPEN: &str = "<div xmlns=\"http://www.w3.org/1999/xhtml\">";
const XHTML_DIV_CLOSE: &str = "</div>";

/// One extracted audit event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Server-issued id of this event.
    pub id: String,

    /// Id of the task the event refers to, when it refers to one.
    pub task_id: Option<String>,

    /// Plain-text description, with the XHTML envelope removed.
    pub description: String,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Extracts all audit events from a bundle.
///
/// Entries whose profile is not the pinned audit-event profile are skipped
/// silently; the returned count still reflects the full bundle. Records are
/// handed to `sink` in document order, after the whole bundle decoded
/// successfully.
///
/// # Errors
///
/// Returns [`FhirError::MissingField`](crate::FhirError::MissingField) /
/// [`FhirError::MistypedField`](crate::FhirError::MistypedField) when a
/// matching entry lacks a usable `id`, `text.div` or `recorded`.
pub fn extract_audit_events<F>(bundle: &Value, mut sink: F) -> FhirResult<usize>
where
    F: FnMut(AuditEvent),
{
    let total = parser::contained_array_or_null(bundle, "entry").map_or(0, |entries| entries.len());

    let resources = parser::filter_with(
        parser::find_all(bundle, "entry.resource"),
        "meta.profile",
        parser::profile_value(AUDIT_EVENT_PROFILE, Some(AUDIT_EVENT_PROFILE_VERSION)),
    );

    let mut records = Vec::new();
    for resource in resources {
        records.push(decode_audit_event(resource)?);
    }

    tracing::debug!(total, matched = records.len(), "extracted audit events");

    for record in records {
        sink(record);
    }

    Ok(total)
}

fn decode_audit_event(resource: &Value) -> FhirResult<AuditEvent> {
    let id = parser::contained_string(resource, "id")?.to_owned();
    let text = parser::contained_string(parser::contained(resource, "text")?, "div")?;

    let task_id = parser::filter_with(
        parser::find_all(resource, "entity.what.identifier"),
        "system",
        parser::string_value(PRESCRIPTION_ID_SYSTEM),
    )
    .next()
    .and_then(|identifier| parser::contained_string_or_null(identifier, "value"))
    .map(str::to_owned);

    let timestamp = parser::contained_instant(resource, "recorded")?;

    let description = strip_surrounding(text, XHTML_DIV_OPEN, XHTML_DIV_CLOSE).to_owned();

    Ok(AuditEvent {
        id,
        task_id,
        description,
        timestamp,
    })
}

/// Removes `prefix` and `suffix` when both are present, otherwise returns
/// the text unchanged.
fn strip_surrounding<'a>(text: &'a str, prefix: &str, suffix: &str) -> &'a str {
    text.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .unwrap_or(text)
}
