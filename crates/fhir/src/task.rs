//! Task resource extraction.
//!
//! A task resource carries the prescription's lifecycle status, its validity
//! window and the access code required to redeem it. The extractor yields
//! the flat [`TaskRecord`]; assembling the full task aggregate (medication,
//! dispenses, communications) out of several bundles is the calling store's
//! job.

use crate::{parser, FhirResult, ACCESS_CODE_SYSTEM, PRESCRIPTION_ID_SYSTEM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile identifying a prescription task, pinned to the broker revision
/// currently served.
pub const TASK_PROFILE: &str = "https://gematik.de/fhir/StructureDefinition/ErxTask";

/// Version constraint for [`TASK_PROFILE`].
pub const TASK_PROFILE_VERSION: &str = "1.1.1";

/// Extension carrying the end of the redemption window.
pub const EXPIRY_DATE_EXTENSION: &str =
    "https://gematik.de/fhir/StructureDefinition/ExpiryDate";

/// Extension carrying the end of the pharmacy acceptance window.
pub const ACCEPT_DATE_EXTENSION: &str =
    "https://gematik.de/fhir/StructureDefinition/AcceptDate";

/// Lifecycle status of a prescription task.
///
/// Mirrors the FHIR task status codes; codes this client has no behaviour
/// for collapse into [`TaskStatus::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Ready,
    InProgress,
    Completed,
    Draft,
    Requested,
    Received,
    Accepted,
    Rejected,
    Canceled,
    OnHold,
    Failed,
    Other,
}

impl TaskStatus {
    /// Maps a FHIR task status code onto the enumeration.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ready" => TaskStatus::Ready,
            "in-progress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "draft" => TaskStatus::Draft,
            "requested" => TaskStatus::Requested,
            "received" => TaskStatus::Received,
            "accepted" => TaskStatus::Accepted,
            "rejected" => TaskStatus::Rejected,
            "cancelled" => TaskStatus::Canceled,
            "on-hold" => TaskStatus::OnHold,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Other,
        }
    }
}

/// One extracted task resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Server-issued task id.
    pub task_id: String,

    /// Prescription identifier, when stamped.
    pub prescription_id: Option<String>,

    /// Capability token required to redeem or communicate about the task.
    pub access_code: Option<String>,

    /// Lifecycle status.
    pub status: TaskStatus,

    /// When the prescription was issued.
    pub authored_on: DateTime<Utc>,

    /// When the task last changed on the broker.
    pub last_modified: DateTime<Utc>,

    /// End of the redemption window.
    pub expires_on: Option<DateTime<Utc>>,

    /// End of the pharmacy acceptance window.
    pub accept_until: Option<DateTime<Utc>>,
}

/// Extracts all task resources from a bundle.
///
/// Entries whose profile is not the pinned task profile are skipped
/// silently; the returned count still reflects the full bundle. Records are
/// handed to `sink` in document order, after the whole bundle decoded
/// successfully.
///
/// # Errors
///
/// Returns [`FhirError::MissingField`](crate::FhirError::MissingField) /
/// [`FhirError::MistypedField`](crate::FhirError::MistypedField) when a
/// matching entry lacks a usable `id`, `status`, `authoredOn` or
/// `lastModified`, or carries a window extension without a readable date.
pub fn extract_tasks<F>(bundle: &Value, mut sink: F) -> FhirResult<usize>
where
    F: FnMut(TaskRecord),
{
    let total = parser::contained_array_or_null(bundle, "entry").map_or(0, |entries| entries.len());

    let resources = parser::filter_with(
        parser::find_all(bundle, "entry.resource"),
        "meta.profile",
        parser::profile_value(TASK_PROFILE, Some(TASK_PROFILE_VERSION)),
    );

    let mut records = Vec::new();
    for resource in resources {
        records.push(decode_task(resource)?);
    }

    tracing::debug!(total, matched = records.len(), "extracted tasks");

    for record in records {
        sink(record);
    }

    Ok(total)
}

fn decode_task(resource: &Value) -> FhirResult<TaskRecord> {
    let task_id = parser::contained_string(resource, "id")?.to_owned();
    let status = TaskStatus::from_code(parser::contained_string(resource, "status")?);
    let authored_on = parser::contained_instant(resource, "authoredOn")?;
    let last_modified = parser::contained_instant(resource, "lastModified")?;

    let prescription_id = identifier_value(resource, PRESCRIPTION_ID_SYSTEM);
    let access_code = identifier_value(resource, ACCESS_CODE_SYSTEM);

    let expires_on = extension_date(resource, EXPIRY_DATE_EXTENSION)?;
    let accept_until = extension_date(resource, ACCEPT_DATE_EXTENSION)?;

    Ok(TaskRecord {
        task_id,
        prescription_id,
        access_code,
        status,
        authored_on,
        last_modified,
        expires_on,
        accept_until,
    })
}

fn identifier_value(resource: &Value, system: &str) -> Option<String> {
    parser::filter_with(
        parser::find_all(resource, "identifier"),
        "system",
        parser::string_value(system),
    )
    .next()
    .and_then(|identifier| parser::contained_string_or_null(identifier, "value"))
    .map(str::to_owned)
}

fn extension_date(resource: &Value, url: &str) -> FhirResult<Option<DateTime<Utc>>> {
    match parser::filter_with(
        parser::find_all(resource, "extension"),
        "url",
        parser::string_value(url),
    )
    .next()
    {
        Some(extension) => parser::contained_instant(extension, "valueDate").map(Some),
        None => Ok(None),
    }
}
