//! Communication resource extraction and the outbound dispense request.
//!
//! Communications are the protocol messages exchanged about a prescription
//! task: the dispense request a patient sends to a pharmacy, and the
//! pharmacy's reply. Both arrive mixed into one bundle and are discriminated
//! by their profile identifier.
//!
//! Responsibilities:
//! - discriminate and decode Communication resources into typed records
//! - derive the owning task id from the `basedOn` capability reference
//! - build the outbound dispense-request document

use crate::{parser, FhirError, FhirResult, ORDER_ID_SYSTEM, TELEMATIK_ID_SYSTEM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Profile identifying a dispense request sent to a pharmacy.
pub const DISPENSE_REQUEST_PROFILE: &str =
    "https://gematik.de/fhir/StructureDefinition/ErxCommunicationDispReq";

/// Profile identifying a pharmacy reply.
///
/// Replies have been observed unversioned as well as versioned (`1.1.1`,
/// `1.2`); discrimination therefore ignores the recorded version.
pub const REPLY_PROFILE: &str =
    "https://gematik.de/fhir/StructureDefinition/ErxCommunicationReply";

/// Semantic kind of a Communication resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunicationProfile {
    /// A dispense request sent to a pharmacy.
    DispenseRequest,
    /// A pharmacy reply.
    Reply,
}

/// One extracted Communication record.
///
/// Created only by extraction or by local submission of a dispense request;
/// never mutated afterwards. Stores deduplicate by `communication_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Communication {
    /// Id of the task this message is about, derived from `basedOn`.
    pub task_id: String,

    /// Server-issued id of this message.
    pub communication_id: String,

    /// Pharmacy order id, when the message carries one.
    pub order_id: Option<String>,

    /// Whether this is a dispense request or a reply.
    pub profile: CommunicationProfile,

    /// When the message was sent.
    pub sent_on: DateTime<Utc>,

    /// Telematik-ID of the sender. Locally constructed dispense requests
    /// carry none until the broker stamps it.
    pub sender: Option<String>,

    /// Telematik-ID of the recipient.
    pub recipient: String,

    /// Opaque message payload, serialized JSON for dispense requests.
    pub payload: Option<String>,
}

/// Extracts all Communication resources from a bundle.
///
/// Every `entry.resource` must be a Communication carrying a recognised
/// profile. Records are handed to `sink` in document order, but only after
/// the whole bundle decoded successfully; a corrupt entry aborts the call
/// before the sink observes anything.
///
/// # Returns
///
/// The total number of entries in the bundle, independent of how many were
/// communications (for diagnostic/progress use).
///
/// # Errors
///
/// Returns [`FhirError::UnknownProfile`] for an unrecognised profile,
/// [`FhirError::MalformedReference`] for a `basedOn` reference not shaped
/// `Task/<id>/...`, and [`FhirError::MissingField`]/
/// [`FhirError::MistypedField`] for unusable mandatory fields.
pub fn extract_communications<F>(bundle: &Value, mut sink: F) -> FhirResult<usize>
where
    F: FnMut(Communication),
{
    let total = parser::contained_array_or_null(bundle, "entry").map_or(0, |entries| entries.len());

    let mut records = Vec::new();
    for resource in parser::find_all(bundle, "entry.resource") {
        records.push(decode_communication(resource)?);
    }

    tracing::debug!(total, matched = records.len(), "extracted communications");

    for record in records {
        sink(record);
    }

    Ok(total)
}

fn decode_communication(resource: &Value) -> FhirResult<Communication> {
    let recorded = parser::find_all(resource, "meta.profile")
        .next()
        .ok_or_else(|| FhirError::MissingField {
            path: "meta.profile".to_owned(),
        })?;

    let profile = if parser::profile_value(DISPENSE_REQUEST_PROFILE, None)(recorded) {
        CommunicationProfile::DispenseRequest
    } else if parser::profile_value(REPLY_PROFILE, None)(recorded) {
        CommunicationProfile::Reply
    } else {
        return Err(FhirError::UnknownProfile {
            profile: recorded.as_str().unwrap_or_default().to_owned(),
        });
    };

    let reference = parser::contained_string(parser::contained(resource, "basedOn")?, "reference")?;
    let task_id = task_id_from_reference(reference)?;

    let order_id = parser::filter_with(
        parser::find_all(resource, "identifier"),
        "system",
        parser::string_value(ORDER_ID_SYSTEM),
    )
    .next()
    .and_then(|identifier| parser::contained_string_or_null(identifier, "value"))
    .map(str::to_owned);

    let communication_id = parser::contained_string(resource, "id")?.to_owned();
    let sent_on = parser::contained_instant(resource, "sent")?;

    let sender = parser::find_all(resource, "sender.identifier.value")
        .next()
        .and_then(Value::as_str)
        .map(str::to_owned);

    let recipient = parser::contained_string(
        parser::contained(parser::contained(resource, "recipient")?, "identifier")?,
        "value",
    )?
    .to_owned();

    let payload =
        parser::contained_string_or_null(parser::contained(resource, "payload")?, "contentString")
            .map(str::to_owned);

    Ok(Communication {
        task_id,
        communication_id,
        order_id,
        profile,
        sent_on,
        sender,
        recipient,
        payload,
    })
}

/// Derives the task id from a `Task/<id>/$accept?ac=<code>` reference.
fn task_id_from_reference(reference: &str) -> FhirResult<String> {
    let mut segments = reference.splitn(3, '/');
    match (segments.next(), segments.next()) {
        (Some("Task"), Some(id)) if !id.is_empty() => Ok(id.to_owned()),
        _ => Err(FhirError::MalformedReference {
            reference: reference.to_owned(),
        }),
    }
}

/// Builds an outbound dispense-request Communication document.
///
/// The payload is serialized to a compact JSON string and embedded, together
/// with the order id, the task-plus-access-code reference and the recipient
/// Telematik-ID, into the fixed envelope shape the broker expects. Building
/// the document through [`json!`] guarantees every embedded value is a
/// correctly quoted and escaped JSON literal.
///
/// The broker stamps the sender on upload; `sent_on` is caller-supplied so
/// the constructed document is itself a complete Communication resource.
///
/// # Errors
///
/// Returns [`FhirError::Payload`] if the payload fails to serialize.
pub fn create_dispense_request<P>(
    order_id: &str,
    task_id: &str,
    access_code: &str,
    recipient_tid: &str,
    sent_on: DateTime<Utc>,
    payload: &P,
) -> FhirResult<Value>
where
    P: Serialize + ?Sized,
{
    let payload = serde_json::to_string(payload)?;
    let reference = format!("Task/{task_id}/$accept?ac={access_code}");

    Ok(json!({
        "resourceType": "Communication",
        "meta": {
            "profile": [
                DISPENSE_REQUEST_PROFILE
            ]
        },
        "identifier": [
            {
                "system": ORDER_ID_SYSTEM,
                "value": order_id
            }
        ],
        "status": "unknown",
        "basedOn": [
            {
                "reference": reference
            }
        ],
        "recipient": [
            {
                "identifier": {
                    "system": TELEMATIK_ID_SYSTEM,
                    "value": recipient_tid
                }
            }
        ],
        "sent": sent_on.to_rfc3339(),
        "payload": [
            {
                "contentString": payload
            }
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn communication_resource(id: &str, profile: &str, sent: &str) -> Value {
        json!({
            "resourceType": "Communication",
            "id": id,
            "meta": { "profile": [profile] },
            "basedOn": [{ "reference": "Task/160.000.000.036.519.13/$accept?ac=c0de" }],
            "identifier": [{
                "system": ORDER_ID_SYSTEM,
                "value": "order-7"
            }],
            "sent": sent,
            "sender": { "identifier": { "value": "3-SMC-B-Testkarte-883110000123465" } },
            "recipient": [{ "identifier": { "value": "3-05.2.1007600000.080" } }],
            "payload": [{ "contentString": "Eisenkapseln" }]
        })
    }

    fn bundle_of(resources: Vec<Value>) -> Value {
        let entries: Vec<Value> = resources
            .into_iter()
            .map(|resource| json!({ "resource": resource }))
            .collect();
        json!({ "resourceType": "Bundle", "entry": entries })
    }

    #[test]
    fn extracts_requests_and_replies_in_document_order() {
        let bundle = bundle_of(vec![
            communication_resource("c1", DISPENSE_REQUEST_PROFILE, "2022-01-10T09:00:00Z"),
            communication_resource("c2", REPLY_PROFILE, "2022-01-10T10:00:00Z"),
        ]);

        let mut records = Vec::new();
        let total =
            extract_communications(&bundle, |record| records.push(record)).expect("extraction");

        assert_eq!(total, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].communication_id, "c1");
        assert_eq!(records[0].profile, CommunicationProfile::DispenseRequest);
        assert_eq!(records[0].task_id, "160.000.000.036.519.13");
        assert_eq!(records[0].order_id.as_deref(), Some("order-7"));
        assert_eq!(
            records[0].sender.as_deref(),
            Some("3-SMC-B-Testkarte-883110000123465")
        );
        assert_eq!(records[0].recipient, "3-05.2.1007600000.080");
        assert_eq!(records[0].payload.as_deref(), Some("Eisenkapseln"));
        assert_eq!(records[1].profile, CommunicationProfile::Reply);
    }

    #[test]
    fn tolerates_all_reply_profile_spellings() {
        let spellings = [
            REPLY_PROFILE.to_owned(),
            format!("{REPLY_PROFILE}|1.1.1"),
            format!("{REPLY_PROFILE}|1.2"),
        ];

        let mut extracted = Vec::new();
        for spelling in &spellings {
            let bundle = bundle_of(vec![communication_resource(
                "c1",
                spelling,
                "2022-01-10T09:00:00Z",
            )]);
            extract_communications(&bundle, |record| extracted.push(record))
                .expect("every spelling extracts");
        }

        assert_eq!(extracted.len(), 3);
        assert_eq!(extracted[0], extracted[1]);
        assert_eq!(extracted[1], extracted[2]);
    }

    #[test]
    fn rejects_unknown_profile() {
        let bundle = bundle_of(vec![communication_resource(
            "c1",
            "https://gematik.de/fhir/StructureDefinition/ErxAuditEvent",
            "2022-01-10T09:00:00Z",
        )]);

        let mut invoked = 0;
        let err = extract_communications(&bundle, |_| invoked += 1)
            .expect_err("unknown profile must abort");
        match err {
            FhirError::UnknownProfile { profile } => assert!(profile.contains("ErxAuditEvent")),
            other => panic!("expected UnknownProfile, got {other:?}"),
        }
        assert_eq!(invoked, 0);
    }

    #[test]
    fn missing_sent_aborts_without_invoking_the_sink_for_any_entry() {
        let mut broken = communication_resource("c2", REPLY_PROFILE, "unused");
        broken.as_object_mut().expect("resource object").remove("sent");

        let bundle = bundle_of(vec![
            communication_resource("c1", DISPENSE_REQUEST_PROFILE, "2022-01-10T09:00:00Z"),
            broken,
        ]);

        let mut invoked = 0;
        let err = extract_communications(&bundle, |_| invoked += 1)
            .expect_err("missing sent must abort");
        match err {
            FhirError::MissingField { path } => assert_eq!(path, "sent"),
            other => panic!("expected MissingField, got {other:?}"),
        }
        assert_eq!(invoked, 0, "sink must not see the earlier valid entry");
    }

    #[test]
    fn rejects_reference_not_shaped_like_a_task() {
        let mut resource = communication_resource("c1", REPLY_PROFILE, "2022-01-10T09:00:00Z");
        resource["basedOn"][0]["reference"] = json!("Medication/1/$accept");

        let err = extract_communications(&bundle_of(vec![resource]), |_| {})
            .expect_err("non-task reference must abort");
        match err {
            FhirError::MalformedReference { reference } => {
                assert_eq!(reference, "Medication/1/$accept");
            }
            other => panic!("expected MalformedReference, got {other:?}"),
        }
    }

    #[test]
    fn order_id_is_optional() {
        let mut resource = communication_resource("c1", REPLY_PROFILE, "2022-01-10T09:00:00Z");
        resource
            .as_object_mut()
            .expect("resource object")
            .remove("identifier");

        let mut records = Vec::new();
        extract_communications(&bundle_of(vec![resource]), |record| records.push(record))
            .expect("extraction");
        assert_eq!(records[0].order_id, None);
    }

    #[test]
    fn dispense_request_round_trips_through_extraction() {
        let sent_on = Utc.with_ymd_and_hms(2022, 2, 1, 8, 30, 0).unwrap();
        let document = create_dispense_request(
            "o1",
            "t1",
            "ac1",
            "r1",
            sent_on,
            &json!({ "x": 1 }),
        )
        .expect("construction");

        let bundle = bundle_of(vec![document]);
        let mut records = Vec::new();
        extract_communications(&bundle, |record| records.push(record)).expect("extraction");

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.task_id, "t1");
        assert_eq!(record.order_id.as_deref(), Some("o1"));
        assert_eq!(record.profile, CommunicationProfile::DispenseRequest);
        assert_eq!(record.recipient, "r1");
        assert_eq!(record.sender, None);
        assert_eq!(record.sent_on, sent_on);

        let payload: Value = serde_json::from_str(record.payload.as_deref().expect("payload"))
            .expect("payload is valid JSON");
        assert_eq!(payload, json!({ "x": 1 }));
    }

    #[test]
    fn dispense_request_escapes_embedded_values() {
        let sent_on = Utc.with_ymd_and_hms(2022, 2, 1, 8, 30, 0).unwrap();
        let document = create_dispense_request(
            "order \"nine\"",
            "t1",
            "ac1",
            "r\\1",
            sent_on,
            &json!({ "note": "say \"hi\"\nnewline" }),
        )
        .expect("construction");

        let mut records = Vec::new();
        extract_communications(&bundle_of(vec![document]), |record| records.push(record))
            .expect("extraction");

        let record = &records[0];
        assert_eq!(record.order_id.as_deref(), Some("order \"nine\""));
        assert_eq!(record.recipient, "r\\1");
        let payload: Value =
            serde_json::from_str(record.payload.as_deref().expect("payload")).expect("valid JSON");
        assert_eq!(payload["note"], json!("say \"hi\"\nnewline"));
    }
}
