//! FHIR wire/boundary support for the prescription lifecycle core.
//!
//! This crate provides **bundle navigation** and **resource extraction** for
//! the profile-discriminated JSON bundles served by the prescription broker:
//! - a generic path filter engine over the parsed document tree
//! - extractors for Communication, AuditEvent and Task resources
//! - the outbound dispense-request document constructor
//!
//! This crate focuses on:
//! - FHIR semantic alignment (without FHIR REST transport)
//! - fail-fast decoding of mandatory fields
//! - translation from the dynamic document tree to typed records
//!
//! Decoding raw bytes into the [`serde_json::Value`] tree, as well as
//! persisting the extracted records, is the caller's job. Extraction is
//! transactional per bundle: the sink never observes records from a bundle
//! that fails to decode in full.

pub mod audit_event;
pub mod communication;
pub mod parser;
pub mod task;

// Re-export the record types and wire enumerations
pub use audit_event::AuditEvent;
pub use communication::{Communication, CommunicationProfile};
pub use task::{TaskRecord, TaskStatus};

// Re-export the extraction entry points
pub use audit_event::extract_audit_events;
pub use communication::{create_dispense_request, extract_communications};
pub use task::extract_tasks;

/// Identifier system for pharmacy order ids.
pub const ORDER_ID_SYSTEM: &str = "https://gematik.de/fhir/NamingSystem/OrderID";

/// Identifier system for pharmacy Telematik-IDs.
pub const TELEMATIK_ID_SYSTEM: &str = "https://gematik.de/fhir/NamingSystem/TelematikID";

/// Identifier system for prescription ids.
pub const PRESCRIPTION_ID_SYSTEM: &str = "https://gematik.de/fhir/NamingSystem/PrescriptionID";

/// Identifier system for task access codes.
pub const ACCESS_CODE_SYSTEM: &str = "https://gematik.de/fhir/NamingSystem/AccessCode";

/// Errors returned by the `erx-fhir` boundary crate.
///
/// The first two variants jointly cover "a mandatory scalar is unusable":
/// they are kept separate so callers (and tests) can tell an absent key from
/// a present value of the wrong shape.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("missing mandatory field `{path}`")]
    MissingField { path: String },

    #[error("mandatory field `{path}` is not a {expected}")]
    MistypedField { path: String, expected: &'static str },

    #[error("unknown profile `{profile}`")]
    UnknownProfile { profile: String },

    #[error("malformed reference `{reference}`")]
    MalformedReference { reference: String },

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
