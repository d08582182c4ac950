//! # erx Core
//!
//! Core business logic for the prescription lifecycle: the domain model for
//! a prescription task and the pure state machine deciding whether and how
//! it may be redeemed.
//!
//! This crate contains pure data operations only:
//! - the task aggregate with its medication, dispenses and communications
//! - the point-in-time lifecycle classification ([`TaskState`],
//!   [`RedeemState`])
//! - supporting predicates (active, deletable, direct assignment)
//!
//! **No boundary concerns**: fetching bundles, persisting records and
//! presenting state belong to the surrounding application. Every function
//! takes its inputs (including "now" and the cool-down interval) as
//! explicit parameters and mutates nothing.

pub mod medication;
pub mod participant;
pub mod task;

// The wire-aligned types shared with the boundary crate.
pub use erx_fhir::{AuditEvent, Communication, CommunicationProfile, TaskStatus};

pub use medication::{
    AdditionalFee, Ingredient, Medication, MedicationCategory, MedicationCompounding,
    MedicationDispense, MedicationFreeText, MedicationIngredient, MedicationPzn,
    MedicationRequest, MultiplePrescriptionInfo, Quantity, Ratio,
};
pub use participant::{Address, InsuranceInformation, Organization, Patient, Practitioner};
pub use task::{
    communication_wait_delta, RedeemState, Task, TaskState, DIRECT_ASSIGNMENT_PREFIX,
};

/// Errors returned by the task state machine.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// An upstream data-integrity precondition failed; this is a defect in
    /// the stored snapshot, not a transient condition.
    #[error("invariant violated for task {task_id}: {detail}")]
    InvariantViolation {
        task_id: String,
        detail: &'static str,
    },
}

/// Type alias for Results that can fail with a [`StateError`].
pub type StateResult<T> = Result<T, StateError>;
