//! The prescription task aggregate and its lifecycle state machine.
//!
//! A [`Task`] is a point-in-time snapshot assembled by the calling store
//! from extracted records. The state machine combines the task's status,
//! its validity window, its multi-fill scheduling and its history of
//! protocol messages into a single time-dependent decision. All functions
//! are pure: "now" and the cool-down interval are parameters, nothing is
//! mutated, and evaluating the same snapshot twice yields the same answer.

use crate::medication::{MedicationDispense, MedicationRequest};
use crate::participant::{InsuranceInformation, Organization, Patient, Practitioner};
use crate::{StateError, StateResult};
use chrono::{DateTime, Duration, Utc};
use erx_fhir::{Communication, CommunicationProfile, TaskStatus};
use serde::{Deserialize, Serialize};

/// Task ids starting with this prefix denote a direct assignment to one
/// pharmacy, subject to stricter deletion rules (gemSpec_FD_eRp A_21267).
pub const DIRECT_ASSIGNMENT_PREFIX: &str = "169";

/// Minimum interval between a dispense request and the next redemption
/// attempt. Guards against spamming a pharmacy with repeated requests.
pub fn communication_wait_delta() -> Duration {
    Duration::minutes(10)
}

/// One prescription task with everything its lifecycle decision needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// The user profile this task was synced into.
    pub profile_id: String,
    pub task_id: String,
    /// Capability token required to redeem or communicate about the task.
    pub access_code: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub organization: Organization,
    pub practitioner: Practitioner,
    pub patient: Patient,
    pub insurance_information: InsuranceInformation,
    /// End of the redemption window.
    pub expires_on: Option<DateTime<Utc>>,
    /// End of the pharmacy acceptance window.
    pub accept_until: Option<DateTime<Utc>>,
    pub authored_on: DateTime<Utc>,
    pub status: TaskStatus,
    pub medication_request: MedicationRequest,
    /// Populated once a dispense has occurred.
    pub medication_dispenses: Vec<MedicationDispense>,
    /// Protocol messages attached to this task, in no particular order.
    pub communications: Vec<Communication>,
}

/// Mutually exclusive lifecycle classification of a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Redeemable now; both window ends are known.
    Ready {
        expires_on: DateTime<Utc>,
        accept_until: DateTime<Utc>,
    },
    /// Part of a multi-fill schedule whose fill has not started yet.
    LaterRedeemable { redeemable_on: DateTime<Utc> },
    /// A dispense request is out and the cool-down has not elapsed.
    Pending {
        sent_on: DateTime<Utc>,
        to_telematik_id: String,
    },
    /// A pharmacy has accepted the task.
    InProgress { last_modified: DateTime<Utc> },
    /// The redemption window has closed.
    Expired { expired_on: DateTime<Utc> },
    /// Any remaining status.
    Other {
        status: TaskStatus,
        last_modified: DateTime<Utc>,
    },
}

/// Whether a task may be redeemed right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeemState {
    NotRedeemable,
    /// Redeemable, no dispense request out.
    RedeemableAndValid,
    /// Redeemable again, the cool-down after the last dispense request has
    /// elapsed.
    RedeemableAfterDelta,
}

impl RedeemState {
    pub fn is_redeemable(self) -> bool {
        self != RedeemState::NotRedeemable
    }
}

impl Task {
    /// The future start of this task's multi-fill window, if any.
    fn redeemable_later_on(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let info = &self.medication_request.multiple_prescription_info;
        if !info.indicator {
            return None;
        }
        info.start.filter(|start| *start > now)
    }

    /// Redemption cut-off is inclusive: at the expiry instant the task can
    /// no longer be redeemed.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|expires_on| expires_on <= now)
    }

    fn latest_dispense_request(&self) -> Option<&Communication> {
        self.communications
            .iter()
            .filter(|communication| {
                communication.profile == CommunicationProfile::DispenseRequest
            })
            .max_by_key(|communication| communication.sent_on)
    }

    /// Whether the task may be redeemed at `now`, given the cool-down
    /// `delta` after a dispense request.
    ///
    /// Not a filter for the active/archive distinction; see
    /// [`Task::is_active`] for that.
    pub fn redeem_state(&self, now: DateTime<Utc>, delta: Duration) -> RedeemState {
        if self.redeemable_later_on(now).is_some() || self.is_expired(now) {
            return RedeemState::NotRedeemable;
        }
        if self.status != TaskStatus::Ready || self.access_code.is_none() {
            return RedeemState::NotRedeemable;
        }

        match self.latest_dispense_request() {
            None => RedeemState::RedeemableAndValid,
            Some(request) if request.sent_on + delta > now => RedeemState::NotRedeemable,
            Some(_) => RedeemState::RedeemableAfterDelta,
        }
    }

    /// [`Task::redeem_state`] against the wall clock and the default
    /// cool-down.
    pub fn current_redeem_state(&self) -> RedeemState {
        self.redeem_state(Utc::now(), communication_wait_delta())
    }

    /// Classifies the task at `now`. The rules are evaluated in order;
    /// the first match wins.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvariantViolation`] when the task is `Ready`
    /// without a known expiry or acceptance window; upstream extraction
    /// guarantees both, so a miss indicates a corrupted snapshot.
    pub fn state(&self, now: DateTime<Utc>, delta: Duration) -> StateResult<TaskState> {
        if let Some(redeemable_on) = self.redeemable_later_on(now) {
            return Ok(TaskState::LaterRedeemable { redeemable_on });
        }

        // The expired banner only shows strictly after the expiry instant,
        // while the redemption cut-off above is inclusive.
        if let Some(expires_on) = self.expires_on {
            if expires_on < now {
                return Ok(TaskState::Expired {
                    expired_on: expires_on,
                });
            }
        }

        if self.status == TaskStatus::Ready && self.access_code.is_some() {
            if let Some(request) = self.latest_dispense_request() {
                if self.redeem_state(now, delta) == RedeemState::NotRedeemable {
                    return Ok(TaskState::Pending {
                        sent_on: request.sent_on,
                        to_telematik_id: request.recipient.clone(),
                    });
                }
            }
        }

        match self.status {
            TaskStatus::Ready => {
                let (Some(expires_on), Some(accept_until)) = (self.expires_on, self.accept_until)
                else {
                    tracing::warn!(
                        task_id = %self.task_id,
                        "ready task without expiry or acceptance window"
                    );
                    return Err(StateError::InvariantViolation {
                        task_id: self.task_id.clone(),
                        detail: "ready task without expiry or acceptance window",
                    });
                };
                Ok(TaskState::Ready {
                    expires_on,
                    accept_until,
                })
            }
            TaskStatus::InProgress => Ok(TaskState::InProgress {
                last_modified: self.last_modified,
            }),
            status => Ok(TaskState::Other {
                status,
                last_modified: self.last_modified,
            }),
        }
    }

    /// [`Task::state`] against the wall clock and the default cool-down.
    pub fn current_state(&self) -> StateResult<TaskState> {
        self.state(Utc::now(), communication_wait_delta())
    }

    /// Whether the task belongs in the active view: not yet expired and
    /// still redeemable or being dispensed.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let not_expired = self.expires_on.map_or(true, |expires_on| now <= expires_on);
        let allowed_status =
            self.status == TaskStatus::Ready || self.status == TaskStatus::InProgress;
        not_expired && allowed_status
    }

    /// Whether this task was directly assigned to one pharmacy.
    pub fn is_direct_assignment(&self) -> bool {
        self.task_id.starts_with(DIRECT_ASSIGNMENT_PREFIX)
    }

    /// Directly assigned tasks may only be deleted once completed.
    pub fn is_deletable(&self) -> bool {
        if self.is_direct_assignment() {
            self.status == TaskStatus::Completed
        } else {
            true
        }
    }

    /// When the prescription was handed over, if it was.
    pub fn redeemed_on(&self) -> Option<DateTime<Utc>> {
        if self.status == TaskStatus::Completed {
            Some(
                self.medication_dispenses
                    .first()
                    .map(|dispense| dispense.when_handed_over)
                    .unwrap_or(self.last_modified),
            )
        } else {
            None
        }
    }

    /// Display name of the prescribed medication, per its representation.
    pub fn medication_name(&self) -> Option<&str> {
        self.medication_request
            .medication
            .as_ref()
            .and_then(|medication| medication.name())
    }

    /// Name of the prescribing organization, falling back to the
    /// practitioner.
    pub fn organization_name(&self) -> Option<&str> {
        self.organization
            .name
            .as_deref()
            .or(self.practitioner.name.as_deref())
    }
}
