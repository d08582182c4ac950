//! Medication representations and the prescription request/dispense data.
//!
//! A prescription names its medication in one of four representations:
//! free text, an ingredient list, a compounded preparation, or an
//! identified product (PZN). The representation decides which field serves
//! as the display text, so the set is a closed sum type and the dispatch in
//! [`Medication::name`] is exhaustive — a new representation must not be
//! able to fall through silently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Regulatory category of a medication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicationCategory {
    /// Medicinal products and dressings.
    ArzneiUndVerbandMittel,
    /// Narcotics (Betäubungsmittel).
    Btm,
    /// Prescription-only per the AMVV ordinance.
    Amvv,
}

/// A value with a unit, as stated on the prescription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: String,
    pub unit: String,
}

/// A numerator/denominator pairing, e.g. a dose strength or a multi-fill
/// numbering such as 2 of 4.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: Option<Quantity>,
    pub denominator: Option<Quantity>,
}

/// One ingredient of an ingredient-list or compounded medication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub text: String,
    pub form: Option<String>,
    pub amount: Option<String>,
    pub strength: Option<Ratio>,
}

/// A medication described in free text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationFreeText {
    pub category: MedicationCategory,
    pub vaccine: bool,
    pub text: String,
    pub form: Option<String>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
}

/// A medication described by its ingredient list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationIngredient {
    pub category: MedicationCategory,
    pub vaccine: bool,
    pub text: String,
    pub form: Option<String>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub norm_size_code: Option<String>,
    pub amount: Option<Ratio>,
    pub ingredients: Vec<Ingredient>,
}

/// A compounded preparation mixed by the pharmacy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationCompounding {
    pub category: MedicationCategory,
    pub vaccine: bool,
    pub text: String,
    pub form: Option<String>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub manufacturing_instructions: Option<String>,
    pub packaging: Option<String>,
    pub amount: Option<Ratio>,
    pub ingredients: Vec<Ingredient>,
}

/// An identified product, named by its PZN (Pharmazentralnummer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationPzn {
    pub category: MedicationCategory,
    pub vaccine: bool,
    pub text: String,
    pub form: Option<String>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub unique_identifier: String,
    pub norm_size_code: Option<String>,
    pub amount: Option<Ratio>,
}

/// The closed set of medication representations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Medication {
    FreeText(MedicationFreeText),
    Ingredient(MedicationIngredient),
    Compounding(MedicationCompounding),
    Pzn(MedicationPzn),
}

impl Medication {
    /// Selects the representation-appropriate display text.
    ///
    /// Identified products and free text use their `text`, compounded
    /// preparations their dose form, ingredient lists the first
    /// ingredient's text. Intentionally without a wildcard arm.
    pub fn name(&self) -> Option<&str> {
        match self {
            Medication::FreeText(medication) => Some(&medication.text),
            Medication::Pzn(medication) => Some(&medication.text),
            Medication::Compounding(medication) => medication.form.as_deref(),
            Medication::Ingredient(medication) => medication
                .ingredients
                .first()
                .map(|ingredient| ingredient.text.as_str()),
        }
    }
}

/// Co-payment status stated on the prescription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdditionalFee {
    /// No statement on the prescription.
    #[default]
    None,
    /// The patient is not exempt from the co-payment.
    NotExempt,
    /// The patient is exempt from the co-payment.
    Exempt,
    /// Artificial fertilization, billed separately.
    ArtificialFertilization,
}

impl AdditionalFee {
    /// Maps the wire code onto the enumeration; unknown codes collapse to
    /// [`AdditionalFee::None`].
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("0") => AdditionalFee::NotExempt,
            Some("1") => AdditionalFee::Exempt,
            Some("2") => AdditionalFee::ArtificialFertilization,
            _ => AdditionalFee::None,
        }
    }
}

/// Prescription details for one task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationRequest {
    pub medication: Option<Medication>,
    pub date_of_accident: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub emergency_fee: Option<bool>,
    pub substitution_allowed: bool,
    pub dosage_instruction: Option<String>,
    pub multiple_prescription_info: MultiplePrescriptionInfo,
    pub note: Option<String>,
    pub bvg: Option<bool>,
    pub additional_fee: AdditionalFee,
}

/// Multi-fill scheduling of a prescription.
///
/// When `indicator` is set and `start` lies in the future, the task belongs
/// to a fill not yet redeemable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplePrescriptionInfo {
    pub indicator: bool,
    /// Position of this fill in the schedule, e.g. 2 of 4.
    pub numbering: Option<Ratio>,
    pub start: Option<DateTime<Utc>>,
}

/// One dispense performed by a pharmacy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationDispense {
    pub dispense_id: Option<String>,
    pub patient_identifier: String,
    pub medication: Option<Medication>,
    pub was_substituted: bool,
    pub dosage_instruction: Option<String>,
    /// Telematik-ID of the dispensing pharmacy.
    pub performer: String,
    pub when_handed_over: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pzn() -> MedicationPzn {
        MedicationPzn {
            category: MedicationCategory::ArzneiUndVerbandMittel,
            vaccine: false,
            text: "Ibuprofen 600".to_owned(),
            form: Some("FTA".to_owned()),
            lot_number: None,
            expiration_date: None,
            unique_identifier: "06313728".to_owned(),
            norm_size_code: Some("N1".to_owned()),
            amount: None,
        }
    }

    #[test]
    fn name_uses_text_for_identified_products_and_free_text() {
        let pzn = Medication::Pzn(base_pzn());
        assert_eq!(pzn.name(), Some("Ibuprofen 600"));

        let free_text = Medication::FreeText(MedicationFreeText {
            category: MedicationCategory::ArzneiUndVerbandMittel,
            vaccine: false,
            text: "Schmerzmittel nach Anweisung".to_owned(),
            form: None,
            lot_number: None,
            expiration_date: None,
        });
        assert_eq!(free_text.name(), Some("Schmerzmittel nach Anweisung"));
    }

    #[test]
    fn name_uses_the_dose_form_for_compounded_preparations() {
        let compounding = Medication::Compounding(MedicationCompounding {
            category: MedicationCategory::ArzneiUndVerbandMittel,
            vaccine: false,
            text: String::new(),
            form: Some("Salbe".to_owned()),
            lot_number: None,
            expiration_date: None,
            manufacturing_instructions: None,
            packaging: None,
            amount: None,
            ingredients: Vec::new(),
        });
        assert_eq!(compounding.name(), Some("Salbe"));
    }

    #[test]
    fn name_uses_the_first_ingredient_for_ingredient_lists() {
        let mut ingredient_list = MedicationIngredient {
            category: MedicationCategory::Amvv,
            vaccine: false,
            text: String::new(),
            form: None,
            lot_number: None,
            expiration_date: None,
            norm_size_code: None,
            amount: None,
            ingredients: vec![
                Ingredient {
                    text: "Wirkstoff A".to_owned(),
                    form: None,
                    amount: None,
                    strength: None,
                },
                Ingredient {
                    text: "Wirkstoff B".to_owned(),
                    form: None,
                    amount: None,
                    strength: None,
                },
            ],
        };
        assert_eq!(
            Medication::Ingredient(ingredient_list.clone()).name(),
            Some("Wirkstoff A")
        );

        ingredient_list.ingredients.clear();
        assert_eq!(Medication::Ingredient(ingredient_list).name(), None);
    }

    #[test]
    fn additional_fee_parses_the_wire_codes() {
        assert_eq!(AdditionalFee::from_code(None), AdditionalFee::None);
        assert_eq!(AdditionalFee::from_code(Some("0")), AdditionalFee::NotExempt);
        assert_eq!(AdditionalFee::from_code(Some("1")), AdditionalFee::Exempt);
        assert_eq!(
            AdditionalFee::from_code(Some("2")),
            AdditionalFee::ArtificialFertilization
        );
        assert_eq!(AdditionalFee::from_code(Some("9")), AdditionalFee::None);
    }
}
