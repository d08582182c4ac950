//! Parties named on a prescription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A postal address as printed on the prescription.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: String,
    pub postal_code_and_city: String,
}

impl Address {
    /// Joins the non-empty address lines with `", "`.
    pub fn join_to_string(&self) -> String {
        [&self.line1, &self.line2, &self.postal_code_and_city]
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| line.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The prescribing organization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: Option<String>,
    pub address: Option<Address>,
    pub unique_identifier: Option<String>,
    pub phone: Option<String>,
    pub mail: Option<String>,
}

/// The prescribing practitioner.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Practitioner {
    pub name: Option<String>,
    pub qualification: Option<String>,
    pub practitioner_identifier: Option<String>,
}

/// The patient the prescription was issued for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub name: Option<String>,
    pub address: Option<Address>,
    pub birthdate: Option<DateTime<Utc>>,
    pub insurance_identifier: Option<String>,
}

/// The covering insurance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceInformation {
    pub name: Option<String>,
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_to_string_skips_empty_lines() {
        let address = Address {
            line1: "Langener Landstraße 266".to_owned(),
            line2: String::new(),
            postal_code_and_city: "27578 Bremerhaven".to_owned(),
        };
        assert_eq!(
            address.join_to_string(),
            "Langener Landstraße 266, 27578 Bremerhaven"
        );
    }
}
