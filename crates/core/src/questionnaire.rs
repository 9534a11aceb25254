//! The intake medical questionnaire.
//!
//! Answers are tri-state: `None` means the question was never asked, which is
//! distinct from an explicit no. Free-text fields are bounded so a pasted
//! document cannot blow up the patient record.

use serde::{Deserialize, Serialize};

use crate::ClinicResult;

const OTHER_TEXT_MAX: usize = 80;
const OBSERVATIONS_MAX: usize = 800;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionFlags {
    pub diabetes: bool,
    pub arthritis: bool,
    pub heart_disease: bool,
    pub rheumatic_fever: bool,
    pub hepatitis: bool,
    pub ulcers: bool,
    pub kidney_disorders: bool,
    pub nervous_disorders: bool,
    pub other_text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllergyFlags {
    pub aspirin: bool,
    pub penicillin: bool,
    pub sulfas: bool,
    pub other_text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicalQuestionnaire {
    pub under_treatment: Option<bool>,
    pub taking_medication: Option<bool>,
    pub conditions: ConditionFlags,
    pub surgery_or_hospitalized: Option<bool>,
    pub health_change_last_months: Option<bool>,
    pub allergies: AllergyFlags,
    pub abnormal_anesthesia_reaction: Option<bool>,
    pub prolonged_bleeding: Option<bool>,
    pub fainting: Option<bool>,
    pub pregnant: Option<bool>,
    pub lactation: Option<bool>,
    pub menstrual_disorders: Option<bool>,
    pub observations: String,
}

impl MedicalQuestionnaire {
    pub fn validate(&self) -> ClinicResult<()> {
        check_len(
            "questionnaire.conditions.other_text",
            &self.conditions.other_text,
            OTHER_TEXT_MAX,
        )?;
        check_len(
            "questionnaire.allergies.other_text",
            &self.allergies.other_text,
            OTHER_TEXT_MAX,
        )?;
        check_len(
            "questionnaire.observations",
            &self.observations,
            OBSERVATIONS_MAX,
        )?;
        Ok(())
    }

    /// True when nothing was ever filled in. Used to skip persisting an
    /// all-default questionnaire block.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn check_len(field: &str, text: &str, max: usize) -> ClinicResult<()> {
    if text.chars().count() > max {
        Err(crate::ClinicError::validation(
            field,
            format!("exceeds {max} characters"),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_questionnaire_is_empty_and_valid() {
        let q = MedicalQuestionnaire::default();
        assert!(q.is_empty());
        q.validate().expect("empty questionnaire is valid");
    }

    #[test]
    fn unanswered_differs_from_answered_no() {
        let mut q = MedicalQuestionnaire::default();
        assert_eq!(q.pregnant, None);
        q.pregnant = Some(false);
        assert!(!q.is_empty());
    }

    #[test]
    fn free_text_bounds_are_enforced() {
        let mut q = MedicalQuestionnaire::default();
        q.observations = "x".repeat(801);
        assert!(q.validate().is_err());

        q.observations = "x".repeat(800);
        q.validate().expect("800 characters is the inclusive limit");

        q.conditions.other_text = "y".repeat(81);
        assert!(q.validate().is_err());
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let q: MedicalQuestionnaire = serde_json::from_str("{}").unwrap();
        assert!(q.is_empty());

        let q: MedicalQuestionnaire =
            serde_json::from_str(r#"{ "pregnant": false, "conditions": { "diabetes": true } }"#)
                .unwrap();
        assert_eq!(q.pregnant, Some(false));
        assert!(q.conditions.diabetes);
        assert_eq!(q.taking_medication, None);
    }
}
