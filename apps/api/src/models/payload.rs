//! Typed schema for the Extraction Service payload.
//!
//! The external service returns loosely shaped JSON; this module is the trust
//! boundary where it becomes typed. Every collection defaults to empty so a
//! partial payload still imports whatever it does carry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CvExtractionResult {
    #[serde(default)]
    pub personal_info: Option<PersonalInfo>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub work_experience: Vec<WorkExperienceEntry>,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
    #[serde(default)]
    pub languages: Vec<LanguageEntry>,
    #[serde(default)]
    pub certifications: Vec<CertificationEntry>,
    #[serde(default)]
    pub role_classification: Option<RoleClassification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalInfo {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EducationEntry {
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkExperienceEntry {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    /// Extraction confidence in [0, 1]; stored as the skill's proficiency.
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub language: String,
    #[serde(default)]
    pub proficiency: Option<String>,
    #[serde(default)]
    pub cefr_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificationEntry {
    pub name: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<String>,
}

/// Role/sub-role ids already matched against the global taxonomy by the
/// Extraction Service. The importer links them but never invents new ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleClassification {
    #[serde(default)]
    pub role_id: Option<Uuid>,
    #[serde(default)]
    pub sub_role_id: Option<Uuid>,
}

/// Lenient date parsing for CV fields: `YYYY-MM-DD`, `YYYY-MM`, or `YYYY`.
/// Month-only and year-only values snap to the first day.
pub fn parse_cv_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(year) = raw.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_date() {
        assert_eq!(
            parse_cv_date("2021-06-15"),
            NaiveDate::from_ymd_opt(2021, 6, 15)
        );
    }

    #[test]
    fn test_parse_year_month() {
        assert_eq!(
            parse_cv_date("2021-06"),
            NaiveDate::from_ymd_opt(2021, 6, 1)
        );
    }

    #[test]
    fn test_parse_year_only() {
        assert_eq!(parse_cv_date("2019"), NaiveDate::from_ymd_opt(2019, 1, 1));
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert_eq!(parse_cv_date("present"), None);
        assert_eq!(parse_cv_date(""), None);
        assert_eq!(parse_cv_date("  "), None);
    }

    #[test]
    fn test_minimal_payload_deserializes() {
        let payload: CvExtractionResult = serde_json::from_str("{}").unwrap();
        assert!(payload.personal_info.is_none());
        assert!(payload.education.is_empty());
        assert!(payload.skills.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let payload: CvExtractionResult = serde_json::from_str(
            r#"{"skills": [{"name": "Rust", "confidence": 0.93}], "future_field": 1}"#,
        )
        .unwrap();
        assert_eq!(payload.skills.len(), 1);
        assert_eq!(payload.skills[0].name, "Rust");
    }
}
