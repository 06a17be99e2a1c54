//! Transactional materializer: writes an extraction payload into the
//! normalized HR tables in a single transaction per record.
//!
//! Dictionary policy: companies and languages are global and created on
//! demand; skills fall back to a per-tenant custom skill; certifications and
//! the role taxonomy are never created here, only linked.

pub mod languages;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::extraction::{ExtractionRow, ImportStats};
use crate::models::payload::{
    parse_cv_date, CvExtractionResult, PersonalInfo, WorkExperienceEntry,
};

use self::languages::canonical_language;

/// Materializes `payload` for the employee on `extraction` and transitions
/// the record to `completed`, all inside one transaction. On error the
/// transaction aborts and nothing is observable.
pub async fn run_import(
    pool: &PgPool,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
) -> Result<ImportStats> {
    let mut tx = pool.begin().await?;
    let mut stats = ImportStats::default();

    if let Some(info) = &payload.personal_info {
        stats.personal_fields_updated = patch_personal_info(&mut tx, extraction, info).await?;
    }

    import_education(&mut tx, extraction, payload, &mut stats).await?;
    let experience_months = import_work_experience(&mut tx, extraction, payload, &mut stats).await?;
    import_languages(&mut tx, extraction, payload, &mut stats).await?;
    import_certifications(&mut tx, extraction, payload, &mut stats).await?;
    import_skills(&mut tx, extraction, payload, &mut stats).await?;
    stats.role_updated =
        upsert_current_role(&mut tx, extraction, payload, experience_months).await?;

    stats.imported_at = Some(Utc::now());
    finalize(&mut tx, extraction, &stats).await?;

    tx.commit().await?;
    info!(
        extraction_id = %extraction.id,
        rows = stats.rows_created(),
        "import committed"
    );
    Ok(stats)
}

/// Step 1: patch employee personal fields that are present and non-empty.
async fn patch_personal_info(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    info: &PersonalInfo,
) -> Result<u32> {
    let (first, last) = resolve_name(info);
    let email = non_empty(info.email.as_deref());
    let phone = non_empty(info.phone.as_deref());

    let updated_fields = [first.is_some(), last.is_some(), email.is_some(), phone.is_some()]
        .iter()
        .filter(|present| **present)
        .count() as u32;
    if updated_fields == 0 {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE employees SET
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            email = COALESCE($5, email),
            phone = COALESCE($6, phone),
            updated_at = NOW()
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(extraction.employee_id)
    .bind(extraction.tenant_id)
    .bind(first)
    .bind(last)
    .bind(email)
    .bind(phone)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        bail!(
            "employee {} not found for tenant {}",
            extraction.employee_id,
            extraction.tenant_id
        );
    }
    Ok(updated_fields)
}

/// Step 2: education rows, tagged with the extraction id for provenance.
async fn import_education(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
    stats: &mut ImportStats,
) -> Result<()> {
    for entry in &payload.education {
        sqlx::query(
            r#"
            INSERT INTO employee_education
                (id, tenant_id, employee_id, degree, institution, field_of_study,
                 start_date, end_date, grade, cv_extraction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(extraction.tenant_id)
        .bind(extraction.employee_id)
        .bind(&entry.degree)
        .bind(&entry.institution)
        .bind(&entry.field_of_study)
        .bind(entry.start_date.as_deref().and_then(parse_cv_date))
        .bind(entry.end_date.as_deref().and_then(parse_cv_date))
        .bind(&entry.grade)
        .bind(extraction.id)
        .execute(&mut **tx)
        .await?;
        stats.education_created += 1;
    }
    Ok(())
}

/// Step 3: work experience with company resolution. Returns the summed month
/// deltas used for the years-of-experience figure.
async fn import_work_experience(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
    stats: &mut ImportStats,
) -> Result<i64> {
    let today = Utc::now().date_naive();
    let mut total_months = 0i64;

    for entry in &payload.work_experience {
        let company_id = match non_empty(entry.company.as_deref()) {
            Some(name) => Some(resolve_company(tx, name, stats).await?),
            None => None,
        };

        let start = entry.start_date.as_deref().and_then(parse_cv_date);
        let end = entry.end_date.as_deref().and_then(parse_cv_date);
        total_months += experience_months(entry, start, end, today);

        sqlx::query(
            r#"
            INSERT INTO employee_work_experience
                (id, tenant_id, employee_id, company_id, job_title, start_date,
                 end_date, is_current, description, location, cv_extraction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(extraction.tenant_id)
        .bind(extraction.employee_id)
        .bind(company_id)
        .bind(&entry.job_title)
        .bind(start)
        .bind(end)
        .bind(entry.is_current)
        .bind(&entry.description)
        .bind(&entry.location)
        .bind(extraction.id)
        .execute(&mut **tx)
        .await?;
        stats.work_experience_created += 1;
    }
    Ok(total_months)
}

/// Companies are global, case-insensitive-unique by name, created on demand.
async fn resolve_company(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    stats: &mut ImportStats,
) -> Result<Uuid> {
    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM companies WHERE LOWER(name) = LOWER($1)")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO companies (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(&mut **tx)
        .await?;
    stats.companies_created += 1;
    debug!(company = name, "created company dictionary row");
    Ok(id)
}

/// Step 4: languages through the canonical-name map and the proficiency
/// dictionary.
async fn import_languages(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
    stats: &mut ImportStats,
) -> Result<()> {
    for entry in &payload.languages {
        let canonical = canonical_language(&entry.language);
        if canonical.is_empty() {
            continue;
        }

        let language_id = {
            let existing: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM languages WHERE LOWER(name) = LOWER($1)")
                    .bind(&canonical)
                    .fetch_optional(&mut **tx)
                    .await?;
            match existing {
                Some((id,)) => id,
                None => {
                    let id = Uuid::new_v4();
                    sqlx::query("INSERT INTO languages (id, name) VALUES ($1, $2)")
                        .bind(id)
                        .bind(&canonical)
                        .execute(&mut **tx)
                        .await?;
                    stats.language_dictionary_created += 1;
                    id
                }
            }
        };

        let proficiency_id =
            resolve_proficiency(tx, entry.proficiency.as_deref(), entry.cefr_code.as_deref())
                .await?;

        sqlx::query(
            r#"
            INSERT INTO employee_languages
                (id, tenant_id, employee_id, language_id, proficiency_level_id, cv_extraction_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(extraction.tenant_id)
        .bind(extraction.employee_id)
        .bind(language_id)
        .bind(proficiency_id)
        .bind(extraction.id)
        .execute(&mut **tx)
        .await?;
        stats.languages_created += 1;
    }
    Ok(())
}

/// Proficiency resolves by exact match on `level` or `cefr_code`; no rows are
/// created here.
async fn resolve_proficiency(
    tx: &mut Transaction<'_, Postgres>,
    proficiency: Option<&str>,
    cefr_code: Option<&str>,
) -> Result<Option<Uuid>> {
    for candidate in [proficiency, cefr_code].into_iter().flatten() {
        let found: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM language_proficiency_levels
            WHERE LOWER(level) = LOWER($1) OR LOWER(cefr_code) = LOWER($1)
            "#,
        )
        .bind(candidate)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some((id,)) = found {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Step 5: certifications. The free-text name is always preserved; linking to
/// the global catalog is fuzzy and optional.
async fn import_certifications(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
    stats: &mut ImportStats,
) -> Result<()> {
    if payload.certifications.is_empty() {
        return Ok(());
    }

    let catalog: Vec<(Uuid, String, Option<Vec<String>>)> =
        sqlx::query_as("SELECT id, name, synonyms FROM certifications")
            .fetch_all(&mut **tx)
            .await?;

    for entry in &payload.certifications {
        let matched = match_certification(&entry.name, &catalog);
        if matched.is_some() {
            stats.certifications_linked += 1;
        }

        sqlx::query(
            r#"
            INSERT INTO employee_certifications
                (id, tenant_id, employee_id, name, certification_id, issuer,
                 issue_date, expiry_date, cv_extraction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(extraction.tenant_id)
        .bind(extraction.employee_id)
        .bind(&entry.name)
        .bind(matched)
        .bind(&entry.issuer)
        .bind(entry.issue_date.as_deref().and_then(parse_cv_date))
        .bind(entry.expiry_date.as_deref().and_then(parse_cv_date))
        .bind(extraction.id)
        .execute(&mut **tx)
        .await?;
        stats.certifications_created += 1;
    }
    Ok(())
}

/// Fuzzy catalog match: containment in either direction on the name, or
/// containment of a synonym. All comparisons case-insensitive.
fn match_certification(
    name: &str,
    catalog: &[(Uuid, String, Option<Vec<String>>)],
) -> Option<Uuid> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    for (id, catalog_name, synonyms) in catalog {
        let catalog_lower = catalog_name.to_lowercase();
        if needle.contains(&catalog_lower) || catalog_lower.contains(&needle) {
            return Some(*id);
        }
        if let Some(synonyms) = synonyms {
            for synonym in synonyms {
                let synonym_lower = synonym.to_lowercase();
                if !synonym_lower.is_empty()
                    && (needle.contains(&synonym_lower) || synonym_lower.contains(&needle))
                {
                    return Some(*id);
                }
            }
        }
    }
    None
}

/// Step 6: skills. Global exact match first, then the tenant's custom skills,
/// else a new custom skill under the tenant. Never creates a global skill.
async fn import_skills(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
    stats: &mut ImportStats,
) -> Result<()> {
    for entry in &payload.skills {
        let name = entry.name.trim();
        if name.is_empty() {
            continue;
        }

        let global: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM skills WHERE LOWER(name) = LOWER($1) OR LOWER(display_name) = LOWER($1)",
        )
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;

        let (skill_id, custom_skill_id) = match global {
            Some((id,)) => (Some(id), None),
            None => {
                let custom: Option<(Uuid,)> = sqlx::query_as(
                    "SELECT id FROM custom_skills WHERE tenant_id = $1 AND LOWER(name) = LOWER($2)",
                )
                .bind(extraction.tenant_id)
                .bind(name)
                .fetch_optional(&mut **tx)
                .await?;
                match custom {
                    Some((id,)) => (None, Some(id)),
                    None => {
                        let id = Uuid::new_v4();
                        sqlx::query(
                            "INSERT INTO custom_skills (id, tenant_id, name) VALUES ($1, $2, $3)",
                        )
                        .bind(id)
                        .bind(extraction.tenant_id)
                        .bind(name)
                        .execute(&mut **tx)
                        .await?;
                        stats.custom_skills_created += 1;
                        (None, Some(id))
                    }
                }
            }
        };

        sqlx::query(
            r#"
            INSERT INTO employee_skills
                (id, tenant_id, employee_id, skill_id, custom_skill_id,
                 proficiency_level, cv_extraction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(extraction.tenant_id)
        .bind(extraction.employee_id)
        .bind(skill_id)
        .bind(custom_skill_id)
        .bind(entry.confidence)
        .bind(extraction.id)
        .execute(&mut **tx)
        .await?;
        stats.skills_created += 1;
    }
    Ok(())
}

/// Step 7: current-role upsert. Taxonomy ids come pre-matched from the
/// extraction service; absent ids skip the step entirely.
async fn upsert_current_role(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    payload: &CvExtractionResult,
    experience_months: i64,
) -> Result<bool> {
    let Some(classification) = &payload.role_classification else {
        return Ok(false);
    };
    let Some(role_id) = classification.role_id else {
        return Ok(false);
    };

    sqlx::query(
        r#"
        INSERT INTO employee_current_role
            (employee_id, tenant_id, role_id, sub_role_id, years_of_experience, updated_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (employee_id) DO UPDATE SET
            role_id = EXCLUDED.role_id,
            sub_role_id = EXCLUDED.sub_role_id,
            years_of_experience = EXCLUDED.years_of_experience,
            updated_at = NOW()
        "#,
    )
    .bind(extraction.employee_id)
    .bind(extraction.tenant_id)
    .bind(role_id)
    .bind(classification.sub_role_id)
    .bind(years_from_months(experience_months))
    .execute(&mut **tx)
    .await?;
    Ok(true)
}

/// Step 8: write import stats and complete the record. The compare-and-swap
/// on `importing` aborts the transaction if another writer moved the record.
async fn finalize(
    tx: &mut Transaction<'_, Postgres>,
    extraction: &ExtractionRow,
    stats: &ImportStats,
) -> Result<()> {
    let stats_json = serde_json::to_value(stats).context("serializing import stats")?;
    let result = sqlx::query(
        r#"
        UPDATE cv_extractions SET
            status = 'completed',
            import_stats = $2,
            processing_time_seconds = EXTRACT(EPOCH FROM (NOW() - created_at)),
            error_message = NULL,
            error_phase = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status = 'importing'
        "#,
    )
    .bind(extraction.id)
    .bind(stats_json)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        bail!(
            "extraction {} left 'importing' during import; aborting",
            extraction.id
        );
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// First/last name from explicit fields, else split from the full name at the
/// first whitespace.
fn resolve_name(info: &PersonalInfo) -> (Option<String>, Option<String>) {
    let explicit_first = non_empty(info.first_name.as_deref()).map(str::to_string);
    let explicit_last = non_empty(info.last_name.as_deref()).map(str::to_string);
    if explicit_first.is_some() || explicit_last.is_some() {
        return (explicit_first, explicit_last);
    }

    match non_empty(info.full_name.as_deref()) {
        Some(full) => match full.split_once(char::is_whitespace) {
            Some((first, rest)) => (Some(first.to_string()), Some(rest.trim().to_string())),
            None => (Some(full.to_string()), None),
        },
        None => (None, None),
    }
}

/// Month delta for one position. Open-ended current positions run to today;
/// positions with no usable dates contribute nothing.
fn experience_months(
    entry: &WorkExperienceEntry,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> i64 {
    let Some(start) = start else { return 0 };
    let end = match end {
        Some(end) => end,
        None if entry.is_current => today,
        None => return 0,
    };
    months_between(start, end)
}

fn months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let months = (end.year() as i64 - start.year() as i64) * 12
        + (end.month() as i64 - start.month() as i64);
    months.max(0)
}

/// Floor of total months to whole years.
fn years_from_months(months: i64) -> i32 {
    (months / 12) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(id: Uuid, name: &str, synonyms: &[&str]) -> (Uuid, String, Option<Vec<String>>) {
        (
            id,
            name.to_string(),
            Some(synonyms.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[test]
    fn test_match_certification_exact_and_contains() {
        let id = Uuid::new_v4();
        let catalog = vec![cert(id, "AWS Solutions Architect", &[])];
        assert_eq!(
            match_certification("aws solutions architect", &catalog),
            Some(id)
        );
        assert_eq!(
            match_certification("AWS Solutions Architect - Professional", &catalog),
            Some(id)
        );
        // catalog name contains the needle
        assert_eq!(match_certification("Solutions Architect", &catalog), Some(id));
    }

    #[test]
    fn test_match_certification_synonym() {
        let id = Uuid::new_v4();
        let catalog = vec![cert(id, "Project Management Professional", &["PMP"])];
        assert_eq!(match_certification("PMP Certified 2021", &catalog), Some(id));
    }

    #[test]
    fn test_match_certification_no_match() {
        let catalog = vec![cert(Uuid::new_v4(), "CISSP", &[])];
        assert_eq!(match_certification("Scrum Master", &catalog), None);
        assert_eq!(match_certification("", &catalog), None);
    }

    #[test]
    fn test_resolve_name_prefers_explicit_fields() {
        let info = PersonalInfo {
            full_name: Some("Ignored Name".into()),
            first_name: Some("Grace".into()),
            last_name: Some("Hopper".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_name(&info),
            (Some("Grace".into()), Some("Hopper".into()))
        );
    }

    #[test]
    fn test_resolve_name_splits_full_name() {
        let info = PersonalInfo {
            full_name: Some("Ada Augusta Lovelace".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_name(&info),
            (Some("Ada".into()), Some("Augusta Lovelace".into()))
        );
    }

    #[test]
    fn test_resolve_name_single_token() {
        let info = PersonalInfo {
            full_name: Some("Cher".into()),
            ..Default::default()
        };
        assert_eq!(resolve_name(&info), (Some("Cher".into()), None));
    }

    #[test]
    fn test_months_between_and_floor_years() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap();
        assert_eq!(months_between(start, end), 42);
        assert_eq!(years_from_months(42), 3);
        assert_eq!(years_from_months(11), 0);
    }

    #[test]
    fn test_months_between_never_negative() {
        let start = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
        assert_eq!(months_between(start, end), 0);
    }

    #[test]
    fn test_experience_months_current_position_runs_to_today() {
        let entry = WorkExperienceEntry {
            is_current: true,
            ..Default::default()
        };
        let start = NaiveDate::from_ymd_opt(2024, 1, 1);
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(experience_months(&entry, start, None, today), 24);
    }

    #[test]
    fn test_experience_months_missing_dates_contribute_nothing() {
        let entry = WorkExperienceEntry::default();
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(experience_months(&entry, None, None, today), 0);
        // ended position with no end date and not current
        assert_eq!(
            experience_months(&entry, NaiveDate::from_ymd_opt(2020, 1, 1), None, today),
            0
        );
    }
}
