use anyhow::Result;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::domain::{MeterGroup, MeterKey, TimeSectionSet};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MeterRow {
    pub meter_instance: i32,
    pub appliance_label: Option<String>,
    pub is_site_meter: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SectionRow {
    pub section_start: OffsetDateTime,
    pub section_end: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnergyTotalRow {
    pub power_type: String,
    pub total_kwh: f64,
}

/// Fetch the site (mains) meter of a building, if registered.
pub async fn site_meter(pool: &PgPool, group: &MeterGroup) -> Result<Option<MeterRow>> {
    let row = sqlx::query_as::<_, MeterRow>(
        r#"
        SELECT
            meter_instance,
            appliance_label,
            is_site_meter
        FROM meter_registry
        WHERE dataset = $1
          AND building = $2
          AND is_site_meter
        ORDER BY meter_instance
        LIMIT 1
        "#,
    )
    .bind(&group.dataset)
    .bind(group.building as i32)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetch the meters wired directly downstream of the building's site meter,
/// ordered by instance number.
pub async fn downstream_of_site_meter(pool: &PgPool, group: &MeterGroup) -> Result<Vec<MeterRow>> {
    let rows = sqlx::query_as::<_, MeterRow>(
        r#"
        SELECT
            m.meter_instance,
            m.appliance_label,
            m.is_site_meter
        FROM meter_registry m
        JOIN meter_registry s
          ON s.dataset = m.dataset
         AND s.building = m.building
         AND s.is_site_meter
        WHERE m.dataset = $1
          AND m.building = $2
          AND m.upstream_instance = s.meter_instance
        ORDER BY m.meter_instance
        "#,
    )
    .bind(&group.dataset)
    .bind(group.building as i32)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Look up a single meter of a building by instance number.
pub async fn meter_by_instance(
    pool: &PgPool,
    group: &MeterGroup,
    instance: u32,
) -> Result<Option<MeterRow>> {
    let row = sqlx::query_as::<_, MeterRow>(
        r#"
        SELECT
            meter_instance,
            appliance_label,
            is_site_meter
        FROM meter_registry
        WHERE dataset = $1
          AND building = $2
          AND meter_instance = $3
        "#,
    )
    .bind(&group.dataset)
    .bind(group.building as i32)
    .bind(instance as i32)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetch a meter's validated intervals, ordered by start.
pub async fn good_sections(pool: &PgPool, key: &MeterKey) -> Result<Vec<SectionRow>> {
    let rows = sqlx::query_as::<_, SectionRow>(
        r#"
        SELECT
            section_start,
            section_end
        FROM meter_good_sections
        WHERE dataset = $1
          AND building = $2
          AND meter_instance = $3
        ORDER BY section_start
        "#,
    )
    .bind(&key.dataset)
    .bind(key.building as i32)
    .bind(key.instance as i32)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Whether a meter has any section-index rows at all. A section-restricted
/// total for a meter with no coverage rows is a lookup failure, not an empty
/// result.
pub async fn has_section_coverage(pool: &PgPool, key: &MeterKey) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM meter_good_sections
        WHERE dataset = $1
          AND building = $2
          AND meter_instance = $3
        "#,
    )
    .bind(&key.dataset)
    .bind(key.building as i32)
    .bind(key.instance as i32)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Sum a meter's recorded energy by power type, optionally restricted to a
/// section set. The restriction is built as an OR of half-open ranges; for a
/// handful of sections this is acceptable, for very large sets you would
/// typically join against a temp table.
pub async fn energy_totals(
    pool: &PgPool,
    key: &MeterKey,
    sections: Option<&TimeSectionSet>,
) -> Result<Vec<EnergyTotalRow>> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT power_type, SUM(kwh) AS total_kwh FROM meter_readings WHERE dataset = ",
    );
    builder.push_bind(&key.dataset);
    builder.push(" AND building = ");
    builder.push_bind(key.building as i32);
    builder.push(" AND meter_instance = ");
    builder.push_bind(key.instance as i32);

    if let Some(sections) = sections {
        builder.push(" AND (");
        if sections.is_empty() {
            // An empty restriction covers no time at all.
            builder.push("FALSE");
        } else {
            let mut first = true;
            for s in sections.sections() {
                if !first {
                    builder.push(" OR ");
                }
                first = false;
                builder.push("(ts >= ");
                builder.push_bind(s.start);
                builder.push(" AND ts < ");
                builder.push_bind(s.end);
                builder.push(")");
            }
        }
        builder.push(")");
    }

    builder.push(" GROUP BY power_type ORDER BY power_type");

    let rows = builder
        .build_query_as::<EnergyTotalRow>()
        .fetch_all(pool)
        .await?;

    Ok(rows)
}
