use nar_core::db::{meter_queries, MeterRow};
use nar_core::domain::{Meter, MeterGroup, MeterKey, PowerType, TimeSection, TimeSectionSet, TotalEnergy};
use sqlx::postgres::PgPool;

use crate::provider::{MeterProvider, ProviderError, SectionProvider};

/// Live provider backed by the QuestDB tables `meter_registry`,
/// `meter_readings`, and `meter_good_sections`.
pub struct QuestDbProvider {
    pool: PgPool,
}

impl QuestDbProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: anyhow::Error) -> ProviderError {
    ProviderError::Backend(e.to_string())
}

fn row_to_meter(row: MeterRow, group: &MeterGroup) -> Meter {
    let key = MeterKey::in_group(row.meter_instance as u32, group);
    match row.appliance_label {
        Some(label) => Meter::with_label(key, label),
        None => Meter::new(key),
    }
}

#[async_trait::async_trait]
impl MeterProvider for QuestDbProvider {
    async fn mains(&self, group: &MeterGroup) -> Result<Meter, ProviderError> {
        let row = meter_queries::site_meter(&self.pool, group)
            .await
            .map_err(backend)?
            .ok_or_else(|| ProviderError::NoMainsMeter {
                dataset: group.dataset.clone(),
                building: group.building,
            })?;

        Ok(row_to_meter(row, group))
    }

    async fn meters_directly_downstream_of_mains(
        &self,
        group: &MeterGroup,
    ) -> Result<Vec<Meter>, ProviderError> {
        let rows = meter_queries::downstream_of_site_meter(&self.pool, group)
            .await
            .map_err(backend)?;

        Ok(rows.into_iter().map(|r| row_to_meter(r, group)).collect())
    }

    async fn resolve_meters(
        &self,
        group: &MeterGroup,
        instances: &[u32],
    ) -> Result<Vec<Meter>, ProviderError> {
        let mut meters = Vec::with_capacity(instances.len());
        for &instance in instances {
            let row = meter_queries::meter_by_instance(&self.pool, group, instance)
                .await
                .map_err(backend)?
                .ok_or_else(|| ProviderError::UnresolvedKey {
                    meter: MeterKey::in_group(instance, group),
                })?;
            meters.push(row_to_meter(row, group));
        }
        Ok(meters)
    }

    async fn total_energy(
        &self,
        meter: &Meter,
        sections: Option<&TimeSectionSet>,
    ) -> Result<TotalEnergy, ProviderError> {
        // A section restriction can only be applied to a meter that carries a
        // section index at all; otherwise the restricted total is undefined
        // rather than empty.
        if sections.is_some() {
            let covered = meter_queries::has_section_coverage(&self.pool, &meter.key)
                .await
                .map_err(backend)?;
            if !covered {
                return Err(ProviderError::SectionsUnavailable {
                    meter: meter.key.clone(),
                });
            }
        }

        let rows = meter_queries::energy_totals(&self.pool, &meter.key, sections)
            .await
            .map_err(backend)?;

        let mut totals = TotalEnergy::new();
        for row in rows {
            match row.power_type.parse::<PowerType>() {
                Ok(power_type) => totals.insert(power_type, row.total_kwh),
                Err(_) => {
                    tracing::warn!(
                        meter = %meter.key,
                        power_type = %row.power_type,
                        "ignoring readings with unknown power type"
                    );
                }
            }
        }

        Ok(totals)
    }
}

#[async_trait::async_trait]
impl SectionProvider for QuestDbProvider {
    async fn good_sections(&self, mains: &Meter) -> Result<TimeSectionSet, ProviderError> {
        let rows = meter_queries::good_sections(&self.pool, &mains.key)
            .await
            .map_err(backend)?;

        Ok(TimeSectionSet::new(
            rows.into_iter()
                .map(|r| TimeSection::new(r.section_start, r.section_end))
                .collect(),
        ))
    }
}
