use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use nar_core::domain::{Meter, MeterGroup, MeterKey, TimeSectionSet, TotalEnergy};

use crate::provider::{MeterProvider, ProviderError, SectionProvider};

/// In-memory provider for tests. Stored totals are treated as already
/// restricted, so the section set itself never changes a meter's energy; a
/// meter can instead be armed to fail its energy lookup outright.
#[derive(Default)]
pub struct FixtureProvider {
    mains: Option<Meter>,
    downstream: Vec<Meter>,
    energy: HashMap<MeterKey, TotalEnergy>,
    good_sections: TimeSectionSet,
    fail_energy_for: HashSet<MeterKey>,
    energy_reads: Mutex<Vec<MeterKey>>,
    section_queries: AtomicUsize,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mains(&mut self, meter: Meter, energy: TotalEnergy) {
        self.energy.insert(meter.key.clone(), energy);
        self.mains = Some(meter);
    }

    /// Register a sub-meter directly downstream of mains.
    pub fn add_submeter(&mut self, meter: Meter, energy: TotalEnergy) {
        self.energy.insert(meter.key.clone(), energy);
        self.downstream.push(meter);
    }

    pub fn set_good_sections(&mut self, sections: TimeSectionSet) {
        self.good_sections = sections;
    }

    /// Arm a meter so its next energy lookup reports `SectionsUnavailable`.
    pub fn fail_energy_lookup(&mut self, key: MeterKey) {
        self.fail_energy_for.insert(key);
    }

    /// Keys whose energy was read, in read order (mains included).
    pub fn energy_reads(&self) -> Vec<MeterKey> {
        self.energy_reads.lock().expect("fixture lock poisoned").clone()
    }

    pub fn section_queries(&self) -> usize {
        self.section_queries.load(Ordering::SeqCst)
    }

    fn registered(&self, instance: u32) -> Option<&Meter> {
        self.downstream
            .iter()
            .chain(self.mains.iter())
            .find(|m| m.key.instance == instance)
    }
}

#[async_trait::async_trait]
impl MeterProvider for FixtureProvider {
    async fn mains(&self, group: &MeterGroup) -> Result<Meter, ProviderError> {
        self.mains.clone().ok_or_else(|| ProviderError::NoMainsMeter {
            dataset: group.dataset.clone(),
            building: group.building,
        })
    }

    async fn meters_directly_downstream_of_mains(
        &self,
        _group: &MeterGroup,
    ) -> Result<Vec<Meter>, ProviderError> {
        Ok(self.downstream.clone())
    }

    async fn resolve_meters(
        &self,
        group: &MeterGroup,
        instances: &[u32],
    ) -> Result<Vec<Meter>, ProviderError> {
        instances
            .iter()
            .map(|&instance| {
                self.registered(instance)
                    .cloned()
                    .ok_or_else(|| ProviderError::UnresolvedKey {
                        meter: MeterKey::in_group(instance, group),
                    })
            })
            .collect()
    }

    async fn total_energy(
        &self,
        meter: &Meter,
        _sections: Option<&TimeSectionSet>,
    ) -> Result<TotalEnergy, ProviderError> {
        if self.fail_energy_for.contains(&meter.key) {
            return Err(ProviderError::SectionsUnavailable {
                meter: meter.key.clone(),
            });
        }

        self.energy_reads
            .lock()
            .expect("fixture lock poisoned")
            .push(meter.key.clone());

        Ok(self.energy.get(&meter.key).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl SectionProvider for FixtureProvider {
    async fn good_sections(&self, _mains: &Meter) -> Result<TimeSectionSet, ProviderError> {
        self.section_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.good_sections.clone())
    }
}
