pub mod fixture;
pub mod questdb;

pub use fixture::FixtureProvider;
pub use questdb::QuestDbProvider;

use nar_core::domain::{Meter, MeterGroup, MeterKey, TimeSectionSet, TotalEnergy};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Section-restricted energy cannot be reconciled for this meter. This is
    /// a lookup failure, not a "no data" result, and it is the only condition
    /// fatal to a ratio computation.
    #[error("section data unavailable for meter {meter}")]
    SectionsUnavailable { meter: MeterKey },
    #[error("meter {meter} does not resolve")]
    UnresolvedKey { meter: MeterKey },
    #[error("no mains meter registered for {dataset}/building{building}")]
    NoMainsMeter { dataset: String, building: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Resolves meters and their energy totals for one metering tree.
///
/// Implementations must be safe for concurrent read access; the engine runs
/// one sequential pass per invocation but callers may run invocations in
/// parallel.
#[async_trait::async_trait]
pub trait MeterProvider: Send + Sync {
    async fn mains(&self, group: &MeterGroup) -> Result<Meter, ProviderError>;

    async fn meters_directly_downstream_of_mains(
        &self,
        group: &MeterGroup,
    ) -> Result<Vec<Meter>, ProviderError>;

    /// Resolve explicit instance numbers to meter handles scoped to `group`,
    /// preserving the caller's order. Duplicates are passed through, not
    /// deduplicated.
    async fn resolve_meters(
        &self,
        group: &MeterGroup,
        instances: &[u32],
    ) -> Result<Vec<Meter>, ProviderError>;

    async fn total_energy(
        &self,
        meter: &Meter,
        sections: Option<&TimeSectionSet>,
    ) -> Result<TotalEnergy, ProviderError>;
}

/// Resolves the validated time intervals of a mains meter.
#[async_trait::async_trait]
pub trait SectionProvider: Send + Sync {
    async fn good_sections(&self, mains: &Meter) -> Result<TimeSectionSet, ProviderError>;
}
