use std::collections::BTreeSet;

use nar_core::domain::{MeterGroup, MeterKey, PowerType, TotalEnergy};
use serde::Serialize;

use crate::provider::{MeterProvider, ProviderError, SectionProvider};

/// One NAR computation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarRequest {
    pub group: MeterGroup,
    pub power_type: PowerType,
    /// Explicit sub-meter instance numbers; empty derives the set from the
    /// meters directly downstream of mains.
    pub meter_keys: Vec<u32>,
    pub good_sections_only: bool,
}

impl NarRequest {
    pub fn new(group: MeterGroup) -> Self {
        Self {
            group,
            power_type: PowerType::Active,
            meter_keys: Vec::new(),
            good_sections_only: true,
        }
    }
}

/// The computation ran but could not be completed: one sub-meter's energy was
/// unreadable under the requested restriction, which invalidates the whole
/// ratio for this invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialFailure {
    pub failing_meter: MeterKey,
    pub power_type: PowerType,
    pub good_sections_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NarOutcome {
    Ratio { ratio: f64 },
    PartialFailure(PartialFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The requested power type has no counterpart in the types this meter
    /// shares with mains; the meter contributed nothing to the proportion.
    NoMatchingPowerType { shared: Vec<PowerType> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub meter: MeterKey,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarReport {
    pub outcome: NarOutcome,
    pub diagnostics: Vec<Diagnostic>,
}

impl NarReport {
    pub fn ratio(&self) -> Option<f64> {
        match self.outcome {
            NarOutcome::Ratio { ratio } => Some(ratio),
            NarOutcome::PartialFailure(_) => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum NarError {
    /// With more than one shared power type the engine indexes by the
    /// requested type without consulting the shared set; an absent key on
    /// that path breaks the caller's contract and is a hard error, distinct
    /// from a `PartialFailure`.
    #[error("power type '{power_type}' absent from energy totals of {meter}")]
    PowerTypeAbsent {
        meter: MeterKey,
        power_type: PowerType,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Computes the noise-to-aggregate ratio of one metering tree: 1 minus the
/// sum of sub-metered energy proportions relative to mains, over a common
/// (optionally good-sections-restricted) time domain, rounded to 2 decimals.
pub struct NarEngine<P> {
    provider: P,
}

impl<P> NarEngine<P>
where
    P: MeterProvider + SectionProvider,
{
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Single sequential pass over the resolved sub-meter set. The only
    /// condition fatal to the ratio is an unreadable sub-meter energy total,
    /// reported as a `PartialFailure` outcome; power-type mismatches suppress
    /// that meter's contribution and are recorded as diagnostics.
    pub async fn compute(&self, request: &NarRequest) -> Result<NarReport, NarError> {
        metrics::counter!("nar_computations_total").increment(1);

        let mains = self.provider.mains(&request.group).await?;

        let submeters = if request.meter_keys.is_empty() {
            self.provider
                .meters_directly_downstream_of_mains(&request.group)
                .await?
        } else {
            self.provider
                .resolve_meters(&request.group, &request.meter_keys)
                .await?
        };

        // Fetched once and held fixed so mains and every sub-meter are
        // measured over an identical time domain.
        let sections = if request.good_sections_only {
            Some(self.provider.good_sections(&mains).await?)
        } else {
            None
        };

        let mains_energy = self.provider.total_energy(&mains, sections.as_ref()).await?;

        let mut proportion = 0.0_f64;
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        for meter in &submeters {
            let meter_energy = match self.provider.total_energy(meter, sections.as_ref()).await {
                Ok(energy) => energy,
                Err(ProviderError::SectionsUnavailable { meter }) => {
                    tracing::warn!(
                        meter = %meter,
                        power_type = %request.power_type,
                        good_sections_only = request.good_sections_only,
                        "sub-meter energy unavailable, aborting ratio"
                    );
                    metrics::counter!("nar_partial_failures_total").increment(1);
                    return Ok(NarReport {
                        outcome: NarOutcome::PartialFailure(PartialFailure {
                            failing_meter: meter,
                            power_type: request.power_type,
                            good_sections_only: request.good_sections_only,
                        }),
                        diagnostics,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            let shared = meter_energy.shared_with(&mains_energy);
            let single = shared.iter().next().copied();

            if shared.len() > 1 {
                // Several shared types: trust that the requested type is
                // among them rather than re-checking the shared set.
                proportion +=
                    contribution(&mains_energy, &meter_energy, request.power_type, &meter.key)?;
            } else if let Some(ac_type) = single {
                if ac_type == request.power_type {
                    proportion +=
                        contribution(&mains_energy, &meter_energy, ac_type, &meter.key)?;
                } else {
                    note_mismatch(&mut diagnostics, &meter.key, &shared, request.power_type);
                }
            } else {
                note_mismatch(&mut diagnostics, &meter.key, &shared, request.power_type);
            }
        }

        let ratio = round2(1.0 - proportion);
        Ok(NarReport {
            outcome: NarOutcome::Ratio { ratio },
            diagnostics,
        })
    }
}

fn contribution(
    mains_energy: &TotalEnergy,
    meter_energy: &TotalEnergy,
    power_type: PowerType,
    meter: &MeterKey,
) -> Result<f64, NarError> {
    let meter_kwh = meter_energy
        .get(power_type)
        .ok_or_else(|| NarError::PowerTypeAbsent {
            meter: meter.clone(),
            power_type,
        })?;
    let mains_kwh = mains_energy
        .get(power_type)
        .ok_or_else(|| NarError::PowerTypeAbsent {
            meter: meter.clone(),
            power_type,
        })?;

    // A zero mains total divides to +-inf and flows through unclamped.
    Ok(meter_kwh / mains_kwh)
}

fn note_mismatch(
    diagnostics: &mut Vec<Diagnostic>,
    meter: &MeterKey,
    shared: &BTreeSet<PowerType>,
    requested: PowerType,
) {
    tracing::warn!(meter = %meter, requested = %requested, "no matching power types found");
    metrics::counter!("nar_power_type_mismatch_total").increment(1);
    diagnostics.push(Diagnostic {
        meter: meter.clone(),
        kind: DiagnosticKind::NoMatchingPowerType {
            shared: shared.iter().copied().collect(),
        },
    });
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FixtureProvider;
    use nar_core::domain::{Meter, TimeSection, TimeSectionSet};
    use time::macros::datetime;

    fn group() -> MeterGroup {
        MeterGroup::new("redd", 1)
    }

    fn meter(instance: u32) -> Meter {
        Meter::new(MeterKey::in_group(instance, &group()))
    }

    fn energy(pairs: &[(PowerType, f64)]) -> TotalEnergy {
        pairs.iter().copied().collect()
    }

    fn sections() -> TimeSectionSet {
        TimeSectionSet::new(vec![TimeSection::new(
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-01-02 00:00:00 UTC),
        )])
    }

    #[tokio::test]
    async fn single_shared_active_type_matches_direct_computation() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 30.0)]));
        fixture.add_submeter(meter(3), energy(&[(PowerType::Active, 20.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let report = engine.compute(&NarRequest::new(group())).await.unwrap();

        assert_eq!(report.ratio(), Some(0.5));
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn multiple_shared_types_use_the_requested_type() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(
            meter(1),
            energy(&[(PowerType::Active, 100.0), (PowerType::Apparent, 110.0)]),
        );
        fixture.add_submeter(
            meter(2),
            energy(&[(PowerType::Active, 30.0), (PowerType::Apparent, 33.0)]),
        );
        fixture.add_submeter(
            meter(3),
            energy(&[(PowerType::Active, 20.0), (PowerType::Apparent, 22.0)]),
        );

        let engine = NarEngine::new(fixture);
        let mut request = NarRequest::new(group());
        request.good_sections_only = false;

        let report = engine.compute(&request).await.unwrap();
        assert_eq!(report.ratio(), Some(0.5));
    }

    #[tokio::test]
    async fn requested_type_absent_among_multiple_shared_types_is_a_hard_error() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(
            meter(1),
            energy(&[(PowerType::Apparent, 110.0), (PowerType::Reactive, 12.0)]),
        );
        fixture.add_submeter(
            meter(2),
            energy(&[(PowerType::Apparent, 33.0), (PowerType::Reactive, 4.0)]),
        );

        let engine = NarEngine::new(fixture);
        let mut request = NarRequest::new(group());
        request.good_sections_only = false;

        let err = engine.compute(&request).await.unwrap_err();
        assert!(matches!(
            err,
            NarError::PowerTypeAbsent {
                power_type: PowerType::Active,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn zero_shared_types_contribute_nothing_and_leave_a_diagnostic() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 40.0)]));
        fixture.add_submeter(meter(3), energy(&[(PowerType::Reactive, 5.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let report = engine.compute(&NarRequest::new(group())).await.unwrap();

        assert_eq!(report.ratio(), Some(0.6));
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].meter.instance, 3);
        assert!(matches!(
            report.diagnostics[0].kind,
            DiagnosticKind::NoMatchingPowerType { ref shared } if shared.is_empty()
        ));
    }

    #[tokio::test]
    async fn single_shared_type_differing_from_request_is_skipped() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(
            meter(1),
            energy(&[(PowerType::Active, 100.0), (PowerType::Apparent, 110.0)]),
        );
        fixture.add_submeter(meter(2), energy(&[(PowerType::Apparent, 33.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let report = engine.compute(&NarRequest::new(group())).await.unwrap();

        assert_eq!(report.ratio(), Some(1.0));
        assert_eq!(report.diagnostics.len(), 1);
        assert!(matches!(
            report.diagnostics[0].kind,
            DiagnosticKind::NoMatchingPowerType { ref shared }
                if shared == &[PowerType::Apparent]
        ));
    }

    #[tokio::test]
    async fn unavailable_submeter_energy_aborts_with_partial_failure() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 30.0)]));
        fixture.add_submeter(meter(3), energy(&[(PowerType::Active, 20.0)]));
        fixture.add_submeter(meter(4), energy(&[(PowerType::Active, 10.0)]));
        fixture.fail_energy_lookup(meter(3).key);
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let request = NarRequest::new(group());
        let report = engine.compute(&request).await.unwrap();

        assert_eq!(report.ratio(), None);
        match &report.outcome {
            NarOutcome::PartialFailure(failure) => {
                assert_eq!(failure.failing_meter.instance, 3);
                assert_eq!(failure.power_type, PowerType::Active);
                assert!(failure.good_sections_only);
            }
            NarOutcome::Ratio { .. } => panic!("expected a partial failure"),
        }

        // No meter after the failing one was read.
        let reads = engine.provider().energy_reads();
        assert!(!reads.iter().any(|k| k.instance == 4));
    }

    #[tokio::test]
    async fn identical_inputs_yield_identical_reports() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 33.333)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let request = NarRequest::new(group());

        let first = engine.compute(&request).await.unwrap();
        let second = engine.compute(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.ratio(), Some(0.67));
    }

    #[tokio::test]
    async fn empty_submeter_set_yields_ratio_one() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let report = engine.compute(&NarRequest::new(group())).await.unwrap();

        assert_eq!(report.ratio(), Some(1.0));
    }

    #[tokio::test]
    async fn explicit_keys_restrict_and_order_the_submeter_set() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 30.0)]));
        fixture.add_submeter(meter(3), energy(&[(PowerType::Active, 20.0)]));
        fixture.add_submeter(meter(4), energy(&[(PowerType::Active, 10.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let mut request = NarRequest::new(group());
        request.meter_keys = vec![4, 2];

        let report = engine.compute(&request).await.unwrap();
        assert_eq!(report.ratio(), Some(0.6));

        let reads = engine.provider().energy_reads();
        let submeter_reads: Vec<u32> =
            reads.iter().map(|k| k.instance).filter(|&i| i != 1).collect();
        assert_eq!(submeter_reads, vec![4, 2]);
    }

    #[tokio::test]
    async fn duplicate_explicit_keys_are_passed_through() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(3), energy(&[(PowerType::Active, 20.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let mut request = NarRequest::new(group());
        request.meter_keys = vec![3, 3];

        let report = engine.compute(&request).await.unwrap();
        assert_eq!(report.ratio(), Some(0.6));
    }

    #[tokio::test]
    async fn unresolvable_explicit_key_fails_fast() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 30.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);
        let mut request = NarRequest::new(group());
        request.meter_keys = vec![2, 99];

        let err = engine.compute(&request).await.unwrap_err();
        assert!(matches!(
            err,
            NarError::Provider(ProviderError::UnresolvedKey { ref meter }) if meter.instance == 99
        ));

        // Resolution happens before any energy is read.
        assert!(engine.provider().energy_reads().is_empty());
    }

    #[tokio::test]
    async fn missing_mains_meter_fails_fast() {
        let engine = NarEngine::new(FixtureProvider::new());
        let err = engine.compute(&NarRequest::new(group())).await.unwrap_err();
        assert!(matches!(
            err,
            NarError::Provider(ProviderError::NoMainsMeter { .. })
        ));
    }

    #[tokio::test]
    async fn good_sections_are_fetched_once_and_only_when_requested() {
        let mut fixture = FixtureProvider::new();
        fixture.set_mains(meter(1), energy(&[(PowerType::Active, 100.0)]));
        fixture.add_submeter(meter(2), energy(&[(PowerType::Active, 30.0)]));
        fixture.add_submeter(meter(3), energy(&[(PowerType::Active, 20.0)]));
        fixture.set_good_sections(sections());

        let engine = NarEngine::new(fixture);

        let mut unrestricted = NarRequest::new(group());
        unrestricted.good_sections_only = false;
        engine.compute(&unrestricted).await.unwrap();
        assert_eq!(engine.provider().section_queries(), 0);

        engine.compute(&NarRequest::new(group())).await.unwrap();
        assert_eq!(engine.provider().section_queries(), 1);
    }

    #[test]
    fn round2_rounds_half_away_from_zero_cases_used_here() {
        assert_eq!(round2(0.666_666), 0.67);
        assert_eq!(round2(1.0), 1.0);
        assert_eq!(round2(-0.005_1), -0.01);
    }
}
