use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::PowerType;

/// Energy (kWh) by power type, as measured by one meter over an optionally
/// restricted time domain. Produced fresh per meter per invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalEnergy(BTreeMap<PowerType, f64>);

impl TotalEnergy {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, power_type: PowerType, kwh: f64) {
        self.0.insert(power_type, kwh);
    }

    pub fn get(&self, power_type: PowerType) -> Option<f64> {
        self.0.get(&power_type).copied()
    }

    pub fn power_types(&self) -> BTreeSet<PowerType> {
        self.0.keys().copied().collect()
    }

    /// Power types present in both `self` and `other`.
    pub fn shared_with(&self, other: &TotalEnergy) -> BTreeSet<PowerType> {
        self.power_types()
            .intersection(&other.power_types())
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(PowerType, f64)> for TotalEnergy {
    fn from_iter<I: IntoIterator<Item = (PowerType, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_with_is_the_key_intersection() {
        let mains: TotalEnergy =
            [(PowerType::Active, 100.0), (PowerType::Apparent, 110.0)].into_iter().collect();
        let meter: TotalEnergy =
            [(PowerType::Apparent, 12.0), (PowerType::Reactive, 3.0)].into_iter().collect();

        let shared = meter.shared_with(&mains);
        assert_eq!(shared.len(), 1);
        assert!(shared.contains(&PowerType::Apparent));
    }

    #[test]
    fn disjoint_maps_share_nothing() {
        let a: TotalEnergy = [(PowerType::Active, 1.0)].into_iter().collect();
        let b: TotalEnergy = [(PowerType::Reactive, 1.0)].into_iter().collect();
        assert!(a.shared_with(&b).is_empty());
    }
}
