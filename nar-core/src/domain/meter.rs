use std::fmt;

use serde::{Deserialize, Serialize};

/// One dataset/building's full metering tree, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeterGroup {
    pub dataset: String,
    pub building: u32,
}

impl MeterGroup {
    pub fn new<S: Into<String>>(dataset: S, building: u32) -> Self {
        Self {
            dataset: dataset.into(),
            building,
        }
    }
}

/// Identifies one meter: (instance, building, dataset) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeterKey {
    pub instance: u32,
    pub building: u32,
    pub dataset: String,
}

impl MeterKey {
    /// Scope an instance number to a group's building and dataset.
    pub fn in_group(instance: u32, group: &MeterGroup) -> Self {
        Self {
            instance,
            building: group.building,
            dataset: group.dataset.clone(),
        }
    }
}

impl fmt::Display for MeterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/building{}/meter{}", self.dataset, self.building, self.instance)
    }
}

/// Handle to a mains or sub-meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    pub key: MeterKey,
    pub appliance_label: Option<String>,
}

impl Meter {
    pub fn new(key: MeterKey) -> Self {
        Self {
            key,
            appliance_label: None,
        }
    }

    pub fn with_label<S: Into<String>>(key: MeterKey, label: S) -> Self {
        Self {
            key,
            appliance_label: Some(label.into()),
        }
    }
}
