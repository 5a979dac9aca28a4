pub mod db;
pub mod domain;

pub use domain::{Meter, MeterGroup, MeterKey, PowerType, TimeSection, TimeSectionSet, TotalEnergy};
