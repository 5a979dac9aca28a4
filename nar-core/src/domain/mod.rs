pub mod energy;
pub mod meter;
pub mod power;
pub mod sections;

pub use energy::TotalEnergy;
pub use meter::{Meter, MeterGroup, MeterKey};
pub use power::PowerType;
pub use sections::{TimeSection, TimeSectionSet};
