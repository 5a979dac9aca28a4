pub mod meter_queries;

pub use meter_queries::{EnergyTotalRow, MeterRow, SectionRow};
