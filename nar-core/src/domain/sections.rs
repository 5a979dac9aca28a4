use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// One validated half-open interval `[start, end)` of mains data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSection {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeSection {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Ordered validated intervals of the mains meter. Computed once per
/// invocation and held fixed so mains and every sub-meter are measured over
/// an identical time domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSectionSet(Vec<TimeSection>);

impl TimeSectionSet {
    pub fn new(sections: Vec<TimeSection>) -> Self {
        Self(sections)
    }

    pub fn sections(&self) -> &[TimeSection] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.0.iter().map(TimeSection::duration).sum()
    }
}
