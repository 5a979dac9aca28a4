use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// AC power measurement kind. `Active` is the default request; `Reactive`
/// appears in recorded data but is never a requested default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerType {
    #[default]
    Active,
    Apparent,
    Reactive,
}

impl fmt::Display for PowerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerType::Active => write!(f, "active"),
            PowerType::Apparent => write!(f, "apparent"),
            PowerType::Reactive => write!(f, "reactive"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown power type '{0}'")]
pub struct UnknownPowerType(pub String);

impl FromStr for PowerType {
    type Err = UnknownPowerType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(PowerType::Active),
            "apparent" => Ok(PowerType::Apparent),
            "reactive" => Ok(PowerType::Reactive),
            other => Err(UnknownPowerType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types_case_insensitively() {
        assert_eq!("active".parse::<PowerType>().unwrap(), PowerType::Active);
        assert_eq!(" Apparent ".parse::<PowerType>().unwrap(), PowerType::Apparent);
        assert_eq!("REACTIVE".parse::<PowerType>().unwrap(), PowerType::Reactive);
    }

    #[test]
    fn rejects_unknown_type() {
        assert!("voltampere".parse::<PowerType>().is_err());
    }

    #[test]
    fn default_is_active() {
        assert_eq!(PowerType::default(), PowerType::Active);
    }
}
