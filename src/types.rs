use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_BATCH_PER_DAY: usize = 49;

fn default_batch_per_day() -> usize {
    DEFAULT_BATCH_PER_DAY
}

/// Fixed shape of a tree: how many instruments each vector carries and how
/// many `update` calls a trading day is expected to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitArgs {
    pub nstock: usize,
    #[serde(default = "default_batch_per_day")]
    pub batch_per_day: usize,
}

impl InitArgs {
    pub fn new(nstock: usize, batch_per_day: usize) -> Self {
        Self {
            nstock,
            batch_per_day,
        }
    }

    pub fn with_nstock(nstock: usize) -> Self {
        Self::new(nstock, DEFAULT_BATCH_PER_DAY)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nstock == 0 {
            return Err(ConfigError::Invalid {
                reason: "nstock must be positive".to_string(),
            });
        }
        if self.batch_per_day == 0 {
            return Err(ConfigError::Invalid {
                reason: "batch_per_day must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let args: Self = serde_json::from_str(raw)?;
        args.validate()?;
        Ok(args)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Position of a tree in the trading-day state machine.
///
/// `DayClosing` is only observable while `on_day_end` rolls the windows; a
/// completed call always leaves the tree `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayPhase {
    Idle,
    DayOpen,
    DayClosing,
}

impl DayPhase {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::DayOpen => 1,
            Self::DayClosing => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Idle),
            1 => Some(Self::DayOpen),
            2 => Some(Self::DayClosing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputFieldCatalog {
    fields: BTreeSet<String>,
}

impl InputFieldCatalog {
    pub fn new(fields: impl IntoIterator<Item = String>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }
}

/// Per-batch input: one vector of `nstock` values per field name.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<&[f64]>;
}

impl FieldSource for HashMap<String, Vec<f64>> {
    fn field(&self, name: &str) -> Option<&[f64]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl FieldSource for HashMap<&str, Vec<f64>> {
    fn field(&self, name: &str) -> Option<&[f64]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl FieldSource for HashMap<&str, &[f64]> {
    fn field(&self, name: &str) -> Option<&[f64]> {
        self.get(name).copied()
    }
}

impl FieldSource for BTreeMap<String, Vec<f64>> {
    fn field(&self, name: &str) -> Option<&[f64]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl FieldSource for BTreeMap<&str, Vec<f64>> {
    fn field(&self, name: &str) -> Option<&[f64]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl FieldSource for BTreeMap<&str, &[f64]> {
    fn field(&self, name: &str) -> Option<&[f64]> {
        self.get(name).copied()
    }
}

impl<T: FieldSource + ?Sized> FieldSource for &T {
    fn field(&self, name: &str) -> Option<&[f64]> {
        (**self).field(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_args_json_defaults_batch_per_day() {
        let args = InitArgs::from_json_str(r#"{"nstock": 12}"#).expect("config should parse");
        assert_eq!(args, InitArgs::new(12, DEFAULT_BATCH_PER_DAY));
    }

    #[test]
    fn init_args_rejects_zero_values() {
        let err = InitArgs::from_json_str(r#"{"nstock": 0, "batch_per_day": 4}"#)
            .expect_err("zero nstock must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = InitArgs::new(3, 0)
            .validate()
            .expect_err("zero batch_per_day must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn init_args_malformed_json_is_reported() {
        let err = InitArgs::from_json_str("{nstock:").expect_err("bad json must fail");
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn day_phase_tags_roundtrip() {
        for phase in [DayPhase::Idle, DayPhase::DayOpen, DayPhase::DayClosing] {
            assert_eq!(DayPhase::from_tag(phase.tag()), Some(phase));
        }
        assert_eq!(DayPhase::from_tag(9), None);
    }

    #[test]
    fn field_source_lookup_works_for_str_keyed_maps() {
        let mut fields: HashMap<&str, Vec<f64>> = HashMap::new();
        fields.insert("open", vec![1.0, 2.0]);
        assert_eq!(fields.field("open"), Some(&[1.0, 2.0][..]));
        assert_eq!(fields.field("close"), None);
    }
}
