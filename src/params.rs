//! Parameter metadata for pattern matchers
//!
//! Every builtin matcher publishes its tolerances as [`ParamMeta`], which lets scan
//! configuration override them by name while keeping values inside sane bounds.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use chartscan::params::ParameterizedMatcher;
//! use chartscan::prelude::*;
//!
//! for param in DoubleTopMatcher::param_meta() {
//!   println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let params = HashMap::from([("peak_tolerance", 0.01)]);
//! let matcher = DoubleTopMatcher::with_params(&params).unwrap();
//! assert_eq!(matcher.peak_tolerance.get(), 0.01);
//! ```

use std::collections::HashMap;

use crate::{MatcherId, PatternError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Ratio value in 0.0..=1.0
  Ratio,
  /// Period value (positive integer)
  Period,
}

/// Metadata for a single matcher parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "peak_tolerance")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Accepted bounds, inclusive
  pub range: (f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max) = self.range;
    if value.is_nan() || value < min || value > max {
      return Err(PatternError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ok(()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(PatternError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// PARAMETERIZED MATCHER TRAIT
// ============================================================

/// Matchers whose tolerances can be set by name
pub trait ParameterizedMatcher: Sized {
  /// Metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a matcher with parameters from a HashMap
  ///
  /// Missing parameters use their default values; unknown names are rejected.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  fn matcher_id() -> MatcherId;
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Reject parameter names that `metas` does not declare
pub fn check_known(
  params: &HashMap<&str, f64>,
  metas: &[ParamMeta],
  matcher: MatcherId,
) -> Result<()> {
  match params.keys().find(|key| !metas.iter().any(|m| m.name == **key)) {
    Some(name) => {
      Err(PatternError::UnknownParam { matcher: matcher.as_str(), name: name.to_string() })
    }
    None => Ok(()),
  }
}

fn lookup(params: &HashMap<&str, f64>, meta: &ParamMeta) -> Result<f64> {
  let value = params.get(meta.name).copied().unwrap_or(meta.default);
  meta.validate(value)?;
  Ok(value)
}

/// Ratio from params, falling back to the declared default
pub fn get_ratio(params: &HashMap<&str, f64>, meta: &ParamMeta) -> Result<Ratio> {
  Ratio::new(lookup(params, meta)?)
}

/// Period from params, falling back to the declared default
pub fn get_period(params: &HashMap<&str, f64>, meta: &ParamMeta) -> Result<Period> {
  Period::new(lookup(params, meta)? as usize)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::matchers::{ContractionUpMatcher, DoubleTopMatcher, TriangleMatcher};

  const TOLERANCE: ParamMeta = ParamMeta::ratio("tolerance", 0.05, (0.0, 0.2), "Test ratio");
  const LEGS: ParamMeta = ParamMeta::period("legs", 2.0, (1.0, 6.0), "Test period");

  #[test]
  fn test_param_meta_ratio() {
    assert_eq!(TOLERANCE.name, "tolerance");
    assert_eq!(TOLERANCE.param_type, ParamType::Ratio);
    assert_eq!(TOLERANCE.default, 0.05);
  }

  #[test]
  fn test_validate_ratio() {
    assert!(TOLERANCE.validate(0.0).is_ok());
    assert!(TOLERANCE.validate(0.2).is_ok());
    assert!(TOLERANCE.validate(0.21).is_err());
    assert!(TOLERANCE.validate(f64::NAN).is_err());
  }

  #[test]
  fn test_validate_period() {
    assert!(LEGS.validate(3.0).is_ok());
    assert!(LEGS.validate(0.0).is_err());
    assert!(LEGS.validate(2.5).is_err());
    assert!(LEGS.validate(7.0).is_err());
  }

  #[test]
  fn test_get_ratio_helper() {
    let params = HashMap::from([("tolerance", 0.1)]);
    assert!((get_ratio(&params, &TOLERANCE).unwrap().get() - 0.1).abs() < f64::EPSILON);
    assert!((get_ratio(&HashMap::new(), &TOLERANCE).unwrap().get() - 0.05).abs() < f64::EPSILON);
  }

  #[test]
  fn test_get_period_helper() {
    let params = HashMap::from([("legs", 4.0)]);
    assert_eq!(get_period(&params, &LEGS).unwrap().get(), 4);
    assert_eq!(get_period(&HashMap::new(), &LEGS).unwrap().get(), 2);
  }

  #[test]
  fn test_unknown_param_rejected() {
    let params = HashMap::from([("peak_tolerence", 0.01)]);
    let err = DoubleTopMatcher::with_params(&params).unwrap_err();
    assert!(matches!(err, PatternError::UnknownParam { matcher: "dtop", .. }));
  }

  #[test]
  fn test_defaults_match_param_meta() {
    let from_params = DoubleTopMatcher::with_params(&HashMap::new()).unwrap();
    let default = DoubleTopMatcher::default();
    assert_eq!(from_params.peak_tolerance, default.peak_tolerance);
    assert_eq!(from_params.min_depth, default.min_depth);

    let vcp = ContractionUpMatcher::with_params(&HashMap::new()).unwrap();
    assert_eq!(vcp.contractions, ContractionUpMatcher::default().contractions);

    let triangle = TriangleMatcher::with_params(&HashMap::new()).unwrap();
    assert_eq!(triangle.flat_tolerance, TriangleMatcher::default().flat_tolerance);
  }

  #[test]
  fn test_every_builtin_declares_params() {
    assert_eq!(DoubleTopMatcher::matcher_id(), MatcherId::DTOP);
    assert!(!DoubleTopMatcher::param_meta().is_empty());
    assert!(!ContractionUpMatcher::param_meta().is_empty());
    assert!(!TriangleMatcher::param_meta().is_empty());
  }
}
