//! Chart pattern matchers
//!
//! Each matcher inspects the trailing swings of a pivot sequence plus the bars that follow
//! the last swing, and reports at most one ongoing occurrence of its pattern.
//!
//! # Matchers
//!
//! - **Contraction**: VCPU, VCPD (volatility contraction up/down)
//! - **Double**: Double Bottom, Double Top
//! - **Head and shoulders**: HNSD (top), HNSU (inverse)
//! - **Triangle**: Symmetric, Ascending, Descending

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple matcher types.
macro_rules! impl_with_defaults {
  ($($matcher:ty),* $(,)?) => {
    $(impl $matcher {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod contraction;
pub mod double;
pub mod head_shoulders;
pub mod triangle;

pub use contraction::*;
pub use double::*;
pub use head_shoulders::*;
pub use helpers::{pct_diff, relative_slope, swings};
pub use triangle::*;
