//! Brake point consistency analysis: reference centerline and track band,
//! brake onset detection, zone assignment and per-driver dispersion.

pub mod band;
pub mod brakes;
pub mod cache;
pub mod centerline;
pub mod config;
pub mod dispersion;
pub mod error;
pub mod geometry;
pub mod stats;
pub mod summary;
pub mod zones;

#[cfg(test)]
mod testutil;

pub use error::{AnalysisError, Result, Stage};
