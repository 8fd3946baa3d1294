use model::ZoneSplit;
use serde::{Deserialize, Serialize};

use crate::band::BandPolicy;
use crate::brakes::DetectionParams;
use crate::centerline::CenterlineParams;
use crate::error::{AnalysisError, Result, Stage};

pub const DEFAULT_ZONE_BOUNDS_PADDING_M: f64 = 20.0;

/// Every tunable of a pipeline run. Missing fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Vehicle whose lap becomes the centerline; first vehicle in the data when unset.
    pub reference_vehicle: Option<u32>,
    /// Explicit reference lap; the lap with the most samples when unset.
    pub reference_lap: Option<u32>,
    pub centerline: CenterlineParams,
    pub band: Option<BandPolicy>,
    pub detection: DetectionParams,
    pub splits: Vec<ZoneSplit>,
    pub zone_bounds_padding_m: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference_vehicle: None,
            reference_lap: None,
            centerline: CenterlineParams::default(),
            band: Some(BandPolicy::default()),
            detection: DetectionParams::default(),
            splits: Vec::new(),
            zone_bounds_padding_m: DEFAULT_ZONE_BOUNDS_PADDING_M,
        }
    }
}

fn invalid(stage: Stage, name: &'static str, reason: impl Into<String>) -> AnalysisError {
    AnalysisError::InvalidParameter { stage, name, reason: reason.into() }
}

impl PipelineConfig {
    /// Reject tunings no stage can run with, before any work starts.
    pub fn validate(&self) -> Result<()> {
        let r = &self.centerline.resample;
        if !(r.step_m > 0.0) {
            return Err(invalid(Stage::Centerline, "step_m", format!("must be positive, got {}", r.step_m)));
        }
        if !(r.spike_threshold_m > 0.0) {
            return Err(invalid(
                Stage::Centerline,
                "spike_threshold_m",
                format!("must be positive, got {}", r.spike_threshold_m),
            ));
        }
        let pct = self.detection.threshold_percentile;
        if !(0.0..=100.0).contains(&pct) {
            return Err(invalid(Stage::Threshold, "threshold_percentile", format!("{pct} outside [0, 100]")));
        }
        if let Some((lo, hi)) = self.detection.lap_length_range_m {
            if lo > hi {
                return Err(invalid(Stage::Detection, "lap_length_range_m", format!("{lo} > {hi}")));
            }
        }
        match &self.band {
            Some(BandPolicy::Fixed { width_m }) if !(*width_m > 0.0) => {
                return Err(invalid(Stage::Band, "width_m", format!("must be positive, got {width_m}")));
            }
            Some(BandPolicy::DataDriven(p)) => {
                if !(p.sample_fraction > 0.0 && p.sample_fraction <= 1.0) {
                    return Err(invalid(Stage::Band, "sample_fraction", format!("{} outside (0, 1]", p.sample_fraction)));
                }
                if p.min_width_m > p.max_width_m {
                    return Err(invalid(
                        Stage::Band,
                        "min_width_m",
                        format!("{} exceeds max_width_m {}", p.min_width_m, p.max_width_m),
                    ));
                }
            }
            _ => {}
        }
        if self.zone_bounds_padding_m < 0.0 {
            return Err(invalid(Stage::Zones, "zone_bounds_padding_m", "must not be negative"));
        }
        Ok(())
    }
}
