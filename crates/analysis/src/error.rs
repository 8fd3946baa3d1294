use std::fmt;

/// Pipeline stage that raised an error, carried so operators can judge partial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Threshold,
    Detection,
    Centerline,
    Band,
    Zones,
    Dispersion,
    Summary,
    Cache,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Threshold => "threshold",
            Stage::Detection => "detection",
            Stage::Centerline => "centerline",
            Stage::Band => "band",
            Stage::Zones => "zones",
            Stage::Dispersion => "dispersion",
            Stage::Summary => "summary",
            Stage::Cache => "cache",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("[{stage}] invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        stage: Stage,
        name: &'static str,
        reason: String,
    },
    #[error("[{stage}] vehicle {vehicle} has no telemetry")]
    VehicleNotFound { stage: Stage, vehicle: u32 },
    #[error("[{stage}] vehicle {vehicle} lap {lap}: {reason}")]
    Lap {
        stage: Stage,
        vehicle: u32,
        lap: u32,
        reason: String,
    },
    #[error("[{stage}] {reason}")]
    Degenerate { stage: Stage, reason: String },
    #[error("[threshold] {0}")]
    NoBrakePressure(String),
    #[error("[cache] store `{key}`: {source}")]
    Store {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl AnalysisError {
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::InvalidParameter { stage, .. }
            | AnalysisError::VehicleNotFound { stage, .. }
            | AnalysisError::Lap { stage, .. }
            | AnalysisError::Degenerate { stage, .. } => *stage,
            AnalysisError::NoBrakePressure(_) => Stage::Threshold,
            AnalysisError::Store { .. } => Stage::Cache,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_stage_and_key() {
        let e = AnalysisError::Lap {
            stage: Stage::Centerline,
            vehicle: 13,
            lap: 18,
            reason: "only 1 point after cleaning".into(),
        };
        assert_eq!(e.to_string(), "[centerline] vehicle 13 lap 18: only 1 point after cleaning");
        assert_eq!(e.stage(), Stage::Centerline);
    }

    #[test]
    fn test_threshold_error_display() {
        let e = AnalysisError::NoBrakePressure("no positive readings".into());
        assert_eq!(e.to_string(), "[threshold] no positive readings");
    }
}
