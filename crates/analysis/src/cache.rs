//! Per-track geometry cache.
//!
//! Building a centerline and band is the slow stage, so geometry is keyed by
//! (track, session) and reused across runs unless a rebuild is forced.

use std::collections::HashMap;
use std::fmt;

use model::TrackGeometry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub track: String,
    pub session: String,
}

impl TrackKey {
    pub fn new(track: impl Into<String>, session: impl Into<String>) -> Self {
        Self { track: track.into(), session: session.into() }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.track, self.session)
    }
}

pub trait CenterlineStore {
    fn load(&self, key: &TrackKey) -> Result<Option<TrackGeometry>>;
    fn save(&self, key: &TrackKey, geometry: &TrackGeometry) -> Result<()>;
}

/// In-process store, mostly for tests and single-run pipelines.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<TrackKey, TrackGeometry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl CenterlineStore for MemoryStore {
    fn load(&self, key: &TrackKey) -> Result<Option<TrackGeometry>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn save(&self, key: &TrackKey, geometry: &TrackGeometry) -> Result<()> {
        self.inner.lock().insert(key.clone(), geometry.clone());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Loaded,
    Computed,
}

/// Return cached geometry for `key`, or run `build` and store its result.
///
/// `force` skips the lookup but still saves. A failing `build` leaves the
/// store untouched.
pub fn compute_or_load<S, F>(store: &S, key: &TrackKey, force: bool, build: F) -> Result<(TrackGeometry, CacheOutcome)>
where
    S: CenterlineStore + ?Sized,
    F: FnOnce() -> Result<TrackGeometry>,
{
    if !force {
        if let Some(geometry) = store.load(key)? {
            info!(%key, stations = geometry.centerline.stations().len(), "loaded cached track geometry");
            return Ok((geometry, CacheOutcome::Loaded));
        }
        debug!(%key, "no cached track geometry");
    }
    let geometry = build()?;
    store.save(key, &geometry)?;
    info!(%key, force, "computed and cached track geometry");
    Ok((geometry, CacheOutcome::Computed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalysisError, Stage};
    use model::{Centerline, Point2};

    fn geometry(x: f64) -> TrackGeometry {
        TrackGeometry {
            centerline: Centerline {
                points: vec![Point2::new(x, 0.0), Point2::new(x + 1.0, 0.0), Point2::new(x, 1.0), Point2::new(x, 0.0)],
            },
            band: None,
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(TrackKey::new("barber", "race1").to_string(), "barber/race1");
    }

    #[test]
    fn test_second_call_loads_without_building() {
        let store = MemoryStore::new();
        let key = TrackKey::new("barber", "race1");
        let (g, outcome) = compute_or_load(&store, &key, false, || Ok(geometry(0.0))).unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(store.len(), 1);

        let (again, outcome) =
            compute_or_load(&store, &key, false, || panic!("cached geometry must not be rebuilt")).unwrap();
        assert_eq!(outcome, CacheOutcome::Loaded);
        assert_eq!(again, g);
    }

    #[test]
    fn test_force_rebuilds_and_overwrites() {
        let store = MemoryStore::new();
        let key = TrackKey::new("barber", "race1");
        compute_or_load(&store, &key, false, || Ok(geometry(0.0))).unwrap();
        let (g, outcome) = compute_or_load(&store, &key, true, || Ok(geometry(5.0))).unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(store.load(&key).unwrap(), Some(g));
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let store = MemoryStore::new();
        let key = TrackKey::new("barber", "race2");
        let err = compute_or_load(&store, &key, false, || {
            Err(AnalysisError::Degenerate { stage: Stage::Centerline, reason: "empty lap".into() })
        })
        .unwrap_err();
        assert_eq!(err.stage(), Stage::Centerline);
        assert!(store.is_empty());
    }
}
