use std::{
    fs,
    path::{Path, PathBuf},
};

use analysis::cache::{CenterlineStore, TrackKey};
use analysis::{AnalysisError, Result};
use model::TrackGeometry;
use tracing::debug;

/// One pretty-printed JSON file per track key inside a directory.
///
/// Saves go through a temporary file and a rename, so a reader never sees a
/// half-written geometry. Concurrent writers to the same key still need
/// outside coordination.
pub struct FileStore {
    dir: PathBuf,
}

fn file_stem_part(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn store_err(key: &TrackKey, e: impl std::error::Error + Send + Sync + 'static) -> AnalysisError {
    AnalysisError::Store { key: key.to_string(), source: Box::new(e) }
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &TrackKey) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", file_stem_part(&key.track), file_stem_part(&key.session)))
    }
}

impl CenterlineStore for FileStore {
    fn load(&self, key: &TrackKey) -> Result<Option<TrackGeometry>> {
        let path = self.path_for(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err(key, e)),
        };
        let geometry: TrackGeometry = serde_json::from_slice(&raw).map_err(|e| store_err(key, e))?;
        debug!(path = %path.display(), "read cached geometry");
        Ok(Some(geometry))
    }

    fn save(&self, key: &TrackKey, geometry: &TrackGeometry) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| store_err(key, e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(geometry).map_err(|e| store_err(key, e))?;
        fs::write(&tmp, raw).map_err(|e| store_err(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| store_err(key, e))?;
        debug!(path = %path.display(), "wrote cached geometry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis::cache::{compute_or_load, CacheOutcome};
    use model::{BandStats, Centerline, Point2, TrackBand};

    fn geometry() -> TrackGeometry {
        let points = vec![Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), Point2::new(10.0, 5.0), Point2::new(0.0, 0.0)];
        TrackGeometry {
            centerline: Centerline { points: points.clone() },
            band: Some(TrackBand {
                left: points[..3].to_vec(),
                right: points[..3].to_vec(),
                stats: Some(BandStats {
                    width_p05: 6.0,
                    width_p50: 9.5,
                    width_p95: 14.0,
                    min_width: 6.0,
                    max_width: 16.0,
                    stations: 3,
                    samples_used: 120,
                }),
            }),
        }
    }

    #[test]
    fn test_missing_key_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache"));
        assert_eq!(store.load(&TrackKey::new("barber", "race1")).unwrap(), None);
    }

    #[test]
    fn test_geometry_survives_a_new_process() {
        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("barber", "race 1");
        {
            let store = FileStore::new(dir.path());
            let (_, outcome) = compute_or_load(&store, &key, false, || Ok(geometry())).unwrap();
            assert_eq!(outcome, CacheOutcome::Computed);
        }
        let store = FileStore::new(dir.path());
        assert!(store.path_for(&key).ends_with("barber__race_1.json"));
        let (g, outcome) = compute_or_load(&store, &key, false, || panic!("must load from disk")).unwrap();
        assert_eq!(outcome, CacheOutcome::Loaded);
        assert_eq!(g, geometry());
    }

    #[test]
    fn test_corrupt_file_reports_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let key = TrackKey::new("barber", "race2");
        fs::write(store.path_for(&key), b"{ not json").unwrap();
        let err = store.load(&key).unwrap_err();
        assert_eq!(err.stage(), analysis::Stage::Cache);
        assert!(err.to_string().contains("barber/race2"));
    }
}
