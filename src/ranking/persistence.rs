//! JSON snapshots of the window so a restart resumes instead of rebuilding

use super::cursor::EventCursor;
use super::types::{Audience, BoostTargetLocation};
use super::window::{BoostViews, WindowState};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is inconsistent: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalViewsEntry {
    pub target_location: BoostTargetLocation,
    pub audience: Audience,
    pub views: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostViewsEntry {
    pub boost_id: String,
    #[serde(flatten)]
    pub views: BoostViews,
}

/// Serializable form of `WindowState`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub window_secs: i64,
    pub min_cursor: Option<EventCursor>,
    pub max_cursor: Option<EventCursor>,
    pub total_views: Vec<TotalViewsEntry>,
    pub views_by_boost: Vec<BoostViewsEntry>,
    pub saved_at: i64,
}

impl WindowSnapshot {
    pub fn capture(state: &WindowState, window_secs: i64, saved_at: i64) -> Self {
        let mut total_views: Vec<TotalViewsEntry> = state
            .total_views
            .iter()
            .filter(|(_, views)| **views > 0)
            .map(|(&(target_location, audience), &views)| TotalViewsEntry {
                target_location,
                audience,
                views,
            })
            .collect();
        total_views.sort_by_key(|e| (e.target_location, e.audience));

        let mut views_by_boost: Vec<BoostViewsEntry> = state
            .views_by_boost
            .iter()
            .map(|(boost_id, views)| BoostViewsEntry {
                boost_id: boost_id.clone(),
                views: views.clone(),
            })
            .collect();
        views_by_boost.sort_by(|a, b| a.boost_id.cmp(&b.boost_id));

        Self {
            window_secs,
            min_cursor: state.min_cursor,
            max_cursor: state.max_cursor,
            total_views,
            views_by_boost,
            saved_at,
        }
    }

    /// Rebuild the window state, rejecting snapshots that break the cursor order
    pub fn into_state(self) -> Result<WindowState, SnapshotError> {
        match (self.min_cursor, self.max_cursor) {
            (Some(min), Some(max)) if min > max => {
                return Err(SnapshotError::Invalid(format!(
                    "min_cursor {} is after max_cursor {}",
                    min, max
                )));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(SnapshotError::Invalid("only one cursor is set".to_string()));
            }
            _ => {}
        }

        let mut state = WindowState::default();
        state.min_cursor = self.min_cursor;
        state.max_cursor = self.max_cursor;
        for entry in self.total_views {
            state
                .total_views
                .insert((entry.target_location, entry.audience), entry.views);
        }
        for mut entry in self.views_by_boost {
            entry.views.segments.retain(|segment| segment.views > 0);
            if entry.views.segments.iter().any(|s| s.first_cursor > s.last_cursor) {
                return Err(SnapshotError::Invalid(format!(
                    "boost {} has a segment ending before it starts",
                    entry.boost_id
                )));
            }
            if !entry.views.segments.is_empty() {
                state.views_by_boost.insert(entry.boost_id, entry.views);
            }
        }
        Ok(state)
    }
}

/// Write the window to `file_path`, replacing any previous snapshot
pub fn save_window_snapshot(
    state: &WindowState,
    window_secs: i64,
    file_path: &str,
) -> Result<(), SnapshotError> {
    let snapshot = WindowSnapshot::capture(state, window_secs, chrono::Utc::now().timestamp());
    let json = serde_json::to_string_pretty(&snapshot)?;

    if let Some(parent) = Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Write then rename so a crash never leaves a half-written snapshot
    let tmp_path = format!("{}.tmp", file_path);
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, file_path)?;

    log::debug!(
        "💾 Saved window snapshot ({} boosts) to {}",
        snapshot.views_by_boost.len(),
        file_path
    );
    Ok(())
}

/// Load a saved window, or `None` when no usable snapshot exists
///
/// A snapshot taken with a different window length is ignored: its cursors
/// bound a different range of events.
pub fn load_window_snapshot(file_path: &str, window_secs: i64) -> Result<Option<WindowState>, SnapshotError> {
    if !Path::new(file_path).exists() {
        log::info!("No existing window snapshot found: {}", file_path);
        return Ok(None);
    }

    let json = fs::read_to_string(file_path)?;
    let snapshot: WindowSnapshot = serde_json::from_str(&json)?;

    if snapshot.window_secs != window_secs {
        log::warn!(
            "⚠️  Ignoring window snapshot for {}s window (configured {}s)",
            snapshot.window_secs,
            window_secs
        );
        return Ok(None);
    }

    let boosts = snapshot.views_by_boost.len();
    let state = snapshot.into_state()?;
    log::info!(
        "📂 Loaded window snapshot from {}: {} boosts, max_cursor={:?}",
        file_path,
        boosts,
        state.max_cursor()
    );
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::window::{BoostProfile, ViewSegment};
    use tempfile::tempdir;

    fn sample_state() -> WindowState {
        let mut state = WindowState::default();
        state.min_cursor = Some(EventCursor::floor(1_000));
        state.max_cursor = Some(EventCursor::new(5_000, 3));
        state
            .total_views
            .insert((BoostTargetLocation::Newsfeed, Audience::Open), 7);
        state
            .total_views
            .insert((BoostTargetLocation::Newsfeed, Audience::Safe), 4);
        let mut relocated = BoostViews::from(segment(true, 1_500, 2_000, 3));
        relocated.segments.push_back(segment(false, 3_000, 5_000, 1));
        state.views_by_boost.insert("1001".to_string(), relocated);
        state
            .views_by_boost
            .insert("1002".to_string(), BoostViews::from(segment(false, 2_500, 4_000, 3)));
        state
    }

    fn segment(safe_for_all: bool, first_ms: i64, last_ms: i64, views: u64) -> ViewSegment {
        ViewSegment {
            profile: BoostProfile {
                target_location: BoostTargetLocation::Newsfeed,
                safe_for_all,
            },
            first_cursor: EventCursor::new(first_ms, 1),
            last_cursor: EventCursor::new(last_ms, 1),
            views,
        }
    }

    #[test]
    fn test_save_and_load_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/window.json");
        let path = path.to_str().unwrap();

        let state = sample_state();
        save_window_snapshot(&state, 3600, path).unwrap();

        let loaded = load_window_snapshot(path, 3600).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(load_window_snapshot(path.to_str().unwrap(), 3600).unwrap().is_none());
    }

    #[test]
    fn test_window_length_mismatch_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("window.json");
        let path = path.to_str().unwrap();

        save_window_snapshot(&sample_state(), 3600, path).unwrap();
        assert!(load_window_snapshot(path, 600).unwrap().is_none());
    }

    #[test]
    fn test_inverted_cursors_are_rejected() {
        let mut snapshot = WindowSnapshot::capture(&sample_state(), 3600, 0);
        snapshot.min_cursor = Some(EventCursor::new(9_000, 1));
        assert!(matches!(snapshot.into_state(), Err(SnapshotError::Invalid(_))));
    }

    #[test]
    fn test_empty_segments_are_dropped_on_load() {
        let mut snapshot = WindowSnapshot::capture(&sample_state(), 3600, 0);
        snapshot.views_by_boost[1].views = BoostViews::from(segment(false, 2_500, 4_000, 0));

        let state = snapshot.into_state().unwrap();
        assert_eq!(state.views_for("1001"), 4);
        assert_eq!(state.views_for("1002"), 0);
        assert!(state.boost_views().all(|(id, _)| id != "1002"));
    }

    #[test]
    fn test_inverted_segment_is_rejected() {
        let mut snapshot = WindowSnapshot::capture(&sample_state(), 3600, 0);
        snapshot.views_by_boost[1].views = BoostViews::from(segment(false, 4_000, 2_500, 3));
        assert!(matches!(snapshot.into_state(), Err(SnapshotError::Invalid(_))));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("window.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_window_snapshot(path.to_str().unwrap(), 3600),
            Err(SnapshotError::Json(_))
        ));
    }
}
