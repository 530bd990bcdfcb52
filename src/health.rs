use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::CameraState;
use crate::config::CameraEntry;

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub state: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub cameras: BTreeMap<String, CameraStatus>,
    pub summary: HealthCounts,
    pub checked_at: DateTime<Utc>,
}

/// Summarize the runtime state of every configured camera. Cameras the
/// runtime has no entry for yet (still starting, or failed to open) are
/// reported offline.
pub fn summarize(
    configured: &[CameraEntry],
    runtime: &HashMap<String, (CameraState, String)>,
) -> HealthSummary {
    let mut cameras = BTreeMap::new();
    let mut online = 0;

    for entry in configured {
        let status = match runtime.get(&entry.id) {
            Some((state, message)) => {
                if *state == CameraState::Online {
                    online += 1;
                }
                CameraStatus {
                    state: state.to_string(),
                    message: message.clone(),
                }
            }
            None => CameraStatus {
                state: CameraState::Offline.to_string(),
                message: "not started".to_string(),
            },
        };
        cameras.insert(entry.id.clone(), status);
    }

    let total = configured.len();
    HealthSummary {
        cameras,
        summary: HealthCounts {
            total,
            online,
            offline: total - online,
        },
        checked_at: Utc::now(),
    }
}

/// Flat text exposition of the same data: one gauge line per camera,
/// 1 for online, 0 for everything else.
pub fn metrics_text(summary: &HealthSummary) -> String {
    let mut out = String::new();
    out.push_str("# HELP rpicam_camera_online 1 if the camera is capturing frames\n");
    out.push_str("# TYPE rpicam_camera_online gauge\n");
    for (id, status) in &summary.cameras {
        let value = if status.state == "online" { 1 } else { 0 };
        out.push_str(&format!("rpicam_camera_online{{camera=\"{}\"}} {}\n", id, value));
    }
    out.push_str("# HELP rpicam_cameras_total Number of configured cameras\n");
    out.push_str("# TYPE rpicam_cameras_total gauge\n");
    out.push_str(&format!("rpicam_cameras_total {}\n", summary.summary.total));
    out.push_str("# HELP rpicam_cameras_online Number of cameras currently capturing\n");
    out.push_str("# TYPE rpicam_cameras_online gauge\n");
    out.push_str(&format!("rpicam_cameras_online {}\n", summary.summary.online));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::entry;

    #[test]
    fn summarize_counts_online_and_defaults_missing_to_offline() {
        let configured = vec![entry("camA", 0), entry("camB", 1)];
        let mut runtime = HashMap::new();
        runtime.insert(
            "camA".to_string(),
            (CameraState::Online, "capturing".to_string()),
        );

        let health = summarize(&configured, &runtime);
        assert_eq!(health.summary.total, 2);
        assert_eq!(health.summary.online, 1);
        assert_eq!(health.summary.offline, 1);
        assert_eq!(health.cameras["camB"].state, "offline");
        assert_eq!(health.cameras["camB"].message, "not started");
    }

    #[test]
    fn metrics_renders_one_gauge_per_camera() {
        let configured = vec![entry("camM", 0)];
        let mut runtime = HashMap::new();
        runtime.insert(
            "camM".to_string(),
            (CameraState::Offline, "not started".to_string()),
        );

        let text = metrics_text(&summarize(&configured, &runtime));
        assert!(text.contains("rpicam_camera_online{camera=\"camM\"} 0"));
        assert!(text.contains("rpicam_cameras_total 1"));
    }

    #[test]
    fn every_metric_family_carries_help_and_type_lines() {
        let text = metrics_text(&summarize(&[entry("camH", 0)], &HashMap::new()));
        for family in [
            "rpicam_camera_online",
            "rpicam_cameras_total",
            "rpicam_cameras_online",
        ] {
            assert!(text.contains(&format!("# HELP {} ", family)), "{}", family);
            assert!(text.contains(&format!("# TYPE {} gauge", family)), "{}", family);
        }
    }
}
