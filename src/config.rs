use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::errors::{CameraServerError, Result};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_START_PORT: u16 = 8081;
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// Legal ranges for device controls. Zero is a valid value for all of them.
pub const BRIGHTNESS_RANGE: (f64, f64) = (0.0, 255.0);
pub const EXPOSURE_RANGE: (f64, f64) = (0.0, 10000.0);
pub const WHITE_BALANCE_RANGE: (f64, f64) = (0.0, 10000.0);

/// One camera in the persisted configuration document.
///
/// `port` is the dedicated per-camera HTTP port; when omitted it is filled
/// in by [`assign_ports`]. Control values are optional and `Some(0.0)` is
/// distinct from "not configured".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEntry {
    pub id: String,
    pub name: String,
    pub device: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<f64>,
}

impl CameraEntry {
    /// Target resolution for placeholder rendering, falling back to defaults.
    pub fn resolution(&self) -> (u32, u32) {
        (
            self.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            self.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// The persisted configuration document (`cameras.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cameras: Vec<CameraEntry>,
    /// Set when the loaded auth section was unusable and got disabled.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auth_error: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            auth: AuthConfig::default(),
            cameras: Vec::new(),
            auth_error: false,
        }
    }
}

impl ServerConfig {
    /// Load the configuration document, falling back to an empty default
    /// when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No configuration at {}, starting with empty config", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_json::from_str(&content)?;
        config.sanitize_auth();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Auth enabled with empty credentials is never honored: disable it and
    /// flag the document so the API can surface the problem.
    pub fn sanitize_auth(&mut self) {
        if self.auth.enabled && (self.auth.username.is_empty() || self.auth.password.is_empty()) {
            warn!("Auth enabled but credentials are empty, disabling auth");
            self.auth.enabled = false;
            self.auth_error = true;
        }
    }
}

fn check_control(id: &str, name: &str, value: Option<f64>, range: (f64, f64)) -> Result<()> {
    if let Some(v) = value {
        if !v.is_finite() {
            return Err(CameraServerError::invalid_config(format!(
                "Camera '{}': {} must be a number",
                id, name
            )));
        }
        if v < range.0 || v > range.1 {
            return Err(CameraServerError::invalid_config(format!(
                "Camera '{}': {} {} outside valid range {}..={}",
                id, name, v, range.0, range.1
            )));
        }
    }
    Ok(())
}

/// Validate a proposed camera list: unique ids, unique explicit ports,
/// in-range control values. Zero-valued controls are legal.
pub fn validate_entries(entries: &[CameraEntry]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut ports = HashSet::new();

    for entry in entries {
        if entry.id.is_empty() {
            return Err(CameraServerError::invalid_config("Camera id must not be empty"));
        }
        if !ids.insert(entry.id.as_str()) {
            return Err(CameraServerError::invalid_config(format!(
                "Duplicate camera id '{}'",
                entry.id
            )));
        }
        if let Some(port) = entry.port {
            if port == 0 {
                return Err(CameraServerError::invalid_config(format!(
                    "Camera '{}': port must be positive",
                    entry.id
                )));
            }
            if !ports.insert(port) {
                return Err(CameraServerError::invalid_config(format!(
                    "Duplicate port {} (camera '{}')",
                    port, entry.id
                )));
            }
        }
        check_control(&entry.id, "brightness", entry.brightness, BRIGHTNESS_RANGE)?;
        check_control(&entry.id, "exposure", entry.exposure, EXPOSURE_RANGE)?;
        check_control(&entry.id, "white_balance", entry.white_balance, WHITE_BALANCE_RANGE)?;
    }
    Ok(())
}

/// Fill in missing ports deterministically, in entry order.
///
/// Explicit ports are honored on first use; a later entry repeating an
/// already-claimed port is treated as unassigned. Generated ports advance
/// monotonically from `start_port`, never reusing a claimed one.
pub fn assign_ports(entries: &[CameraEntry], start_port: u16) -> Vec<CameraEntry> {
    let mut claimed: HashSet<u16> = HashSet::new();
    let mut next_port = start_port;
    let mut assigned = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut entry = entry.clone();
        let port = match entry.port {
            Some(p) if claimed.insert(p) => {
                if p >= next_port {
                    next_port = p + 1;
                }
                p
            }
            _ => {
                while !claimed.insert(next_port) {
                    next_port += 1;
                }
                let p = next_port;
                next_port += 1;
                p
            }
        };
        entry.port = Some(port);
        assigned.push(entry);
    }
    assigned
}
