//! Calibration constants and on-disk persistence.
//!
//! A JSON file under a platform config dir, loaded once at startup and
//! saved back out when it doesn't exist yet. Nothing here is computed at
//! runtime; it's purely the fixed lens/mirror/motor calibration a given
//! device ships with, plus a handful of runtime toggles worth persisting
//! across runs.

use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AntError, Result};

pub const FRAME_WIDTH: i32 = 1280;
pub const FRAME_HEIGHT: i32 = 960;

/// Lens/mirror/motor calibration. Defaults are the measured values from the
/// original device (see `original_source/units/hw.cpp`); a deployment with
/// different optics overrides them via the JSON config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub lens_focal_len_in: f64,
    pub in_per_pix: f64,
    pub camera_height_in: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
    pub m1x: f64,
    pub m1y: f64,
    pub m1z: f64,
    pub m2z: f64,
    pub m2za: f64,
    pub m2zb: f64,
    pub camera_to_mirrors_x: f64,
    pub camera_to_mirrors_y: f64,
    pub steps_per_rev: f64,
    pub microsteps_per_step: f64,
    pub gear_ratio: f64,
    pub m1_min: i32,
    pub m1_max: i32,
    pub m2_min: i32,
    pub m2_max: i32,
    pub accel: f64,
    pub max_v: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        let m2z = 10.125;
        GeometryConfig {
            lens_focal_len_in: 8.76 / 25.4,
            in_per_pix: 0.00465 / 25.4,
            camera_height_in: 320.5 / 25.4,
            k1: 0.0010958,
            k2: 0.00021057,
            k3: -5.575E-6,
            p1: -0.00299204,
            p2: 0.000119739,
            p3: -0.0227986,
            m1x: 0.0,
            m1y: 0.0,
            m1z: 1.625,
            m2z,
            m2za: m2z - 0.625,
            m2zb: m2z + 0.625,
            camera_to_mirrors_x: 49.0 / 25.4,
            camera_to_mirrors_y: 10.1,
            steps_per_rev: 200.0,
            microsteps_per_step: 16.0,
            gear_ratio: 5.2,
            m1_min: -380,
            m1_max: 345,
            m2_min: -860,
            m2_max: 980,
            accel: 2800.0,
            max_v: 800.0,
        }
    }
}

/// Tunable thresholds for blob scoring, association, and the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub ant_len_mm: f64,
    pub ant_width_mm: f64,
    pub ant_color_thresh: u8,
    pub max_score: i32,
    pub close_blob_px: f64,
    pub best_track_score_floor: i32,
    pub best_track_max_age_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            ant_len_mm: 2.5,
            ant_width_mm: 1.25,
            ant_color_thresh: 80,
            max_score: 50,
            close_blob_px: 40.0,
            best_track_score_floor: 25,
            best_track_max_age_frames: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub geometry: GeometryConfig,
    pub tracker: TrackerConfig,
    pub backlash_log_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub neural_classifier: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            geometry: GeometryConfig::default(),
            tracker: TrackerConfig::default(),
            backlash_log_path: None,
            snapshot_dir: None,
            neural_classifier: false,
        }
    }
}

pub fn get_project_dirs() -> directories::ProjectDirs {
    directories::ProjectDirs::from("net", "myrmidon", "myrmidon")
        .expect("cannot find project directories")
}

/// Loads settings from the platform config dir, writing out the defaults if
/// no config file exists yet. Corrupt config falls back to defaults rather
/// than failing startup.
pub fn load() -> Result<Settings> {
    let project_dirs = get_project_dirs();
    let mut path = project_dirs.config_dir().to_owned();
    fs::create_dir_all(&path).map_err(|source| AntError::Config {
        path: path.display().to_string(),
        source,
    })?;
    path.push("settings.json");

    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!(
                "no config at '{}' yet, starting with defaults: {}",
                path.display(),
                e
            );
            let settings = Settings::default();
            save(&settings, &path)?;
            return Ok(settings);
        }
    };

    let reader = BufReader::new(file);
    match serde_json::from_reader(reader) {
        Ok(settings) => {
            info!("loaded config from '{}'", path.display());
            Ok(settings)
        }
        Err(e) => {
            warn!(
                "config at '{}' is corrupt, falling back to defaults: {}",
                path.display(),
                e
            );
            Ok(Settings::default())
        }
    }
}

fn save(settings: &Settings, path: &PathBuf) -> Result<()> {
    let file = File::create(path).map_err(|source| AntError::Config {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::to_writer_pretty(file, settings)?;
    debug!("wrote default config to '{}'", path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_json() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn geometry_defaults_match_original_calibration() {
        let g = GeometryConfig::default();
        assert!((g.k1 - 0.0010958).abs() < 1e-12);
        assert_eq!(g.m1_min, -380);
        assert_eq!(g.m2_max, 980);
    }
}
