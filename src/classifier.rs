//! Capability traits for blob classification and snapshot export.
//!
//! Training a classifier and producing ground truth are explicitly out of
//! scope; what's in scope is the seam a real CNN classifier and a patch
//! exporter plug into. Grounded in `image_classifier`/`snapshots` for the
//! trait shape. `NullClassifier`/`FilePatchWriter` are the trivial
//! implementations the reference binary and tests use.

use std::path::PathBuf;

use image::{GrayImage, Luma};
use log::warn;

use crate::context::GrayFrame;
use crate::error::{AntError, Result};

pub const PATCH_SIZE: u32 = 28;
const BACKGROUND_SNAPSHOT_DELAY_FRAMES: u32 = 50;

/// Probability-like scores for the three classes the original's network
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageType {
    pub background: f32,
    pub ant: f32,
    pub laser: f32,
}

/// Scores a patch of frame around a point. `-N`/neural mode off uses
/// [`NullClassifier`]; a real network implementation lives outside this
/// crate.
pub trait Classifier {
    fn classify(&self, frame: &GrayFrame, at: (i32, i32)) -> ImageType;
}

/// Always reports "background", matching the original's heuristic-only
/// default when neural classification is disabled.
pub struct NullClassifier;

impl Classifier for NullClassifier {
    fn classify(&self, _frame: &GrayFrame, _at: (i32, i32)) -> ImageType {
        ImageType {
            background: 1.0,
            ant: 0.0,
            laser: 0.0,
        }
    }
}

/// Writes labeled training patches to disk. Background patches are
/// deferred by [`BACKGROUND_SNAPSHOT_DELAY_FRAMES`] frames exactly as the
/// original's `no_ants` replay mode offsets its frame lookup.
pub trait PatchWriter {
    fn snap_ant(&mut self, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()>;
    fn snap_laser(&mut self, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()>;
    fn snap_bg(&mut self, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()>;
}

/// Extracts a [`PATCH_SIZE`]x[`PATCH_SIZE`] patch centered on `at` and
/// writes it as a PNG under `dir/images/<tag>/`.
pub struct FilePatchWriter {
    root: PathBuf,
    seq: u32,
}

impl FilePatchWriter {
    pub fn new(root: PathBuf) -> Self {
        FilePatchWriter { root, seq: 0 }
    }

    fn write_patch(&mut self, dir: &str, tag: &str, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()> {
        let half = (PATCH_SIZE / 2) as i32;
        let (cx, cy) = at;
        let mut img = GrayImage::new(PATCH_SIZE, PATCH_SIZE);
        let in_bounds = cx - half >= 0 && cy - half >= 0 && cx + half <= frame.cols && cy + half <= frame.rows;
        if !in_bounds {
            warn!("patch at ({}, {}) out of bounds, writing blank patch", cx, cy);
        } else {
            for row in 0..PATCH_SIZE as i32 {
                for col in 0..PATCH_SIZE as i32 {
                    let px = cx - half + col;
                    let py = cy - half + row;
                    img.put_pixel(col as u32, row as u32, Luma([frame.at(px, py)]));
                }
            }
        }

        let dir_path = self.root.join("images").join(dir);
        std::fs::create_dir_all(&dir_path).map_err(AntError::Io)?;
        let name = format!("{0}_{0}_{1}_{2:04}.png", tag, timestamp, self.seq);
        self.seq += 1;
        img.save(dir_path.join(name)).map_err(AntError::Image)?;
        Ok(())
    }
}

impl PatchWriter for FilePatchWriter {
    fn snap_ant(&mut self, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()> {
        self.write_patch("ant", "ant", at, frame, timestamp)
    }

    fn snap_laser(&mut self, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()> {
        self.write_patch("laser", "laser", at, frame, timestamp)
    }

    fn snap_bg(&mut self, at: (i32, i32), frame: &GrayFrame, timestamp: &str) -> Result<()> {
        self.write_patch("bg", "bg", at, frame, timestamp)
    }
}

/// Queues background-patch points so they can be written out
/// [`BACKGROUND_SNAPSHOT_DELAY_FRAMES`] frames later than requested, once
/// the scene has moved on from wherever an ant just was.
#[derive(Debug, Default)]
pub struct DeferredBackground {
    pending: std::collections::VecDeque<(u32, i32, i32)>,
}

impl DeferredBackground {
    pub fn queue(&mut self, at_frame: u32, point: (i32, i32)) {
        self.pending.push_back((at_frame + BACKGROUND_SNAPSHOT_DELAY_FRAMES, point));
    }

    /// Pops every point whose delay has elapsed as of `current_frame`.
    pub fn drain_ready(&mut self, current_frame: u32) -> Vec<(i32, i32)> {
        let mut ready = Vec::new();
        while let Some(&(due, _, _)) = self.pending.front() {
            if due > current_frame {
                break;
            }
            let (_, x, y) = self.pending.pop_front().unwrap();
            ready.push((x, y));
        }
        ready
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_classifier_always_says_background() {
        let data = [0u8; 16];
        let frame = GrayFrame::new(&data, 4, 4, 4);
        let result = NullClassifier.classify(&frame, (2, 2));
        assert_eq!(result.background, 1.0);
        assert_eq!(result.ant, 0.0);
    }

    #[test]
    fn deferred_background_waits_for_its_frame() {
        let mut deferred = DeferredBackground::default();
        deferred.queue(10, (1, 2));
        assert!(deferred.drain_ready(20).is_empty());
        assert_eq!(deferred.drain_ready(60), vec![(1, 2)]);
    }

    #[test]
    fn patch_writer_blanks_out_of_bounds_patch() {
        let dir = std::env::temp_dir().join(format!("myrmidon-patch-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut writer = FilePatchWriter::new(dir.clone());
        let data = [50u8; 16];
        let frame = GrayFrame::new(&data, 4, 4, 4);
        // Center far outside the tiny 4x4 frame: must not panic, writes a blank patch.
        writer.snap_ant((100, 100), &frame, "202607281200").unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
