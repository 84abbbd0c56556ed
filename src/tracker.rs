//! Ant track bookkeeping: scoring, association, aging, and best-track pick.
//!
//! Grounded in `ants.cpp`'s `ant_score`/`match_blobs_to_ant(s)`/
//! `process_ant`/`add_ant`/`delete_dead_ants`/`pick_best_ant`/
//! `predict_next_pos`. The original threads tracks through a `ant_list`
//! linked list; here they live in a `HashMap<id, AntTrack>` keyed by a
//! monotonic id instead.

use std::collections::HashMap;

use log::{debug, trace};

use crate::blob::Blob;
use crate::classifier::{Classifier, ImageType};
use crate::config::{FRAME_HEIGHT, FRAME_WIDTH, TrackerConfig};
use crate::context::{FrameContext, GrayFrame};
use crate::geometry::Geometry;
use crate::running_avg::{DirectionAverage, RunningAverage};

const PTG: i32 = 20;
const ANT_THRESH: u8 = 100;
const DIRECTION_WINDOW: usize = 5;
const SPEED_WINDOW: usize = 10;

/// One tracked ant.
pub struct AntTrack {
    pub id: u32,
    pub score: i32,
    pub last: (i32, i32),
    pub pred: (i32, i32),
    pub uv: DirectionAverage,
    pub avg_speed: RunningAverage,
    pub last_frame: u32,
    pub last_frame_ticks: u64,
    pub total_distance: f64,
    pub laser_dist: f64,
}

/// Per-tile expected ant footprint in pixels, indexed `[px / PTG][py / PTG]`,
/// built once from the lens calibration so far-away tiles (smaller in the
/// frame) expect proportionally fewer pixels.
pub struct AntSizeTable {
    table: Vec<Vec<u16>>,
    pub min_ant_size: u16,
    pub max_ant_size: u16,
}

impl AntSizeTable {
    pub fn build(geo: &Geometry, cfg: &TrackerConfig) -> Self {
        let width_tiles = (FRAME_WIDTH / PTG) as usize;
        let height_tiles = (FRAME_HEIGHT / PTG) as usize;
        let mut table = vec![vec![0u16; height_tiles]; width_tiles];
        let mut min_ant_size = u16::MAX;
        let mut max_ant_size = 0u16;

        for (px_idx, col) in table.iter_mut().enumerate() {
            for (py_idx, cell) in col.iter_mut().enumerate() {
                let px = (px_idx as i32) * PTG;
                let py = (py_idx as i32) * PTG;
                let pixels_per_mm = 1.0 / geo.mm_per_pixel(px, py);
                let ant_sq_pix = cfg.ant_len_mm * pixels_per_mm * cfg.ant_width_mm * pixels_per_mm;
                let value = (ant_sq_pix + 0.5) as u16;
                *cell = value;
                max_ant_size = max_ant_size.max(value);
                min_ant_size = min_ant_size.min(value);
            }
        }
        debug!("ant size table: min {} max {}", min_ant_size, max_ant_size);
        AntSizeTable {
            table,
            min_ant_size,
            max_ant_size,
        }
    }

    pub fn get_size(&self, x: i32, y: i32) -> u16 {
        let px = ((x / PTG) as usize).min(self.table.len() - 1);
        let py = ((y / PTG) as usize).min(self.table[0].len() - 1);
        self.table[px][py]
    }
}

/// Collection of live ant tracks plus the association/aging/scoring logic
/// that runs once per frame.
pub struct Tracker {
    tracks: HashMap<u32, AntTrack>,
    next_id: u32,
    sizes: AntSizeTable,
    cfg: TrackerConfig,
}

impl Tracker {
    pub fn new(sizes: AntSizeTable, cfg: TrackerConfig) -> Self {
        Tracker {
            tracks: HashMap::new(),
            next_id: 1,
            sizes,
            cfg,
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &AntTrack> {
        self.tracks.values()
    }

    pub fn sizes(&self) -> &AntSizeTable {
        &self.sizes
    }

    /// Scores every blob heuristically or, when `classifier` is given,
    /// through it. Iterative replacement for the original's
    /// `score_ants`, which recursed once per blob (risking a stack
    /// overflow on dense frames).
    pub fn score_blobs(&self, blobs: &mut [Blob], frame: &GrayFrame, fg: &GrayFrame, classifier: Option<&dyn Classifier>) {
        for blob in blobs.iter_mut() {
            blob.score = match classifier {
                Some(c) => score_neural(c, frame, blob),
                None => self.score_heuristic(blob, frame, fg),
            };
        }
    }

    fn score_heuristic(&self, blob: &Blob, frame: &GrayFrame, fg: &GrayFrame) -> i32 {
        let scale = fg.scale;
        let ideal_count = (self.sizes.get_size(blob.xc, blob.yc) as i32) / (scale * scale);
        let range = (ideal_count / 2).max(1);
        let max = ideal_count + range;
        let min = (ideal_count - range).max(3);

        if blob.npix as i32 > max || (blob.npix as i32) < min {
            trace!("blob {} {} npix {} out of [{},{}]", blob.xc, blob.yc, blob.npix, min, max);
            return 0;
        }

        let mut score = 5;
        let mut ratio = blob.rect.width as f64 / blob.rect.height as f64;
        if ratio < 1.0 {
            ratio = 1.0 / ratio;
        }
        if ratio < self.cfg.ant_len_mm * 1.1 / self.cfg.ant_width_mm {
            score += 4;
        }

        let ystart = blob.rect.y / scale;
        let yend = ystart + blob.rect.height / scale;
        let xstart = blob.rect.x / scale;
        let xend = xstart + blob.rect.width / scale;
        let mut cc = 0;
        for y in ystart..yend {
            for x in xstart..xend {
                if fg.at(x, y) == ANT_THRESH && frame.at(x, y) < self.cfg.ant_color_thresh {
                    cc += 1;
                }
            }
        }

        let range = (ideal_count / 8).max(1);
        let (min, max) = (ideal_count - range, ideal_count + range);
        if cc >= min && cc <= max {
            score += 10;
        }
        score
    }

    /// Predicts every track's position forward, associates the nearest
    /// unclaimed blob within [`TrackerConfig::close_blob_px`], applies
    /// updates/creates new tracks, then ages every surviving track by one
    /// frame and drops the ones that hit zero. Preserves the original's
    /// exact ordering: association updates (and their `max_score` clamp)
    /// happen before the per-frame aging decrement, so a track created
    /// this frame is also aged this frame.
    pub fn step(&mut self, blobs: &[Blob], ctx: &FrameContext, cur_loc: (i32, i32)) -> Option<u32> {
        let mut claims: HashMap<usize, u32> = HashMap::new();

        for (&id, track) in self.tracks.iter_mut() {
            let aspeed = track.avg_speed.average();
            let uv = track.uv.average();
            let frames = (ctx.frame_index - track.last_frame) as f64;
            track.pred = (
                track.last.0 + (uv.x * aspeed * frames * ctx.average_frame_time) as i32,
                track.last.1 + (uv.y * aspeed * frames * ctx.average_frame_time) as i32,
            );

            let mut closest = f64::MAX;
            let mut candidate = None;
            for (idx, blob) in blobs.iter().enumerate() {
                if blob.score == 0 || claims.values().any(|&claimed_id| claimed_id == id) {
                    continue;
                }
                let dx = (blob.xc - track.pred.0) as f64;
                let dy = (blob.yc - track.pred.1) as f64;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist > self.cfg.close_blob_px || dist >= closest {
                    continue;
                }
                closest = dist;
                candidate = Some(idx);
            }
            match candidate {
                Some(idx) => {
                    claims.insert(idx, id);
                }
                None => track.pred = (0, 0),
            }
        }

        for (idx, blob) in blobs.iter().enumerate() {
            if blob.score <= 0 {
                continue;
            }
            match claims.get(&idx) {
                Some(&id) => self.process_ant(id, blob, ctx, cur_loc),
                None => self.add_ant(blob, ctx),
            }
        }

        self.tracks.retain(|id, track| {
            track.score -= 1;
            let alive = track.score > 0;
            if !alive {
                debug!("dead ant id {} at {:?} frame {}", id, track.last, ctx.frame_index);
            }
            alive
        });

        self.pick_best_ant(ctx)
    }

    fn process_ant(&mut self, id: u32, blob: &Blob, ctx: &FrameContext, cur_loc: (i32, i32)) {
        let track = self.tracks.get_mut(&id).expect("claimed track must exist");
        let vx = blob.xc - track.last.0;
        let vy = blob.yc - track.last.1;
        let dist = ((vx * vx + vy * vy) as f64).sqrt();
        if dist != 0.0 {
            track.uv.add_item(nalgebra::Vector2::new(vx as f64 / dist, vy as f64 / dist));
        }
        let dt = (ctx.frame_ticks.saturating_sub(track.last_frame_ticks)) as f64 / ctx.tps;
        if dt > 0.0 {
            track.avg_speed.add_item(dist / dt);
        }
        track.last_frame_ticks = ctx.frame_ticks;
        track.score += blob.score;
        if track.score > self.cfg.max_score {
            track.score = self.cfg.max_score;
        }
        track.last = (blob.xc, blob.yc);
        let ldx = (track.last.0 - cur_loc.0) as f64;
        let ldy = (track.last.1 - cur_loc.1) as f64;
        track.laser_dist = (ldx * ldx + ldy * ldy).sqrt();
        track.last_frame = ctx.frame_index;
    }

    fn add_ant(&mut self, blob: &Blob, ctx: &FrameContext) {
        let id = self.next_id;
        self.next_id += 1;
        debug!("new ant id {} at {} {} score {} frame {}", id, blob.xc, blob.yc, blob.score, ctx.frame_index);
        self.tracks.insert(
            id,
            AntTrack {
                id,
                score: blob.score,
                last: (blob.xc, blob.yc),
                pred: (0, 0),
                uv: DirectionAverage::new(DIRECTION_WINDOW),
                avg_speed: RunningAverage::new(SPEED_WINDOW),
                last_frame: ctx.frame_index,
                last_frame_ticks: ctx.frame_ticks,
                total_distance: 0.0,
                laser_dist: 0.0,
            },
        );
    }

    /// Best current track to aim the laser at: score above the floor, seen
    /// within the last few frames, and nearest to the laser's current
    /// position among the survivors.
    fn pick_best_ant(&self, ctx: &FrameContext) -> Option<u32> {
        self.tracks
            .values()
            .filter(|t| t.score > self.cfg.best_track_score_floor)
            .filter(|t| ctx.frame_index - t.last_frame <= self.cfg.best_track_max_age_frames)
            .min_by(|a, b| a.laser_dist.partial_cmp(&b.laser_dist).unwrap())
            .map(|t| t.id)
    }

    /// Forward-predicts where a track will be by the time the laser can
    /// get there, folding in the laser's own average response lag and the
    /// mirror move time itself (rounded up to whole frames).
    pub fn predict_next_pos(&self, id: u32, ctx: &FrameContext, geo: &Geometry) -> (i32, i32) {
        let track = match self.tracks.get(&id) {
            Some(t) => t,
            None => return (0, 0),
        };
        let aspeed = track.avg_speed.average();
        if aspeed <= 0.1 {
            return track.last;
        }
        let uv = track.uv.average();
        let lag = ctx.laser_frame_lag.average();
        let mut px = track.last.0 as f64 + uv.x * aspeed * lag * ctx.average_frame_time;
        let mut py = track.last.1 as f64 + uv.y * aspeed * lag * ctx.average_frame_time;

        let cur = geo.pxy_to_loc(track.last.0, track.last.1);
        let target = geo.pxy_to_loc(px.round() as i32, py.round() as i32);
        let dt = geo.move_time(&cur, &target);
        if dt > 0.0 {
            let move_frames = (dt / ctx.average_frame_time + 0.9).trunc();
            px += uv.x * aspeed * move_frames * ctx.average_frame_time;
            py += uv.y * aspeed * move_frames * ctx.average_frame_time;
        }

        let (px_i, py_i) = (px.round() as i32, py.round() as i32);
        if px_i < 0 || px_i >= FRAME_WIDTH || py_i < 0 || py_i >= FRAME_HEIGHT {
            track.last
        } else {
            (px_i, py_i)
        }
    }
}

fn score_neural(classifier: &dyn Classifier, frame: &GrayFrame, blob: &Blob) -> i32 {
    let ImageType { ant, .. } = classifier.classify(frame, (blob.xc, blob.yc));
    (ant * 15.0).round() as i32
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blob::Rect;
    use crate::config::GeometryConfig;

    fn make_blob(xc: i32, yc: i32, npix: u32, score: i32) -> Blob {
        Blob {
            rect: Rect { x: xc - 2, y: yc - 2, width: 5, height: 5 },
            xc,
            yc,
            npix,
            score,
        }
    }

    fn tracker() -> Tracker {
        let geo = Geometry::new(GeometryConfig::default());
        let cfg = TrackerConfig::default();
        let sizes = AntSizeTable::build(&geo, &cfg);
        Tracker::new(sizes, cfg)
    }

    #[test]
    fn new_track_is_created_from_scored_blob_and_aged_same_frame() {
        let mut t = tracker();
        let ctx = FrameContext::new(1000.0);
        let blobs = vec![make_blob(100, 100, 10, 19)];
        t.step(&blobs, &ctx, (0, 0));
        assert_eq!(t.tracks().count(), 1);
        // A track created this frame is also aged by 1 this frame (Open
        // Question d): 19 - 1 = 18, not 19.
        assert_eq!(t.tracks().next().unwrap().score, 18);
    }

    #[test]
    fn track_ages_out_after_score_hits_zero() {
        let mut t = tracker();
        let mut ctx = FrameContext::new(1000.0);
        let blobs = vec![make_blob(100, 100, 10, 2)];
        t.step(&blobs, &ctx, (0, 0));
        assert_eq!(t.tracks().count(), 1, "score 2 survives its creation-frame aging to 1");
        ctx.frame_index += 1;
        t.step(&[], &ctx, (0, 0));
        assert_eq!(t.tracks().count(), 0, "score 1 aged to 0 is dropped");
    }

    #[test]
    fn best_ant_requires_score_above_floor() {
        let mut t = tracker();
        let ctx = FrameContext::new(1000.0);
        let blobs = vec![make_blob(100, 100, 10, 20)];
        let best = t.step(&blobs, &ctx, (0, 0));
        assert!(best.is_none(), "score of 20 is at/under the floor of 25");
    }

    #[test]
    fn close_blob_within_range_is_associated_not_recreated() {
        let mut t = tracker();
        let mut ctx = FrameContext::new(1000.0);
        let first = vec![make_blob(100, 100, 10, 30)];
        t.step(&first, &ctx, (0, 0));
        ctx.frame_index += 1;
        ctx.frame_ticks += 1000;
        let moved = vec![make_blob(110, 100, 10, 5)];
        t.step(&moved, &ctx, (0, 0));
        assert_eq!(t.tracks().count(), 1, "blob within close_blob_px should match existing track");
    }
}
