//! Replays recorded ant positions from an `ants.pos` file onto a frame
//! buffer, interpolating between recorded samples. Grounded in
//! `player.cpp`.

use std::io::BufRead;
use std::path::Path;

use log::trace;

use crate::error::Result;
use crate::tracker::AntSizeTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedPos {
    pub x: i32,
    pub y: i32,
    pub npix: i32,
    pub frame: i32,
}

/// Matches the observed post-`pyrDown` blob footprint (length, width in
/// pixels) to an ideal ant-pixel-count bucket. Only the full-resolution
/// (`scale == 1`) table is ported; the original bails out with a log line
/// for any other scale, which this keeps as an `Err`.
const PIX_TBL_1: &[(i32, i32, i32)] = &[
    (1, 1, 1),
    (2, 1, 2),
    (3, 1, 3),
    (4, 2, 2),
    (6, 2, 3),
    (8, 2, 4),
    (9, 3, 3),
    (10, 2, 5),
    (12, 3, 4),
    (14, 2, 7),
    (15, 3, 5),
    (16, 4, 4),
    (18, 3, 6),
    (20, 4, 5),
    (21, 3, 7),
    (24, 4, 6),
];

/// Drives a replay of recorded `x y npix frame` samples, painting a small
/// dark rectangle onto the frame buffer at the interpolated position.
pub struct Replay {
    positions: Vec<RecordedPos>,
    cur: usize,
    done: bool,
}

impl Replay {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut positions = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let (Some(x), Some(y), Some(npix), Some(frame)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            positions.push(RecordedPos {
                x: x.parse().unwrap_or(0),
                y: y.parse().unwrap_or(0),
                npix: npix.parse().unwrap_or(0),
                frame: frame.parse().unwrap_or(0),
            });
        }
        let done = positions_is_empty(&positions);
        Ok(Replay { positions, cur: 0, done })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Paints the interpolated ant position for `frame_index` into `frame`,
    /// if the replay has started and isn't finished yet.
    pub fn add_ant(&mut self, frame: &mut [u8], cols: i32, rows: i32, frame_index: i32, sizes: &AntSizeTable) {
        if self.done || self.positions.len() < 2 {
            return;
        }
        if self.cur == 0 && frame_index < self.positions[0].frame {
            return;
        }
        let pc = self.positions[self.cur];
        let pn = self.positions[self.cur + 1];
        if frame_index >= pc.frame && frame_index <= pn.frame {
            interp(frame, cols, rows, pc, pn, frame_index, sizes);
        }
        if frame_index == pn.frame {
            self.cur += 1;
            if self.cur >= self.positions.len() - 1 {
                self.done = true;
            }
        }
    }
}

fn positions_is_empty(positions: &[RecordedPos]) -> bool {
    positions.len() < 2
}

fn interp(frame: &mut [u8], cols: i32, rows: i32, pc: RecordedPos, pn: RecordedPos, frame_index: i32, sizes: &AntSizeTable) {
    let denom = (pn.frame - pc.frame) as f64;
    if denom == 0.0 {
        return;
    }
    let r = (frame_index - pc.frame) as f64 / denom;
    let px = (r * (pn.x - pc.x) as f64 + pc.x as f64).round() as i32;
    let py = (r * (pn.y - pc.y) as f64 + pc.y as f64).round() as i32;
    let ideal_size = sizes.get_size(px, py) as i32;

    let Some((len, width)) = lookup_rect(ideal_size) else {
        trace!("replay: no pixel table entry for ideal_size {ideal_size}");
        return;
    };

    trace!("replay paint {} {} ideal_size {} frame {}", px, py, ideal_size, frame_index);
    for i in 0..len {
        for j in 0..width {
            let x = px + j;
            let y = py + i;
            if x >= 0 && x < cols && y >= 0 && y < rows {
                frame[(y * cols + x) as usize] = 0;
            }
        }
    }
}

fn lookup_rect(ideal_size: i32) -> Option<(i32, i32)> {
    for pair in PIX_TBL_1.windows(2) {
        let (target, len, width) = pair[0];
        let next_target = pair[1].0;
        if ideal_size >= target && ideal_size < next_target {
            return Some((len, width));
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GeometryConfig;
    use crate::config::TrackerConfig;
    use crate::geometry::Geometry;

    #[test]
    fn lookup_rect_finds_matching_bucket() {
        assert_eq!(lookup_rect(5), Some((2, 3)));
        assert_eq!(lookup_rect(1), Some((1, 1)));
    }

    #[test]
    fn lookup_rect_returns_none_past_the_table() {
        assert_eq!(lookup_rect(10_000), None);
    }

    #[test]
    fn replay_loads_and_marks_done_with_too_few_samples() {
        let path = std::env::temp_dir().join(format!("myrmidon-replay-test-{}.pos", std::process::id()));
        std::fs::write(&path, "100 100 10 0\n").unwrap();
        let replay = Replay::load(&path).unwrap();
        assert!(replay.is_done());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replay_paints_interpolated_position() {
        let path = std::env::temp_dir().join(format!("myrmidon-replay-test2-{}.pos", std::process::id()));
        std::fs::write(&path, "100 100 10 0\n200 100 10 10\n").unwrap();
        let mut replay = Replay::load(&path).unwrap();
        assert!(!replay.is_done());

        let geo = Geometry::new(GeometryConfig::default());
        let cfg = TrackerConfig::default();
        let sizes = AntSizeTable::build(&geo, &cfg);
        let cols = 1280;
        let rows = 960;
        let mut frame = vec![255u8; (cols * rows) as usize];
        replay.add_ant(&mut frame, cols, rows, 5, &sizes);
        // Somewhere around x=150 should have been painted to 0.
        assert!(frame.iter().any(|&b| b == 0));
        let _ = std::fs::remove_file(&path);
    }
}
