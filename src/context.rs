//! Per-run frame timing and buffer views.
//!
//! The original keeps `frame_index`, `tps`, `average_frame_time` and
//! `laser_frame_lag` as free globals in `units.cpp`. Collecting them into an
//! owned [`FrameContext`] instead means the tracker, laser locator and
//! controller take a context reference rather than reaching into statics.

use crate::running_avg::RunningAverage;

/// A borrowed view over one grayscale buffer (full frame or foreground
/// mask), row-major, possibly at a lower resolution than the camera frame.
/// `scale` is how many full-resolution pixels one buffer pixel covers,
/// matching the original's repeated `xpix / mat.cols` computation.
#[derive(Debug, Clone, Copy)]
pub struct GrayFrame<'a> {
    pub data: &'a [u8],
    pub cols: i32,
    pub rows: i32,
    pub scale: i32,
}

impl<'a> GrayFrame<'a> {
    pub fn new(data: &'a [u8], cols: i32, rows: i32, full_width: i32) -> Self {
        let scale = (full_width / cols).max(1);
        GrayFrame { data, cols, rows, scale }
    }

    #[inline]
    pub fn at(&self, x: i32, y: i32) -> u8 {
        self.data[(y * self.cols + x) as usize]
    }
}

/// One acquired frame: the raw grayscale image plus the foreground mask
/// computed against the background model. Acquisition and segmentation
/// live outside this crate; `src/main.rs` wires a concrete source behind
/// this trait.
pub trait FrameSource {
    /// Blocks for the next frame. `Ok(None)` means the source is
    /// exhausted (end of a recorded movie, closed camera).
    fn next_frame(&mut self, ticks_now: u64) -> crate::error::Result<Option<(Vec<u8>, Vec<u8>)>>;
    fn cols(&self) -> i32;
    fn rows(&self) -> i32;
}

const LASER_LAG_WINDOW: usize = 10;

/// Frame counter, timing, and the laser's average response lag, shared by
/// every per-frame stage of the pipeline.
pub struct FrameContext {
    pub frame_index: u32,
    pub frame_ticks: u64,
    pub tps: f64,
    pub average_frame_time: f64,
    pub laser_frame_lag: RunningAverage,
}

impl FrameContext {
    pub fn new(tps: f64) -> Self {
        FrameContext {
            frame_index: 0,
            frame_ticks: 0,
            tps,
            average_frame_time: 1.0 / 30.0,
            laser_frame_lag: RunningAverage::new(LASER_LAG_WINDOW),
        }
    }

    /// Advances to the next frame, updating the smoothed frame time from
    /// the elapsed tick count.
    pub fn advance(&mut self, ticks_now: u64) {
        if self.frame_ticks != 0 {
            let dt = (ticks_now - self.frame_ticks) as f64 / self.tps;
            if dt > 0.0 {
                self.average_frame_time = self.average_frame_time * 0.9 + dt * 0.1;
            }
        }
        self.frame_ticks = ticks_now;
        self.frame_index += 1;
    }

    pub fn record_laser_lag(&mut self, frames: f64) {
        self.laser_frame_lag.add_item(frames);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn advance_tracks_frame_index() {
        let mut ctx = FrameContext::new(1000.0);
        ctx.advance(1000);
        ctx.advance(2000);
        assert_eq!(ctx.frame_index, 2);
    }

    #[test]
    fn gray_frame_scale_defaults_to_one_for_full_resolution() {
        let data = [0u8; 4];
        let frame = GrayFrame::new(&data, 2, 2, 2);
        assert_eq!(frame.scale, 1);
    }
}
