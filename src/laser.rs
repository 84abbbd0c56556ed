//! Locates the laser spot in a frame and switches it on/off.
//!
//! `find_laser`/`laser_blob` grounded in `units.cpp`; the on/off wrapper
//! grounded in `util.cpp`'s trivial `laser` class (state plus a mailbox
//! call, nothing else).

use log::{debug, warn};

use crate::blob::{self, Blob, Rect};
use crate::classifier::Classifier;
use crate::context::GrayFrame;
use crate::error::Result;
use crate::mailbox::Mailbox;

/// Laser blobs saturate; this is well above the foreground threshold used
/// for ants.
pub const LASER_THRESH: u8 = 250;
const LASER_PIXEL_COUNT_GATE: u32 = 80;
const LASER_PIXEL_QUALIFY: i32 = 60;

fn laser_blob_heuristic(blob: &Blob, frame: &GrayFrame, fg: &GrayFrame) -> bool {
    let mut lcount = 0;
    for y in blob.rect.y..blob.rect.y + blob.rect.height {
        for x in blob.rect.x..blob.rect.x + blob.rect.width {
            if fg.at(x, y) == LASER_THRESH && frame.at(x, y) > LASER_THRESH {
                lcount += 1;
            }
        }
    }
    lcount > LASER_PIXEL_QUALIFY
}

fn laser_blob_neural(classifier: &dyn Classifier, frame: &GrayFrame, blob: &Blob) -> bool {
    classifier.classify(frame, (blob.xc, blob.yc)).laser > 0.9
}

/// Searches a `size`x`size` window around `(xc, yc)` for the first blob
/// that looks like the laser (enough saturated pixels, then the
/// heuristic/neural qualifying check). First match wins, exactly as the
/// original's scan order.
pub fn find_laser(
    mask: &mut [u8],
    cols: i32,
    rows: i32,
    frame: &GrayFrame,
    fg: &GrayFrame,
    xc: i32,
    yc: i32,
    size: i32,
    classifier: Option<&dyn Classifier>,
    keepout: impl Fn(i32, i32, i32) -> bool,
) -> Option<(i32, i32, Rect)> {
    let half_size = size / 2;
    let xs = (xc - half_size).max(0);
    let ys = (yc - half_size).max(0);
    let xe = (xc + half_size).min(cols);
    let ye = (yc + half_size).min(rows);
    let roi = Rect {
        x: xs,
        y: ys,
        width: xe - xs,
        height: ye - ys,
    };

    let blobs = match blob::find_blobs(mask, cols, rows, roi, LASER_THRESH, 1, keepout) {
        Ok(b) => b,
        Err(e) => {
            warn!("laser search aborted: {e}");
            return None;
        }
    };

    for candidate in &blobs {
        if candidate.npix <= LASER_PIXEL_COUNT_GATE {
            continue;
        }
        let qualifies = match classifier {
            Some(c) => laser_blob_neural(c, frame, candidate),
            None => laser_blob_heuristic(candidate, frame, fg),
        };
        if qualifies {
            debug!("found laser at {} {} npix {}", candidate.xc, candidate.yc, candidate.npix);
            return Some((candidate.xc, candidate.yc, candidate.rect));
        }
    }
    None
}

/// Tracks whether the laser is currently commanded on, and issues the
/// mailbox toggle.
pub struct LaserSwitch {
    is_on: bool,
}

impl LaserSwitch {
    pub fn new(start_on: bool) -> Self {
        LaserSwitch { is_on: start_on }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn laser_on(&mut self, mailbox: &mut Mailbox) -> Result<()> {
        self.is_on = true;
        mailbox.switch_laser(true)
    }

    pub fn laser_off(&mut self, mailbox: &mut Mailbox) -> Result<()> {
        self.is_on = false;
        mailbox.switch_laser(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn find_laser_picks_first_qualifying_bright_blob() {
        let cols = 200;
        let rows = 200;
        let mut mask = vec![0u8; (cols * rows) as usize];
        for y in 50..60 {
            for x in 50..60 {
                mask[(y * cols + x) as usize] = 255;
            }
        }
        let frame_data = vec![255u8; (cols * rows) as usize];
        let frame = GrayFrame::new(&frame_data, cols, rows, cols);
        let fg_snapshot = mask.clone();
        let fg = GrayFrame::new(&fg_snapshot, cols, rows, cols);

        let found = find_laser(&mut mask, cols, rows, &frame, &fg, 55, 55, 100, None, |_, _, _| false);
        assert!(found.is_some());
        let (xc, yc, _) = found.unwrap();
        assert!((50..60).contains(&xc));
        assert!((50..60).contains(&yc));
    }

    #[test]
    fn find_laser_rejects_small_blobs() {
        let cols = 100;
        let rows = 100;
        let mut mask = vec![0u8; (cols * rows) as usize];
        mask[(50 * cols + 50) as usize] = 255;
        mask[(50 * cols + 51) as usize] = 255;
        let frame_data = vec![255u8; (cols * rows) as usize];
        let frame = GrayFrame::new(&frame_data, cols, rows, cols);
        let fg_snapshot = mask.clone();
        let fg = GrayFrame::new(&fg_snapshot, cols, rows, cols);
        let found = find_laser(&mut mask, cols, rows, &frame, &fg, 50, 50, 100, None, |_, _, _| false);
        assert!(found.is_none());
    }
}
