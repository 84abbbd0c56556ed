//! Records every commanded move/correction for offline backlash analysis.
//!
//! The original accumulates a linked list of steps per move and dumps it as
//! `INSERT` statements into `backlash.sql` when `stop()` is called. Here
//! each move's steps are pushed straight to a CSV writer as they happen
//! (`csv` + `chrono` instead of hand-built SQL text); still meant to be
//! bulk-loaded for offline analysis. Disabled unless a log path is
//! configured, matching the original's `sql_backlash` flag gate.

use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::Writer;
use log::debug;
use serde::Serialize;

use crate::error::Result;
use crate::geometry::Loc;

#[derive(Debug, Serialize)]
struct MoveRow {
    timestamp: String,
    move_index: u32,
    kind: &'static str,
    start_px: i32,
    start_py: i32,
    target_px: i32,
    target_py: i32,
    last_m1: i32,
    last_m2: i32,
    cur_px: i32,
    cur_py: i32,
    m1_delta: i32,
    m2_delta: i32,
    m1s: i32,
    m2s: i32,
    m1_actual: i32,
    m2_actual: i32,
    m1_dead_zone: i32,
    m2_dead_zone: i32,
}

struct InFlightMove {
    index: u32,
    start: Loc,
    target: Loc,
    last_m1: i32,
    last_m2: i32,
    m1_actual: i32,
    m2_actual: i32,
    m1_dead_zone: i32,
    m2_dead_zone: i32,
    prev_loc: Option<Loc>,
    prev_m1s: i32,
    prev_m2s: i32,
}

/// Logs commanded moves and in-flight corrections to CSV, one writer per
/// run. A `None` writer means logging is off; every method becomes a no-op,
/// matching the original's `if (!sql_backlash) return;` gates.
pub struct Backlash {
    writer: Option<Writer<std::fs::File>>,
    move_index: u32,
    current: Option<InFlightMove>,
}

impl Backlash {
    pub fn disabled() -> Self {
        Backlash {
            writer: None,
            move_index: 0,
            current: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let writer = Writer::from_path(path)?;
        debug!("backlash log opened at '{}'", path.display());
        Ok(Backlash {
            writer: Some(writer),
            move_index: 0,
            current: None,
        })
    }

    pub fn from_settings(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(p) => Self::open(p),
            None => Ok(Self::disabled()),
        }
    }

    /// Begins tracking a new move; drops whatever the previous move's
    /// trailing state was, matching `backlash::start`'s implicit `cleanup`.
    pub fn start(&mut self, start: Loc, target: Loc, last_m1: i32, last_m2: i32, m1s: f64, m2s: f64) {
        self.move_index += 1;
        self.current = Some(InFlightMove {
            index: self.move_index,
            start,
            target,
            last_m1,
            last_m2,
            m1_actual: 0,
            m2_actual: 0,
            m1_dead_zone: 0,
            m2_dead_zone: 0,
            prev_loc: None,
            prev_m1s: 0,
            prev_m2s: 0,
        });
        self.write_row("move", None, last_m1, last_m2, m1s, m2s);
    }

    /// Records an intermediate correction step within the current move.
    pub fn add_corr(&mut self, cur: Loc, last_m1: i32, last_m2: i32, m1s: f64, m2s: f64) {
        self.write_row("corr", Some(cur), last_m1, last_m2, m1s, m2s);
    }

    /// Closes out the current move with a zero-step terminal row.
    pub fn stop(&mut self, cur: Loc, last_m1: i32, last_m2: i32) {
        self.write_row("stop", Some(cur), last_m1, last_m2, 0.0, 0.0);
        self.current = None;
    }

    /// Writes one row and updates the running "actual total steps"/
    /// "dead-zone" accounting for the in-flight move, grounded in
    /// `backlash::actuals`/`dead_zone`: the original sums these over the
    /// remaining chain at `dumpit` time (a batch dump at `stop`); since
    /// this logger streams rows as they happen, the same two quantities
    /// are instead accumulated forward, row by row.
    fn write_row(&mut self, kind: &'static str, cur: Option<Loc>, last_m1: i32, last_m2: i32, m1s: f64, m2s: f64) {
        if self.writer.is_none() || self.current.is_none() {
            return;
        }
        let m1s_i = m1s.round() as i32;
        let m2s_i = m2s.round() as i32;

        let mv = self.current.as_mut().expect("checked above");
        if let (Some(cur_loc), Some(prev_loc)) = (cur, mv.prev_loc) {
            if prev_loc.px == cur_loc.px {
                mv.m2_dead_zone += mv.prev_m2s;
            }
            if prev_loc.py == cur_loc.py {
                mv.m1_dead_zone += mv.prev_m1s;
            }
        }
        mv.m1_actual += m1s_i;
        mv.m2_actual += m2s_i;
        mv.prev_loc = cur;
        mv.prev_m1s = m1s_i;
        mv.prev_m2s = m2s_i;

        let (cur_px, cur_py, m1_delta, m2_delta) = match cur {
            Some(loc) => (
                loc.px,
                loc.py,
                (mv.target.m1_steps - loc.m1_steps).round() as i32,
                (mv.target.m2_steps - loc.m2_steps).round() as i32,
            ),
            None => (0, 0, 0, 0),
        };
        let row = MoveRow {
            timestamp: Utc::now().to_rfc3339(),
            move_index: mv.index,
            kind,
            start_px: mv.start.px,
            start_py: mv.start.py,
            target_px: mv.target.px,
            target_py: mv.target.py,
            last_m1,
            last_m2,
            cur_px,
            cur_py,
            m1_delta,
            m2_delta,
            m1s: m1s_i,
            m2s: m2s_i,
            m1_actual: mv.m1_actual,
            m2_actual: mv.m2_actual,
            m1_dead_zone: mv.m1_dead_zone,
            m2_dead_zone: mv.m2_dead_zone,
        };
        let writer = self.writer.as_mut().expect("checked above");
        if writer.serialize(&row).is_ok() {
            let _ = writer.flush();
        }
    }

    /// Deliberately unimplemented: the original's `backlash::correct` is a
    /// stub (`return;` before doing anything). This logger keeps only the
    /// recording role, not a correction-suggestion role, so this method is
    /// never called from the controller.
    #[allow(dead_code)]
    pub fn correct(&self, _m1_steps: f64, _m2_steps: f64) -> (f64, f64) {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disabled_logger_is_a_no_op() {
        let mut bl = Backlash::disabled();
        bl.start(Loc::ZERO, Loc::ZERO, 0, 0, 1.0, 1.0);
        bl.add_corr(Loc::ZERO, 0, 0, 1.0, 1.0);
        bl.stop(Loc::ZERO, 0, 0);
        // No panics, no file created: nothing else to assert.
    }

    #[test]
    fn writes_rows_when_enabled() {
        let path = std::env::temp_dir().join(format!("myrmidon-backlash-test-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let mut bl = Backlash::open(&path).unwrap();
            bl.start(Loc::ZERO, Loc::ZERO, 0, 0, 10.0, -5.0);
            bl.stop(Loc::ZERO, 0, 0);
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("move"));
        assert!(contents.contains("stop"));
        let _ = std::fs::remove_file(&path);
    }

    fn loc_at(px: i32, py: i32) -> Loc {
        Loc { px, py, ..Loc::ZERO }
    }

    #[test]
    fn actual_total_accumulates_across_corrections() {
        let path = std::env::temp_dir().join(format!("myrmidon-backlash-test-actual-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut bl = Backlash::open(&path).unwrap();
        bl.start(Loc::ZERO, Loc::ZERO, 0, 0, 10.0, -5.0);
        bl.add_corr(loc_at(1, 1), 0, 0, 3.0, -2.0);
        bl.add_corr(loc_at(2, 2), 0, 0, 1.0, -1.0);
        let mv = bl.current.as_ref().unwrap();
        assert_eq!(mv.m1_actual, 14);
        assert_eq!(mv.m2_actual, -8);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn dead_zone_counts_steps_with_unchanged_opposite_axis() {
        let path = std::env::temp_dir().join(format!("myrmidon-backlash-test-deadzone-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut bl = Backlash::open(&path).unwrap();
        bl.start(Loc::ZERO, Loc::ZERO, 0, 0, 10.0, -5.0);
        bl.add_corr(loc_at(0, 1), 0, 0, 3.0, -2.0);
        // px unchanged from the previous correction -> m2 dead-zone picks up
        // that correction's m2 step.
        bl.add_corr(loc_at(0, 5), 0, 0, 1.0, -1.0);
        let mv = bl.current.as_ref().unwrap();
        assert_eq!(mv.m2_dead_zone, -2);
        assert_eq!(mv.m1_dead_zone, 0);
        let _ = std::fs::remove_file(&path);
    }
}
