//! Reference binary: wires a synthetic frame source to the tracking core
//! and runs the closed-loop controller until ctrl-c.
//!
//! Startup sequence (warm-up frames, laser-on probe with up to 20 tries,
//! fatal exit if the laser never shows up, `set_home`, laser off, start
//! the backlash logger) follows `original_source/units/units.cpp::main`.
//! The per-frame pipeline itself stays synchronous; `tokio-graceful-shutdown`
//! only supervises the outer blocking task and the ctrl-c signal.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};
use rand_distr::{Distribution, Normal};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use myrmidon::backlash::Backlash;
use myrmidon::blob::{self, Rect};
use myrmidon::classifier::{Classifier, DeferredBackground, FilePatchWriter, NullClassifier, PatchWriter};
use myrmidon::config::{self, FRAME_HEIGHT, FRAME_WIDTH};
use myrmidon::context::{FrameContext, FrameSource, GrayFrame};
use myrmidon::controller::{Controller, ControllerOptions, LaserObservation};
use myrmidon::error::{AntError, Result};
use myrmidon::geometry::{Geometry, Loc};
use myrmidon::laser::{self, LaserSwitch};
use myrmidon::mailbox::Mailbox;
use myrmidon::replay::Replay;
use myrmidon::tracker::{AntSizeTable, Tracker};
use myrmidon::Cli;

const WARMUP_FRAMES: u32 = 5;
const LASER_ON_WARMUP_FRAME: u32 = 3;
const LASER_SEARCH_TRIES: u32 = 20;
const LASER_SEARCH_WINDOW: i32 = 300;
const ANT_EXTRACT_THRESH: u8 = 100;
const RANDOM_WALK_STEPS: i32 = 400;

/// Produces blank frames (no foreground) forever. Stands in for a real
/// camera + background-subtraction pipeline, which this crate takes as
/// given (see the module doc on [`FrameSource`]).
struct SyntheticFrameSource {
    cols: i32,
    rows: i32,
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self, _ticks_now: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let frame = vec![128u8; (self.cols * self.rows) as usize];
        let mask = vec![0u8; (self.cols * self.rows) as usize];
        Ok(Some((frame, mask)))
    }

    fn cols(&self) -> i32 {
        self.cols
    }

    fn rows(&self) -> i32 {
        self.rows
    }
}

fn mailbox_path() -> PathBuf {
    std::env::var("MYRMIDON_MAILBOX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config::get_project_dirs().cache_dir().join("mailbox.shmem"))
}

fn ticks_now(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Searches a window around the frame center for the laser, trying
/// [`LASER_SEARCH_TRIES`] times with a one-second pause between attempts.
/// Matches the original's startup probe loop exactly.
async fn find_laser_on_startup(
    source: &mut dyn FrameSource,
    geo: &Geometry,
    started: Instant,
) -> Result<(i32, i32, Rect)> {
    for attempt in 0..LASER_SEARCH_TRIES {
        let Some((frame, mut mask)) = source.next_frame(ticks_now(started))? else {
            break;
        };
        let frame_view = GrayFrame::new(&frame, source.cols(), source.rows(), source.cols());
        let fg_snapshot = mask.clone();
        let fg_view = GrayFrame::new(&fg_snapshot, source.cols(), source.rows(), source.cols());
        if let Some(found) = laser::find_laser(
            &mut mask,
            source.cols(),
            source.rows(),
            &frame_view,
            &fg_view,
            source.cols() / 2,
            source.rows() / 2,
            LASER_SEARCH_WINDOW,
            None,
            |px, py, scale| geo.keepout(px, py, scale),
        ) {
            return Ok(found);
        }
        warn!("laser search attempt {}/{} found nothing", attempt + 1, LASER_SEARCH_TRIES);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Err(AntError::NoLaserOnStartup)
}

/// Issues a move to `(px, py)`, matching `hw.cpp`'s `do_move`: the target
/// is only recomputed if the commanded point actually changed, deltas are
/// taken from the last actually-committed position, and that position only
/// advances to the new target once the firmware accepts the move.
fn issue_move(
    geo: &Geometry,
    backlash: &RefCell<Backlash>,
    mailbox: &mut Mailbox,
    cur_loc: &Cell<Loc>,
    target_loc: &Cell<Loc>,
    px: i32,
    py: i32,
) -> Result<()> {
    let prev_target = target_loc.get();
    let new_target = if (px, py) == (prev_target.px, prev_target.py) {
        prev_target
    } else {
        geo.pxy_to_loc(px, py)
    };
    target_loc.set(new_target);

    let start = cur_loc.get();
    let m1_delta = new_target.m1_steps - start.m1_steps;
    let m2_delta = new_target.m2_steps - start.m2_steps;
    backlash.borrow_mut().start(start, new_target, 0, 0, m1_delta, m2_delta);

    let cfg = geo.config();
    mailbox.start_move(m1_delta, m2_delta, false, cfg.m1_min, cfg.m1_max, cfg.m2_min, cfg.m2_max)?;
    cur_loc.set(new_target);
    Ok(())
}

async fn run(subsys: SubsystemHandle, cli: Cli) -> Result<()> {
    let settings = config::load()?;
    let geo = Geometry::new(settings.geometry);
    let sizes = AntSizeTable::build(&geo, &settings.tracker);
    let mut tracker = Tracker::new(sizes, settings.tracker);

    let mut mailbox = Mailbox::open(&mailbox_path())?;
    let mut laser = LaserSwitch::new(false);
    let mut controller = Controller::new();
    let opts = ControllerOptions {
        no_ants: cli.no_ants,
        random_moves: cli.random_moves,
        accurate: cli.accurate,
        dont_correct: cli.dont_correct,
    };

    let backlash = if cli.sql_backlash {
        Backlash::from_settings(settings.backlash_log_path.as_ref())?
    } else {
        Backlash::disabled()
    };
    let backlash = RefCell::new(backlash);

    let classifier: Option<Box<dyn Classifier>> = if cli.neural_class {
        Some(Box::new(NullClassifier))
    } else {
        None
    };

    let mut patch_writer = cli.take_snapshots.then(|| {
        FilePatchWriter::new(settings.snapshot_dir.clone().unwrap_or_else(|| config::get_project_dirs().data_dir().to_owned()))
    });
    let mut deferred_bg = DeferredBackground::default();

    let mut replay = if cli.play_ants {
        let path = config::get_project_dirs().data_dir().join("ants.pos");
        Some(Replay::load(&path)?)
    } else {
        None
    };

    let started = Instant::now();
    let mut source: Box<dyn FrameSource> = Box::new(SyntheticFrameSource {
        cols: FRAME_WIDTH,
        rows: FRAME_HEIGHT,
    });
    let source_cols = source.cols();
    let source_rows = source.rows();

    info!("warming up for {} frames", WARMUP_FRAMES);
    for i in 0..WARMUP_FRAMES {
        if source.next_frame(ticks_now(started))?.is_none() {
            break;
        }
        if i == LASER_ON_WARMUP_FRAME {
            laser.laser_on(&mut mailbox)?;
        }
    }

    info!("searching for laser on startup");
    let (lx, ly, _) = find_laser_on_startup(source.as_mut(), &geo, started).await?;
    info!("laser found at ({}, {})", lx, ly);

    mailbox.set_home();
    laser.laser_off(&mut mailbox)?;
    let home = geo.pxy_to_loc(lx, ly);
    backlash.borrow_mut().start(home, home, 0, 0, 0.0, 0.0);

    // Last actually-committed position and last-commanded aim point,
    // mirroring `hw.cpp`'s `cur_loc`/`target` pair. Read and written by
    // the `ant_looker`/`correct`/`move_randomly` callbacks below.
    let cur_loc = Cell::new(home);
    let target_loc = Cell::new(home);
    let random_count = Cell::new(RANDOM_WALK_STEPS);
    let geo_ref = &geo;

    let mut ctx = FrameContext::new(1000.0);

    loop {
        if subsys.is_shutdown_requested() {
            break;
        }

        let ticks = ticks_now(started);
        let Some((frame, mut mask)) = source.next_frame(ticks)? else {
            info!("frame source exhausted");
            break;
        };
        ctx.advance(ticks);

        let frame_view = GrayFrame::new(&frame, source_cols, source_rows, source_cols);
        let fg_snapshot = mask.clone();
        let fg_view = GrayFrame::new(&fg_snapshot, source_cols, source_rows, source_cols);

        if let Some(replay) = replay.as_mut() {
            if !replay.is_done() {
                replay.add_ant(&mut mask, source_cols, source_rows, ctx.frame_index as i32, tracker.sizes());
            }
        }

        // Laser lookup runs every frame regardless of FSM state, matching
        // the original's unconditional `find_laser()` call. It mutates the
        // live `mask`, not `fg_snapshot`, so the (untouched) ant extraction
        // below never competes with it for the same buffer.
        let laser_found = laser::find_laser(
            &mut mask,
            source_cols,
            source_rows,
            &frame_view,
            &fg_view,
            lx,
            ly,
            LASER_SEARCH_WINDOW,
            classifier.as_deref(),
            |px, py, scale| geo.keepout(px, py, scale),
        );
        let laser_obs = LaserObservation {
            visible: laser_found.is_some(),
            center: laser_found.map(|(x, y, _)| (x, y)),
            bbox: laser_found.map(|(_, _, r)| r),
        };

        let best_id_cell: Cell<Option<u32>> = Cell::new(None);
        let ant_looker_ran = Cell::new(false);

        controller.step(
            &mut ctx,
            &mut mailbox,
            &mut laser,
            &laser_obs,
            &opts,
            |do_move, ctx, mailbox| {
                ant_looker_ran.set(true);
                let roi = Rect { x: 0, y: 0, width: source_cols, height: source_rows };
                let mut blobs = match blob::find_marked_blobs(&fg_snapshot, source_cols, source_rows, roi, ANT_EXTRACT_THRESH, 1, |px, py, scale| {
                    geo_ref.keepout(px, py, scale)
                }) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("ant blob extraction failed: {e}");
                        return false;
                    }
                };
                tracker.score_blobs(&mut blobs, &frame_view, &fg_view, classifier.as_deref());
                let cur = cur_loc.get();
                let id = tracker.step(&blobs, ctx, (cur.px, cur.py));
                best_id_cell.set(id);

                if !do_move {
                    return false;
                }
                let Some(id) = id else {
                    return false;
                };
                let (px, py) = tracker.predict_next_pos(id, ctx, geo_ref);
                match issue_move(geo_ref, &backlash, mailbox, &cur_loc, &target_loc, px, py) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("ant move rejected: {e}");
                        false
                    }
                }
            },
            |mailbox, center, bbox| {
                let observed = geo_ref.pxy_to_loc(center.0, center.1);
                cur_loc.set(observed);
                let target = target_loc.get();
                let dx = (observed.px - target.px) as f64;
                let dy = (observed.py - target.py) as f64;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist > 3.0 && !bbox.contains(target.px, target.py) {
                    let m1_delta = target.m1_steps - observed.m1_steps;
                    let m2_delta = target.m2_steps - observed.m2_steps;
                    backlash.borrow_mut().add_corr(observed, 0, 0, m1_delta, m2_delta);
                    let cfg = geo_ref.config();
                    mailbox.start_move(m1_delta, m2_delta, false, cfg.m1_min, cfg.m1_max, cfg.m2_min, cfg.m2_max)?;
                    cur_loc.set(target);
                    Ok(true)
                } else {
                    backlash.borrow_mut().stop(observed, 0, 0);
                    Ok(false)
                }
            },
            |mailbox| {
                let remaining = random_count.get();
                if remaining == 0 {
                    random_count.set(-1);
                    if let Err(e) = issue_move(geo_ref, &backlash, mailbox, &cur_loc, &target_loc, FRAME_WIDTH / 2, FRAME_HEIGHT / 2) {
                        warn!("random-walk home move rejected: {e}");
                    }
                    return false;
                }
                if remaining < 0 {
                    return true;
                }
                random_count.set(remaining - 1);
                let mut rng = rand::thread_rng();
                let px_dist = Normal::new(640.0_f64, 100.0_f64).expect("fixed, valid normal params");
                let py_dist = Normal::new(480.0_f64, 75.0_f64).expect("fixed, valid normal params");
                let px = (px_dist.sample(&mut rng).round() as i32).clamp(100, FRAME_WIDTH - 100);
                let py = (py_dist.sample(&mut rng).round() as i32).clamp(100, FRAME_HEIGHT - 100);
                if let Err(e) = issue_move(geo_ref, &backlash, mailbox, &cur_loc, &target_loc, px, py) {
                    warn!("random move rejected: {e}");
                }
                false
            },
        )?;

        if ant_looker_ran.get() {
            let best_id = best_id_cell.get();
            if let (Some(writer), Some(id)) = (patch_writer.as_mut(), best_id) {
                if let Some(track) = tracker.tracks().find(|t| t.id == id) {
                    let ts = chrono::Utc::now().format("%Y%m%d%H%M").to_string();
                    if let Err(e) = writer.snap_ant(track.last, &frame_view, &ts) {
                        warn!("failed to snapshot ant patch: {e}");
                    }
                }
            }
            if cli.take_snapshots && best_id.is_none() {
                deferred_bg.queue(ctx.frame_index, (source_cols / 2, source_rows / 2));
            }
        }
        for (x, y) in deferred_bg.drain_ready(ctx.frame_index) {
            if let Some(writer) = patch_writer.as_mut() {
                let ts = chrono::Utc::now().format("%Y%m%d%H%M").to_string();
                if let Err(e) = writer.snap_bg((x, y), &frame_view, &ts) {
                    warn!("failed to snapshot background patch: {e}");
                }
            }
        }
    }

    mailbox.shutdown();
    info!("shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    if let Err(e) = Toplevel::new(move |s: SubsystemHandle| async move {
        s.start(SubsystemBuilder::new("myrmidon", move |h| run(h, cli)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}
