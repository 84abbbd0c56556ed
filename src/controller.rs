//! The aim/settle/verify/correct state machine.
//!
//! Six states, transitions exactly mirroring the original's `switch
//! (cur_state)` block in `units.cpp::main`'s frame loop. The closures
//! passed into [`Controller::step`] stand in for the original's direct
//! calls into globals (`ant_looker`, `correct`) so this module stays
//! decoupled from the tracker/blob types.

use log::debug;

use crate::blob::Rect;
use crate::context::FrameContext;
use crate::error::Result;
use crate::laser::LaserSwitch;
use crate::mailbox::Mailbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    IdleLaserOff,
    Idle1,
    Idle2,
    Delay1,
    Delay2,
    WaitLaser,
}

/// What the caller observed about the laser this frame.
pub struct LaserObservation {
    pub visible: bool,
    pub center: Option<(i32, i32)>,
    pub bbox: Option<Rect>,
}

pub struct ControllerOptions {
    pub no_ants: bool,
    pub random_moves: bool,
    pub accurate: bool,
    pub dont_correct: bool,
}

/// Drives the laser on/off and hands move decisions to the caller-supplied
/// `ant_looker`/`correct`/`move_randomly` callbacks each frame.
pub struct Controller {
    state: State,
    laser_on_frame: u32,
    laser_frame_delay: i32,
    mouse_click: bool,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            state: State::Idle1,
            laser_on_frame: 0,
            laser_frame_delay: 0,
            mouse_click: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// A manual move (e.g. a UI click) resets the FSM to `Idle1`, matching
    /// the original's `mouse_click` handling at the top of the loop.
    pub fn notify_manual_move(&mut self) {
        self.mouse_click = true;
    }

    /// Runs one frame of the state machine.
    ///
    /// `ant_looker(do_move, ctx, mailbox)` should select/aim at the best
    /// ant (including any blob extraction/scoring/tracking it needs to do
    /// to pick one), returning whether it issued a move. Passing `ctx` and
    /// `mailbox` through as explicit arguments, rather than having the
    /// closure capture them, keeps this call the only place either is
    /// borrowed — callers don't need to pre-resolve anything this
    /// closure needs. `correct(center, bbox)` should close the loop on the
    /// laser position, returning whether it issued a move. `move_randomly()`
    /// should perform one random-walk step, returning `true` once the
    /// random walk is finished homing. Only called from the states/branches
    /// the original calls `ant_looker`/`correct`/`move_randomly` from, so a
    /// callback that does real work (extraction, scoring, aging) only pays
    /// for it on the frames the original would have.
    pub fn step(
        &mut self,
        ctx: &mut FrameContext,
        mailbox: &mut Mailbox,
        laser: &mut LaserSwitch,
        laser_obs: &LaserObservation,
        opts: &ControllerOptions,
        mut ant_looker: impl FnMut(bool, &mut FrameContext, &mut Mailbox) -> bool,
        mut correct: impl FnMut(&mut Mailbox, (i32, i32), Rect) -> Result<bool>,
        mut move_randomly: impl FnMut(&mut Mailbox) -> bool,
    ) -> Result<()> {
        if self.mouse_click {
            self.mouse_click = false;
            self.state = State::Idle1;
        }

        let laser_vis = laser_obs.visible;
        if laser_vis && self.laser_on_frame != 0 {
            let frames = (ctx.frame_index - self.laser_on_frame) as f64;
            ctx.record_laser_lag(frames);
            self.laser_on_frame = 0;
        }

        debug!("cur_state: {:?} laser: {}", self.state, if laser_vis { "on" } else { "off" });

        let mut next_state = self.state;
        match self.state {
            State::IdleLaserOff => {
                if opts.random_moves {
                    move_randomly(mailbox);
                    next_state = State::Idle1;
                } else if !laser_vis && !opts.no_ants && ant_looker(true, ctx, mailbox) {
                    next_state = State::Idle1;
                }
            }
            State::Idle1 => {
                if mailbox.hw_idle() {
                    laser.laser_on(mailbox)?;
                    next_state = State::Delay1;
                    self.laser_on_frame = ctx.frame_index;
                } else if !laser_vis {
                    ant_looker(false, ctx, mailbox);
                }
            }
            State::Delay1 => {
                if mailbox.hw_idle() {
                    laser.laser_off(mailbox)?;
                    self.laser_frame_delay = ctx.laser_frame_lag.average().round() as i32 + 1;
                    if let (true, Some(center), Some(bbox)) = (laser_vis, laser_obs.center, laser_obs.bbox) {
                        next_state = if correct(mailbox, center, bbox)? {
                            State::Idle2
                        } else {
                            State::Delay2
                        };
                    } else {
                        ant_looker(false, ctx, mailbox);
                        next_state = State::WaitLaser;
                    }
                } else {
                    ant_looker(false, ctx, mailbox);
                }
            }
            State::WaitLaser => {
                if let (true, Some(center), Some(bbox)) = (laser_vis, laser_obs.center, laser_obs.bbox) {
                    next_state = if correct(mailbox, center, bbox)? {
                        State::Idle2
                    } else {
                        State::Delay2
                    };
                } else {
                    ant_looker(false, ctx, mailbox);
                    self.laser_frame_delay -= 1;
                    if self.laser_frame_delay == 0 {
                        next_state = State::Delay2;
                    }
                }
            }
            State::Delay2 => {
                if !laser_vis {
                    next_state = State::IdleLaserOff;
                    ant_looker(false, ctx, mailbox);
                }
            }
            State::Idle2 => {
                if mailbox.hw_idle() {
                    next_state = if opts.accurate {
                        laser.laser_on(mailbox)?;
                        State::Delay1
                    } else {
                        State::Delay2
                    };
                } else if !laser_vis {
                    ant_looker(false, ctx, mailbox);
                }
            }
        };

        let _ = opts.dont_correct;
        self.state = next_state;
        Ok(())
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn scratch_mailbox(tag: &str) -> Mailbox {
        let path = PathBuf::from(std::env::temp_dir())
            .join(format!("myrmidon-controller-test-{}-{}", std::process::id(), tag));
        let _ = std::fs::remove_file(&path);
        Mailbox::open(&path).unwrap()
    }

    #[test]
    fn idle1_moves_to_delay1_once_idle_and_turns_laser_on() {
        let mut controller = Controller::new();
        let mut ctx = FrameContext::new(1000.0);
        let mut mailbox = scratch_mailbox("idle1");
        let mut laser = LaserSwitch::new(false);
        let obs = LaserObservation { visible: false, center: None, bbox: None };
        let opts = ControllerOptions { no_ants: false, random_moves: false, accurate: false, dont_correct: false };

        controller
            .step(&mut ctx, &mut mailbox, &mut laser, &obs, &opts, |_, _, _| false, |_, _, _| Ok(false), |_| false)
            .unwrap();

        assert_eq!(controller.state(), State::Delay1);
        assert!(laser.is_on());
    }

    #[test]
    fn mouse_click_resets_to_idle1() {
        let mut controller = Controller::new();
        controller.state = State::Delay2;
        controller.notify_manual_move();
        let mut ctx = FrameContext::new(1000.0);
        let mut mailbox = scratch_mailbox("click");
        let mut laser = LaserSwitch::new(false);
        let obs = LaserObservation { visible: false, center: None, bbox: None };
        let opts = ControllerOptions { no_ants: false, random_moves: false, accurate: false, dont_correct: false };

        controller
            .step(&mut ctx, &mut mailbox, &mut laser, &obs, &opts, |_, _, _| false, |_, _, _| Ok(false), |_| false)
            .unwrap();

        // Idle1's own transition rules then apply on top of the reset.
        assert_ne!(controller.state(), State::Delay2);
    }
}
