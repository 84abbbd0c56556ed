//! Closed-loop visual-servo controller that tracks ants in a camera frame
//! and steers a two-mirror galvanometer laser to follow the selected one.
//!
//! The pipeline is frame -> foreground mask -> blob extraction -> ant
//! scoring/association -> best-track pick -> geometry solve -> mailbox
//! move -> laser re-acquire -> closed-loop correction, run once per frame
//! by [`controller::Controller`]. Frame acquisition, foreground
//! segmentation and motor firmware are external collaborators; this crate
//! owns everything from the foreground mask inward.

use clap::Parser;

pub mod backlash;
pub mod blob;
pub mod classifier;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod laser;
pub mod mailbox;
pub mod replay;
pub mod running_avg;
pub mod tracker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PACKAGE: &str = env!("CARGO_PKG_NAME");

/// Command line flags. Every flag in the original's `option` table is
/// parsed; the ones implying a display window or movie source
/// (`-a`/`-l`/`-O`/`-o`/`-m`/`-P`/`-f`) are accepted for wire compatibility
/// but have no effect in this headless reference binary.
#[derive(Parser, Clone, Debug)]
#[command(name = PACKAGE, version = VERSION)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Repeat corrections until the loop closes
    #[arg(short = 'c', long)]
    pub accurate: bool,

    /// Don't do closed loop corrections
    #[arg(short = 'd', long)]
    pub dont_correct: bool,

    /// No ants: skip the ant-seeking branch of the state machine
    #[arg(short = 'n', long)]
    pub no_ants: bool,

    /// Use the classifier trait instead of the heuristic scorer
    #[arg(short = 'N', long)]
    pub neural_class: bool,

    /// Replay ants from a recorded `ants.pos` file
    #[arg(short = 'p', long)]
    pub play_ants: bool,

    /// Do random moves instead of seeking ants
    #[arg(short = 'r', long)]
    pub random_moves: bool,

    /// Save backlash data as CSV
    #[arg(short = 's', long)]
    pub sql_backlash: bool,

    /// Take snapshots of ants and the laser for classifier training
    #[arg(short = 'S', long)]
    pub take_snapshots: bool,

    /// Alternate frame display (accepted, inert: no display in this build)
    #[arg(short = 'a', long, hide = true)]
    pub alternate_frame: bool,

    /// Draw the laser on the screen (accepted, inert)
    #[arg(short = 'l', long, hide = true)]
    pub draw_laser: bool,

    /// Overlay the laser on a movie (accepted, inert)
    #[arg(short = 'O', long, hide = true)]
    pub overlay_laser: bool,

    /// Show the foreground-mask window (accepted, inert)
    #[arg(short = 'o', long, hide = true)]
    pub show_mog: bool,

    /// Use a movie file as the frame source (accepted, inert)
    #[arg(short = 'm', long, hide = true)]
    pub movie: bool,

    /// Plot predictions for ant movement (accepted, inert)
    #[arg(short = 'P', long, hide = true)]
    pub plot_predictions: bool,

    /// Fake the laser firmware coms, for testing without hardware
    #[arg(short = 'f', long)]
    pub fake_laser: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_parses_with_no_flags() {
        let cli = Cli::parse_from(["myrmidon"]);
        assert!(!cli.no_ants);
        assert!(!cli.random_moves);
    }

    #[test]
    fn cli_parses_short_flags() {
        let cli = Cli::parse_from(["myrmidon", "-n", "-r", "-N"]);
        assert!(cli.no_ants);
        assert!(cli.random_moves);
        assert!(cli.neural_class);
    }
}
