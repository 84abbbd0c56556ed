use thiserror::Error;

/// Errors surfaced by the tracking/control core.
///
/// Per the error handling design, almost everything here is recoverable at
/// the frame boundary: callers log it and carry on to the next frame. Only
/// [`AntError::NoLaserOnStartup`] and an explicit quit/EOF from the caller's
/// frame source are meant to end the process.
#[derive(Error, Debug)]
pub enum AntError {
    #[error("blob extraction overflowed (more than {limit} seeds) and was discarded")]
    SeedOverflow { limit: usize },

    #[error("blob grew past {limit} pixels and was discarded")]
    BlobOverflow { limit: usize },

    #[error("move to m1={m1_limit}, m2={m2_limit} is out of range")]
    MoveOutOfRange { m1_limit: i32, m2_limit: i32 },

    #[error("mailbox slot still owned by firmware (ok != 0)")]
    MailboxBusy,

    #[error("no laser detected on startup")]
    NoLaserOnStartup,

    #[error("patch at ({px}, {py}) falls outside the frame")]
    PatchOutOfBounds { px: i32, py: i32 },

    #[error("foreground mask blew up ({nonzero} nonzero pixels); segmentation reset required")]
    ForegroundBlowUp { nonzero: usize },

    #[error("failed to map mailbox shared memory at {path}")]
    MailboxMap {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read or write config at {path}")]
    Config {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, AntError>;
