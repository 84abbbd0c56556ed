//! Single-slot shared-memory command channel to the motor firmware.
//!
//! The original maps a small `struct coms` over `/home/rgb/shmem` with raw
//! `mmap`; firmware polls `ok` and clears it once a move finishes. This is
//! the same handshake over `memmap2::MmapMut`, with volatile reads/writes
//! since the other side of the mapping is written outside Rust's aliasing
//! model.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::ptr::{addr_of, addr_of_mut};

use bitflags::bitflags;
use log::{debug, warn};
use memmap2::MmapMut;

use crate::error::{AntError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MailboxFlags: u16 {
        const LASER_ON  = 0x01;
        const MOTORS_ON = 0x02;
        const SHUTDOWN  = 0x04;
        const M1_NEG    = 0x08;
        const M2_NEG    = 0x10;
    }
}

const MAGIC: u32 = 0x1234_4321;

/// Exact wire layout of the shared-memory slot, matching the firmware's
/// `struct coms` byte for byte.
#[repr(C)]
struct CommsLayout {
    magic: u32,
    ms: u16,
    m1_steps: i16,
    m2_steps: i16,
    flags: u16,
    ok: u16,
}

/// Motor/laser command channel, one in-flight command at a time.
pub struct Mailbox {
    mmap: MmapMut,
    m1_limit: i32,
    m2_limit: i32,
}

impl Mailbox {
    /// Opens (creating if absent) the shared-memory file at `path` and maps
    /// it. Fires up the unit by setting `MOTORS_ON`, matching the
    /// constructor's handshake.
    pub fn open(path: &Path) -> Result<Self> {
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| AntError::MailboxMap {
                path: path.display().to_string(),
                source,
            })?;

        if !exists {
            let zeroed = [0u8; std::mem::size_of::<CommsLayout>()];
            file.write_all(&zeroed).map_err(|source| AntError::MailboxMap {
                path: path.display().to_string(),
                source,
            })?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| AntError::MailboxMap {
            path: path.display().to_string(),
            source,
        })?;

        let ptr = mmap.as_mut_ptr() as *mut CommsLayout;
        unsafe {
            addr_of_mut!((*ptr).magic).write_volatile(MAGIC);
            addr_of_mut!((*ptr).flags).write_volatile(MailboxFlags::MOTORS_ON.bits());
        }

        debug!("mailbox mapped at '{}'", path.display());
        Ok(Mailbox {
            mmap,
            m1_limit: 0,
            m2_limit: 0,
        })
    }

    fn ptr(&self) -> *mut CommsLayout {
        self.mmap.as_ptr() as *mut CommsLayout
    }

    fn ok(&self) -> u16 {
        unsafe { addr_of!((*self.ptr()).ok).read_volatile() }
    }

    fn set_ok(&self, v: u16) {
        unsafe { addr_of_mut!((*self.ptr()).ok).write_volatile(v) }
    }

    fn flags(&self) -> MailboxFlags {
        let bits = unsafe { addr_of!((*self.ptr()).flags).read_volatile() };
        MailboxFlags::from_bits_truncate(bits)
    }

    fn set_flags(&self, flags: MailboxFlags) {
        unsafe { addr_of_mut!((*self.ptr()).flags).write_volatile(flags.bits()) }
    }

    /// Resets the tracked step-limit origin, matching `hw::set_home`.
    pub fn set_home(&mut self) {
        self.m1_limit = 0;
        self.m2_limit = 0;
    }

    /// True once the firmware has cleared `ok`, i.e. it's ready for another
    /// command.
    pub fn hw_idle(&self) -> bool {
        self.ok() == 0
    }

    /// Posts a relative move in step space plus a laser on/off toggle, only
    /// if the slot is idle and the resulting absolute position stays within
    /// the configured keep-in bounds. Mirrors `hw::start_move`.
    pub fn start_move(&mut self, m1_steps: f64, m2_steps: f64, laser_on: bool, m1_min: i32, m1_max: i32, m2_min: i32, m2_max: i32) -> Result<()> {
        let m1 = m1_steps.round() as i32;
        let m2 = m2_steps.round() as i32;

        if self.m1_limit + m1 < m1_min
            || self.m1_limit + m1 > m1_max
            || self.m2_limit + m2 < m2_min
            || self.m2_limit + m2 > m2_max
        {
            warn!(
                "move rejected: at {} {} moving {} {}",
                self.m1_limit, self.m2_limit, m1, m2
            );
            return Err(AntError::MoveOutOfRange {
                m1_limit: self.m1_limit + m1,
                m2_limit: self.m2_limit + m2,
            });
        }

        if self.ok() != 0 {
            return Err(AntError::MailboxBusy);
        }

        self.m1_limit += m1;
        self.m2_limit += m2;

        let mut flags = self.flags();
        let (abs_m1, neg1) = if m1 < 0 { (-m1, true) } else { (m1, false) };
        let (abs_m2, neg2) = if m2 < 0 { (-m2, true) } else { (m2, false) };
        flags.set(MailboxFlags::M1_NEG, neg1);
        flags.set(MailboxFlags::M2_NEG, neg2);
        flags.set(MailboxFlags::LASER_ON, laser_on);

        unsafe {
            addr_of_mut!((*self.ptr()).ms).write_volatile(0);
            addr_of_mut!((*self.ptr()).m1_steps).write_volatile(abs_m1 as i16);
            addr_of_mut!((*self.ptr()).m2_steps).write_volatile(abs_m2 as i16);
        }
        self.set_flags(flags);
        self.set_ok(1);
        Ok(())
    }

    /// Toggles the laser without moving, matching `hw::switch_laser`.
    pub fn switch_laser(&mut self, laser_on: bool) -> Result<()> {
        if self.ok() != 0 {
            return Err(AntError::MailboxBusy);
        }
        unsafe {
            addr_of_mut!((*self.ptr()).m1_steps).write_volatile(0);
            addr_of_mut!((*self.ptr()).m2_steps).write_volatile(0);
        }
        let mut flags = self.flags();
        flags.remove(MailboxFlags::M1_NEG | MailboxFlags::M2_NEG);
        flags.set(MailboxFlags::LASER_ON, laser_on);
        self.set_flags(flags);
        self.set_ok(1);
        Ok(())
    }

    /// Posts a shutdown, waiting for the slot to be idle first.
    pub fn shutdown(&mut self) {
        if self.ok() != 0 {
            warn!("shutdown requested while mailbox still busy");
        }
        unsafe {
            addr_of_mut!((*self.ptr()).m1_steps).write_volatile(0);
            addr_of_mut!((*self.ptr()).m2_steps).write_volatile(0);
        }
        self.set_flags(MailboxFlags::SHUTDOWN);
        self.set_ok(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("myrmidon-mailbox-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn fresh_mailbox_starts_idle_with_motors_on() {
        let path = scratch_path("fresh");
        let _ = std::fs::remove_file(&path);
        let mbox = Mailbox::open(&path).unwrap();
        assert!(mbox.hw_idle());
        assert!(mbox.flags().contains(MailboxFlags::MOTORS_ON));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn start_move_rejects_out_of_range_target() {
        let path = scratch_path("range");
        let _ = std::fs::remove_file(&path);
        let mut mbox = Mailbox::open(&path).unwrap();
        let err = mbox
            .start_move(100000.0, 0.0, false, -380, 345, -860, 980)
            .unwrap_err();
        assert!(matches!(err, AntError::MoveOutOfRange { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn start_move_posts_command_and_sets_busy() {
        let path = scratch_path("post");
        let _ = std::fs::remove_file(&path);
        let mut mbox = Mailbox::open(&path).unwrap();
        mbox.start_move(10.0, -5.0, true, -380, 345, -860, 980).unwrap();
        assert!(!mbox.hw_idle());
        assert!(mbox.flags().contains(MailboxFlags::M2_NEG));
        assert!(mbox.flags().contains(MailboxFlags::LASER_ON));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn start_move_rejects_when_busy() {
        let path = scratch_path("busy");
        let _ = std::fs::remove_file(&path);
        let mut mbox = Mailbox::open(&path).unwrap();
        mbox.start_move(1.0, 1.0, false, -380, 345, -860, 980).unwrap();
        let err = mbox.start_move(1.0, 1.0, false, -380, 345, -860, 980).unwrap_err();
        assert!(matches!(err, AntError::MailboxBusy));
        let _ = std::fs::remove_file(&path);
    }
}
