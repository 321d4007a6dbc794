//! datalogger - Storage sessions
//!
//! Owns the mounted filesystem and, while recording, the one CSV file the
//! current session appends to. The filesystem itself is whatever
//! implements [`Volume`] on top of a [`BlockDevice`].

use core::fmt::{Debug, Write};

#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

use crate::block_device::BlockDevice;

/// First line of every CSV file.
pub const CSV_HEADER: &str = "utc_iso,temp_c,humidity_percent\n";

/// Longest path we build: mount point, a separator, the session name and
/// the suffix.
pub const PATH_LEN: usize = 64;

/// A full path to a session file.
pub type Path = heapless::String<PATH_LEN>;

type Row = heapless::String<128>;

/// What a filesystem has to offer for the logger to write CSV files.
pub trait Volume {
    /// The block device the filesystem lives on.
    type Device: BlockDevice;
    type Error: Debug;
    /// An open file.
    type File;

    /// Attach the filesystem on `device` at `mount_point`.
    fn mount(&mut self, device: Self::Device, mount_point: &str) -> Result<(), Self::Error>;

    /// Create (or truncate) a file for writing.
    fn create(&mut self, path: &str) -> Result<Self::File, Self::Error>;

    /// Open an existing file with the cursor at its end.
    fn open_append(&mut self, path: &str) -> Result<Self::File, Self::Error>;

    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<(), Self::Error>;

    /// Make everything written so far durable.
    fn flush(&mut self, file: &mut Self::File) -> Result<(), Self::Error>;

    fn close(&mut self, file: Self::File) -> Result<(), Self::Error>;
}

/// Errors from a storage session.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageError<E>
where
    E: Debug,
{
    /// The filesystem failed.
    Volume(E),
    /// The session file name didn't fit in a [`Path`].
    PathTooLong,
    /// A record didn't fit in the row buffer.
    RowTooLong,
}

impl<E> From<E> for StorageError<E>
where
    E: Debug,
{
    fn from(value: E) -> StorageError<E> {
        StorageError::Volume(value)
    }
}

struct Session<F> {
    path: Path,
    file: F,
}

/// The mounted filesystem plus at most one open recording.
pub struct Storage<V>
where
    V: Volume,
{
    volume: V,
    mount_point: &'static str,
    mounted: bool,
    session: Option<Session<V::File>>,
}

impl<V> Storage<V>
where
    V: Volume,
{
    /// Nothing is mounted until [`Storage::mount`] succeeds.
    pub fn new(volume: V, mount_point: &'static str) -> Self {
        Storage {
            volume,
            mount_point,
            mounted: false,
            session: None,
        }
    }

    /// Mount the filesystem on `device`. Reports success; never fails.
    pub fn mount(&mut self, device: V::Device) -> bool {
        match self.volume.mount(device, self.mount_point) {
            Ok(()) => {
                info!("mounted at {}", self.mount_point);
                self.mounted = true;
            }
            Err(_e) => {
                warn!("mount at {} failed", self.mount_point);
                self.mounted = false;
            }
        }
        self.mounted
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Path of the file being recorded to.
    pub fn current_path(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.path.as_str())
    }

    /// Start a new session file named after `start_timestamp`.
    ///
    /// Any open session is closed first. Returns `Ok(None)` if nothing is
    /// mounted.
    pub fn start_new(&mut self, start_timestamp: &str) -> Result<Option<Path>, StorageError<V::Error>> {
        if !self.mounted {
            return Ok(None);
        }
        self.stop();

        let path = session_path(self.mount_point, start_timestamp)?;
        let mut file = self.volume.create(&path)?;
        let header = self
            .volume
            .write(&mut file, CSV_HEADER.as_bytes())
            .and_then(|_| self.volume.flush(&mut file));
        if let Err(e) = header {
            let _ = self.volume.close(file);
            return Err(StorageError::Volume(e));
        }
        self.volume.close(file)?;

        let file = self.volume.open_append(&path)?;
        info!("recording to {}", path.as_str());
        self.session = Some(Session {
            path: path.clone(),
            file,
        });
        Ok(Some(path))
    }

    /// Append one record and flush it. Does nothing if not recording.
    ///
    /// A failed write ends the session.
    pub fn write_row(
        &mut self,
        timestamp: &str,
        temperature_c: f32,
        humidity_percent: f32,
    ) -> Result<(), StorageError<V::Error>> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Ok(()),
        };
        let mut row = Row::new();
        writeln!(row, "{},{:.2},{:.2}", timestamp, temperature_c, humidity_percent)
            .map_err(|_| StorageError::RowTooLong)?;

        let volume = &mut self.volume;
        let result = volume
            .write(&mut session.file, row.as_bytes())
            .and_then(|_| volume.flush(&mut session.file));
        if let Err(e) = result {
            if let Some(session) = self.session.take() {
                let _ = self.volume.close(session.file);
            }
            return Err(StorageError::Volume(e));
        }
        Ok(())
    }

    /// Flush and close the open session, if any. Problems closing are
    /// logged and otherwise ignored.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let flushed = self.volume.flush(&mut session.file);
            let closed = self.volume.close(session.file);
            if flushed.is_err() || closed.is_err() {
                warn!("closing {} failed", session.path.as_str());
            } else {
                info!("closed {}", session.path.as_str());
            }
        }
    }

    pub fn volume(&self) -> &V {
        &self.volume
    }
}

/// `<mount>/<timestamp without '-' and ':'>.csv`
fn session_path<E>(mount_point: &str, start_timestamp: &str) -> Result<Path, StorageError<E>>
where
    E: Debug,
{
    let mut path = Path::new();
    path.push_str(mount_point)
        .and_then(|_| path.push('/'))
        .map_err(|_| StorageError::PathTooLong)?;
    for c in start_timestamp.chars().filter(|c| *c != '-' && *c != ':') {
        path.push(c).map_err(|_| StorageError::PathTooLong)?;
    }
    path.push_str(".csv").map_err(|_| StorageError::PathTooLong)?;
    Ok(path)
}
