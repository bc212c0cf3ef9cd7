//! Output sink that keeps small payloads in memory and spills large ones to disk
//!
//! A [`ThresholdBufferedSink`] starts out buffering into a `Vec<u8>`. The first write
//! that would take the total past the configured threshold moves everything to the
//! backing file, and every later write goes straight to that file. The switch happens
//! at most once.
//!
//! The check runs before each write, so at the moment of the switch the sink may hold
//! up to one write's worth of bytes more than the threshold.

use crate::error::MultipartError;
use log::{debug, error};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

enum Target {
    Memory(Vec<u8>),
    /// `None` once the sink has been closed
    Disk(Option<BufWriter<File>>),
}

pub struct ThresholdBufferedSink {
    threshold: u64,
    written: u64,
    target: Target,
    backing_file: PathBuf,
    /// Generated temp paths are created exclusively so an existing file is never clobbered
    exclusive: bool,
    closed: bool,
}

impl ThresholdBufferedSink {
    /// Sink that spills into `backing_file` once more than `threshold` bytes are written
    pub fn new<P: Into<PathBuf>>(threshold: u64, backing_file: P) -> Self {
        Self {
            threshold,
            written: 0,
            target: Target::Memory(Vec::new()),
            backing_file: backing_file.into(),
            exclusive: false,
            closed: false,
        }
    }

    /// Sink that spills into a uniquely named file in `directory` (the system temp
    /// directory when `None`). The name is chosen now; the file is only created on spill.
    pub fn with_temp_file(
        threshold: u64,
        prefix: &str,
        suffix: &str,
        directory: Option<&Path>,
    ) -> Self {
        let dir = directory.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let sequence = TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{prefix}{}_{nanos:x}_{sequence}{suffix}",
            std::process::id()
        );

        let mut sink = Self::new(threshold, dir.join(name));
        sink.exclusive = true;
        sink
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Total bytes written so far
    pub fn byte_count(&self) -> u64 {
        self.written
    }

    pub fn is_threshold_exceeded(&self) -> bool {
        matches!(self.target, Target::Disk(_))
    }

    pub fn is_in_memory(&self) -> bool {
        !self.is_threshold_exceeded()
    }

    /// The buffered bytes, or `None` once the data lives in the backing file
    pub fn buffered_bytes(&self) -> Option<&[u8]> {
        match &self.target {
            Target::Memory(buffer) => Some(buffer),
            Target::Disk(_) => None,
        }
    }

    pub fn into_buffered_bytes(self) -> Option<Vec<u8>> {
        match self.target {
            Target::Memory(buffer) => Some(buffer),
            Target::Disk(_) => None,
        }
    }

    /// Path of the backing file. Fixed at construction; the file exists only after a spill.
    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush and close the active target
    pub fn close(&mut self) -> Result<(), MultipartError> {
        if self.closed {
            return Ok(());
        }

        if let Target::Disk(slot) = &mut self.target {
            if let Some(writer) = slot.take() {
                if let Err(e) = writer.into_inner() {
                    let (err, writer) = e.into_parts();
                    error!("Failed to flush backing file {:?}: {err}", self.backing_file);
                    // Still open: close may be retried and copy_to keeps refusing
                    *slot = Some(writer);
                    return Err(MultipartError::Io(err));
                }
            }
        }
        self.closed = true;
        Ok(())
    }

    /// Copy the sink's contents into `output`. Only valid once the sink is closed.
    pub fn copy_to<W: Write>(&self, output: &mut W) -> Result<u64, MultipartError> {
        if !self.closed {
            return Err(MultipartError::SinkNotClosed);
        }

        match &self.target {
            Target::Memory(buffer) => {
                output.write_all(buffer)?;
                Ok(buffer.len() as u64)
            }
            Target::Disk(_) => {
                let mut file = File::open(&self.backing_file)?;
                Ok(io::copy(&mut file, output)?)
            }
        }
    }

    /// Move buffered bytes into the backing file and switch targets
    fn spill(&mut self) -> io::Result<()> {
        let file = if self.exclusive {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.backing_file)
        } else {
            File::create(&self.backing_file)
        }
        .map_err(|e| {
            error!("Failed to create backing file {:?}: {e}", self.backing_file);
            e
        })?;

        let mut writer = BufWriter::new(file);
        if let Target::Memory(buffer) = &self.target {
            if let Err(e) = writer.write_all(buffer) {
                error!("Failed to spill to backing file {:?}: {e}", self.backing_file);
                drop(writer);
                // Generated paths are removed so a retry does not hit AlreadyExists
                if self.exclusive {
                    let _ = fs::remove_file(&self.backing_file);
                }
                return Err(e);
            }
        }
        debug!(
            "Threshold of {} bytes exceeded, spilled {} bytes to {:?}",
            self.threshold, self.written, self.backing_file
        );
        self.target = Target::Disk(Some(writer));
        Ok(())
    }
}

impl Write for ThresholdBufferedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(MultipartError::SinkClosed.into());
        }

        if self.is_in_memory() && self.written + buf.len() as u64 > self.threshold {
            self.spill()?;
        }

        match &mut self.target {
            Target::Memory(buffer) => buffer.extend_from_slice(buf),
            Target::Disk(Some(writer)) => writer.write_all(buf)?,
            Target::Disk(None) => return Err(MultipartError::SinkClosed.into()),
        }
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.target {
            Target::Disk(Some(writer)) => writer.flush(),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for ThresholdBufferedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdBufferedSink")
            .field("threshold", &self.threshold)
            .field("written", &self.written)
            .field("in_memory", &self.is_in_memory())
            .field("backing_file", &self.backing_file)
            .field("closed", &self.closed)
            .finish()
    }
}
