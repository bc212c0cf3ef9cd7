//! Splits a multipart body into per-part files
//!
//! This drives the usual pipeline end to end: the scanner locates each part, the
//! part's body cursor is copied into a [`ThresholdBufferedSink`], and the result is
//! moved into the output directory. Small bodies never touch the disk until they are
//! written out; large ones are spilled while they stream in and then renamed into place.
//!
//! For part number `N` the extractor writes:
//! - `part-NNNN.headers`: the raw header block, exactly as received
//! - `part-NNNN.body`: the body bytes
//!
//! # Example Usage
//! ```rust,no_run
//! use formstream::extract::{ExtractConfig, PartExtractor};
//! use formstream::multipart::{MultipartConfig, MultipartStream};
//! use std::fs::File;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = File::open("body.bin")?;
//! let mut stream = MultipartStream::new(input, b"----WebKitFormBoundary7MA4YWxkTrZu0gW", MultipartConfig::default())?;
//! let mut extractor = PartExtractor::new(ExtractConfig {
//!     output_dir: PathBuf::from("parts"),
//!     ..Default::default()
//! })?;
//! let result = extractor.extract(&mut stream)?;
//! println!("{} parts", result.parts.len());
//! # Ok(())
//! # }
//! ```

use crate::error::MultipartError;
use crate::multipart::MultipartStream;
use crate::threshold::ThresholdBufferedSink;
use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Temporary file prefix for atomic operations
const TEMP_FILE_PREFIX: &str = ".formstream_temp_";
/// Prefix of spill files created while a part streams in
const SPILL_FILE_PREFIX: &str = ".formstream_spill_";

pub const DEFAULT_THRESHOLD: u64 = 64 * 1024;
pub const DEFAULT_MAX_PARTS: usize = 1000;

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Directory that receives the part files
    pub output_dir: PathBuf,
    /// Where spill files live while a part is read (defaults to `output_dir`)
    pub temp_dir: Option<PathBuf>,
    /// Bodies larger than this many bytes are spilled to disk while streaming
    pub threshold: u64,
    /// Maximum number of parts accepted from one body
    pub max_parts: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            temp_dir: None,
            threshold: DEFAULT_THRESHOLD,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }
}

/// Information about one extracted part
#[derive(Debug, Clone)]
pub struct ExtractedPart {
    /// 1-based position of the part in the body
    pub index: usize,
    /// Raw header block, including the terminating blank line
    pub header_block: String,
    /// Body size in bytes
    pub size: u64,
    pub header_path: PathBuf,
    pub body_path: PathBuf,
    /// Whether the body went over the threshold and was spilled while streaming
    pub spilled: bool,
}

/// Extraction result
#[derive(Debug)]
pub struct ExtractionResult {
    pub parts: Vec<ExtractedPart>,
    /// Sum of all body sizes
    pub total_bytes: u64,
    pub processing_time_ms: u64,
}

pub struct PartExtractor {
    config: ExtractConfig,
}

impl PartExtractor {
    pub fn new(config: ExtractConfig) -> Result<Self, MultipartError> {
        if config.max_parts == 0 {
            return Err(MultipartError::invalid_configuration(
                "max_parts must be greater than 0",
            ));
        }
        ensure_directory_exists(&config.output_dir)?;
        if let Some(temp_dir) = &config.temp_dir {
            ensure_directory_exists(temp_dir)?;
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Extract every part of `stream` into the output directory
    pub fn extract<R: Read>(
        &mut self,
        stream: &mut MultipartStream<R>,
    ) -> Result<ExtractionResult, MultipartError> {
        let start_time = std::time::Instant::now();
        let mut parts = Vec::new();
        let mut total_bytes = 0u64;

        let mut next_part = stream.skip_preamble()?;
        if !next_part {
            warn!("Multipart body contains no parts");
        }

        while next_part {
            if parts.len() >= self.config.max_parts {
                return Err(MultipartError::TooManyParts(self.config.max_parts));
            }

            let index = parts.len() + 1;
            let header_block = stream.read_headers()?;
            let part = self.extract_part(stream, index, header_block)?;
            total_bytes += part.size;

            info!(
                "Extracted part {} ({}{})",
                part.index,
                format_bytes(part.size),
                if part.spilled { ", spilled to disk" } else { "" }
            );
            parts.push(part);

            next_part = stream.read_boundary()?;
        }

        Ok(ExtractionResult {
            parts,
            total_bytes,
            processing_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    fn extract_part<R: Read>(
        &self,
        stream: &mut MultipartStream<R>,
        index: usize,
        header_block: String,
    ) -> Result<ExtractedPart, MultipartError> {
        let spill_dir = self
            .config
            .temp_dir
            .as_deref()
            .unwrap_or(&self.config.output_dir);
        let mut sink = ThresholdBufferedSink::with_temp_file(
            self.config.threshold,
            SPILL_FILE_PREFIX,
            ".part",
            Some(spill_dir),
        );

        let copied = {
            let mut cursor = stream.new_body_cursor();
            io::copy(&mut cursor, &mut sink)
                .map_err(MultipartError::from)
                .and_then(|_| cursor.close(false))
        };
        if let Err(e) = copied.and_then(|_| sink.close()) {
            discard_spill_file(&sink);
            return Err(e);
        }
        let size = sink.byte_count();

        let header_path = self.config.output_dir.join(format!("part-{index:04}.headers"));
        let body_path = self.config.output_dir.join(format!("part-{index:04}.body"));
        let stored = write_file_atomically(
            &self.config.output_dir,
            &header_path,
            header_block.as_bytes(),
        )
        .and_then(|_| match sink.buffered_bytes() {
            Some(bytes) => write_file_atomically(&self.config.output_dir, &body_path, bytes),
            None => move_spill_file(&sink, &body_path),
        });
        if let Err(e) = stored {
            discard_spill_file(&sink);
            return Err(e);
        }
        let spilled = sink.is_threshold_exceeded();

        Ok(ExtractedPart {
            index,
            header_block,
            size,
            header_path,
            body_path,
            spilled,
        })
    }
}

/// Ensure the directory exists and is writable, creating it if necessary
fn ensure_directory_exists(dir: &Path) -> Result<(), MultipartError> {
    if !dir.exists() {
        info!("Creating output directory: {dir:?}");
        fs::create_dir_all(dir).map_err(|e| {
            error!("Failed to create output directory {dir:?}: {e}");
            MultipartError::from(e)
        })?;
    } else if !dir.is_dir() {
        return Err(MultipartError::invalid_configuration(format!(
            "Output path {dir:?} exists but is not a directory"
        )));
    }

    let test_file = dir.join(".write_test");
    match File::create(&test_file) {
        Ok(_) => {
            let _ = fs::remove_file(&test_file);
            Ok(())
        }
        Err(e) => {
            error!("Output directory {dir:?} is not writable: {e}");
            Err(MultipartError::from(e))
        }
    }
}

/// Write `content` to a temporary file next to `target_path`, then rename it into place
fn write_file_atomically(
    dir: &Path,
    target_path: &Path,
    content: &[u8],
) -> Result<(), MultipartError> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_path = dir.join(format!(
        "{}{}_{:x}.tmp",
        TEMP_FILE_PREFIX,
        std::process::id(),
        nanos
    ));

    {
        let mut temp_file = File::create(&temp_path).map_err(|e| {
            error!("Failed to create temporary file {temp_path:?}: {e}");
            MultipartError::from(e)
        })?;

        if let Err(e) = temp_file.write_all(content).and_then(|_| temp_file.sync_all()) {
            error!("Failed to write temporary file {temp_path:?}: {e}");
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
    }

    fs::rename(&temp_path, target_path).map_err(|e| {
        error!("Failed to rename {temp_path:?} to {target_path:?}: {e}");
        let _ = fs::remove_file(&temp_path);
        MultipartError::from(e)
    })?;

    debug!("Wrote {} bytes to {target_path:?}", content.len());
    Ok(())
}

/// Move a spilled body into place; copy instead when the rename crosses filesystems
fn move_spill_file(sink: &ThresholdBufferedSink, target_path: &Path) -> Result<(), MultipartError> {
    let spill_path = sink.backing_file();
    if fs::rename(spill_path, target_path).is_ok() {
        debug!("Moved {spill_path:?} to {target_path:?}");
        return Ok(());
    }

    debug!("Rename of {spill_path:?} failed, copying instead");
    let copied = File::create(target_path)
        .map_err(MultipartError::from)
        .and_then(|mut target| {
            sink.copy_to(&mut target)?;
            target.sync_all()?;
            Ok(())
        });
    discard_spill_file(sink);
    copied
}

fn discard_spill_file(sink: &ThresholdBufferedSink) {
    if !sink.is_threshold_exceeded() {
        return;
    }
    match fs::remove_file(sink.backing_file()) {
        Ok(()) => debug!("Removed spill file {:?}", sink.backing_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove spill file {:?}: {e}", sink.backing_file()),
    }
}

/// Format bytes into human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
