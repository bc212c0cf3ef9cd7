use crate::config::ini_parser::parse_size;
use crate::error::MultipartError;
use crate::multipart::{DEFAULT_BUFSIZE, extract_boundary_from_content_type};
use clap::Parser;
use log::warn;
use std::path::{Path, PathBuf};

// Command-line interface for splitting a multipart/form-data body into files.
#[derive(Parser, Clone, Debug)]
#[command(
    author,
    version,
    about = "Split a multipart/form-data body into per-part header and body files.",
    long_about = "Reads a multipart/form-data body from a file or standard input and writes every part to the output directory as part-NNNN.headers (the raw header block) and part-NNNN.body (the body bytes).\n The body is scanned in a single pass with a fixed-size buffer. Small part bodies are kept in memory; bodies larger than the spill threshold are streamed to disk as they arrive.\n A stream that ends before its closing boundary is rejected as malformed."
)]
pub struct Cli {
    /// Multipart body to read; standard input when omitted or "-"
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Boundary token, without the leading "--"
    #[arg(short, long, conflicts_with = "content_type")]
    pub boundary: Option<String>,

    /// Full Content-Type header value to take the boundary from, e.g. 'multipart/form-data; boundary=XYZ'
    #[arg(long)]
    pub content_type: Option<String>,

    /// Directory that receives the part files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Scan buffer size in bytes
    #[arg(long, value_parser = validate_buffer_size)]
    pub buffer_size: Option<usize>,

    /// Part bodies above this size are spilled to disk while streaming (e.g. 65536, 64KB, 1MB)
    #[arg(short, long, value_parser = parse_threshold)]
    pub threshold: Option<u64>,

    /// Charset used to decode part headers (defaults to UTF-8)
    #[arg(long)]
    pub header_encoding: Option<String>,

    /// Directory for spill files (defaults to the output directory)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Maximum number of parts accepted
    #[arg(long)]
    pub max_parts: Option<usize>,

    /// Expected body length reported to progress logging (taken from the input file when omitted)
    #[arg(long)]
    pub content_length: Option<i64>,

    /// Enable verbose logging (log level: debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable more detailed logging (log level: info)
    #[arg(long)]
    pub detailed_logging: bool,

    /// Configuration file path (INI format). If not provided, looks for formstream.ini in the current directory or ~/.config/formstream/config.ini
    #[arg(long, value_parser = validate_config_file)]
    pub config_file: Option<String>,
}

/// Largest scan buffer accepted from the command line or a config file
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Validate buffer size is a positive number no larger than 16 MB
fn validate_buffer_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .parse()
        .map_err(|_| "Buffer size must be a positive number".to_string())?;

    if size == 0 {
        return Err("Buffer size must be greater than 0".to_string());
    }

    if size > MAX_BUFFER_SIZE {
        return Err("Buffer size must not exceed 16 MB".to_string());
    }

    Ok(size)
}

fn parse_threshold(s: &str) -> Result<u64, String> {
    parse_size(s).ok_or_else(|| {
        format!("Invalid threshold '{s}': expected a size such as 65536, 64KB or 1MB")
    })
}

/// Validate config file path exists and is a readable file
fn validate_config_file(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("Config file path cannot be empty".to_string());
    }

    let path = PathBuf::from(s);
    if !path.is_file() {
        return Err(format!("Config file does not exist or is not a file: {s}"));
    }

    match std::fs::File::open(&path) {
        Ok(_) => Ok(s.to_string()),
        Err(e) => Err(format!("Cannot read config file {s}: {e}")),
    }
}

impl Cli {
    /// Validate the CLI arguments for consistency
    pub fn validate(&self) -> Result<(), MultipartError> {
        match (&self.boundary, &self.content_type) {
            (None, None) => {
                return Err(MultipartError::invalid_configuration(
                    "Either --boundary or --content-type is required",
                ));
            }
            (Some(boundary), _) if boundary.is_empty() => {
                return Err(MultipartError::invalid_configuration(
                    "Boundary may not be empty",
                ));
            }
            (None, Some(content_type)) => {
                extract_boundary_from_content_type(content_type)?;
            }
            _ => {}
        }

        if let Some(input) = self.input.as_deref().filter(|p| *p != Path::new("-")) {
            if !input.is_file() {
                return Err(MultipartError::invalid_configuration(format!(
                    "Input file not found: {}",
                    input.display()
                )));
            }
        }

        if let Some(size) = self.buffer_size {
            if size < DEFAULT_BUFSIZE / 4 {
                warn!("Small scan buffer configured: {size} bytes. Expect frequent refills.");
            }
        }

        Ok(())
    }

    /// The boundary token given directly or via --content-type
    pub fn resolve_boundary(&self) -> Result<Option<String>, MultipartError> {
        if let Some(boundary) = &self.boundary {
            return Ok(Some(boundary.clone()));
        }
        self.content_type
            .as_deref()
            .map(extract_boundary_from_content_type)
            .transpose()
    }
}
