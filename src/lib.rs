/// # formstream
///
/// A single-pass, bounded-memory multipart/form-data scanner.
///
/// The core is [`multipart::MultipartStream`], which walks a multipart body with a
/// fixed-size buffer and hands out a [`multipart::BodyCursor`] per part, and
/// [`threshold::ThresholdBufferedSink`], which keeps small part bodies in memory and
/// spills large ones to disk. The `run` function wires both into a command-line tool
/// that splits a body into per-part files.
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod multipart;
pub mod progress;
pub mod threshold;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::MultipartError;
use crate::extract::{ExtractConfig, ExtractionResult, PartExtractor, format_bytes};
use crate::multipart::{MultipartConfig, MultipartStream};
use crate::progress::{ProgressListener, ProgressNotifier};
use clap::Parser;
use log::{debug, error, info, trace};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Initializes the logger, parses command-line arguments, and extracts the parts.
///
/// This is the main entry point for the application. Any error is logged and the
/// process exits with status 1.
pub fn run() {
    let cli = Cli::parse();

    // Load configuration with precedence: CLI > INI > Defaults
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = if config.verbose {
        "debug"
    } else if config.detailed_logging {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    debug!("Log level set to: {log_level}");

    if config.verbose {
        config.print_summary();
    }

    if let Err(e) = cli.validate() {
        error!("Configuration validation error: {e}");
        std::process::exit(1);
    }

    match extract_with_config(&config) {
        Ok(result) => {
            for part in &result.parts {
                println!(
                    "{}\t{}{}",
                    part.body_path.display(),
                    format_bytes(part.size),
                    if part.spilled { "\t(spilled)" } else { "" }
                );
            }
            info!(
                "Extracted {} part(s), {} in {} ms",
                result.parts.len(),
                format_bytes(result.total_bytes),
                result.processing_time_ms
            );
        }
        Err(e) => {
            if e.is_malformed() {
                error!("Rejected multipart body: {e}");
            } else {
                error!("Extraction failed: {e}");
            }
            std::process::exit(1);
        }
    }
}

/// Open the configured input and extract every part into the output directory
pub fn extract_with_config(config: &Config) -> Result<ExtractionResult, MultipartError> {
    let (input, detected_length): (Box<dyn Read>, i64) = match config.input.as_deref() {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)?;
            let length = file
                .metadata()
                .ok()
                .and_then(|m| i64::try_from(m.len()).ok())
                .unwrap_or(-1);
            (Box::new(file), length)
        }
        _ => (Box::new(io::stdin().lock()), -1),
    };
    let content_length = config.content_length.unwrap_or(detected_length);

    let scanner_config = MultipartConfig {
        buffer_size: config.buffer_size,
        header_encoding: config.header_encoding.clone(),
    };
    let mut stream = MultipartStream::new(input, config.boundary.as_bytes(), scanner_config)?
        .with_progress(ProgressNotifier::with_listener(
            LogProgress::default(),
            content_length,
        ));

    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: config.output_dir.clone(),
        temp_dir: config.temp_dir.clone(),
        threshold: config.threshold,
        max_parts: config.max_parts,
    })?;
    extractor.extract(&mut stream)
}

/// Reports scanner progress through the log
#[derive(Default)]
struct LogProgress {
    items: u32,
}

impl ProgressListener for LogProgress {
    fn update(&mut self, bytes_read: u64, content_length: i64, items: u32) {
        if items != self.items {
            self.items = items;
            debug!("Found part {items} after {bytes_read} bytes");
        } else if content_length > 0 {
            trace!("Read {bytes_read} of {content_length} bytes");
        } else {
            trace!("Read {bytes_read} bytes");
        }
    }
}
