//! Configuration management for formstream
//! Supports INI files with CLI argument overrides

pub mod ini_parser;

use crate::cli::{Cli, MAX_BUFFER_SIZE};
use crate::extract::{DEFAULT_MAX_PARTS, DEFAULT_THRESHOLD};
use crate::multipart::DEFAULT_BUFSIZE;
use ini_parser::IniFile;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    // Input settings
    pub input: Option<PathBuf>,
    pub boundary: String,
    pub content_length: Option<i64>,

    // Scanner settings
    pub buffer_size: usize,
    pub header_encoding: Option<String>,

    // Spill settings
    pub threshold: u64,
    pub temp_dir: Option<PathBuf>,

    // Output settings
    pub output_dir: PathBuf,
    pub max_parts: usize,

    // Logging settings
    pub verbose: bool,
    pub detailed_logging: bool,
}

impl Config {
    /// Load configuration with precedence: CLI args > INI file > Defaults
    pub fn load(cli: &Cli) -> Result<Self, String> {
        let ini = match Self::find_config_file(cli)? {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                IniFile::load_file(&path)?
            }
            None => {
                log::info!("No configuration file found, using defaults and CLI overrides");
                IniFile::new()
            }
        };

        let boundary = cli
            .resolve_boundary()
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "Either --boundary or --content-type is required".to_string())?;

        Ok(Self {
            input: cli.input.clone(),
            boundary,
            content_length: cli.content_length,

            buffer_size: Self::get_buffer_size(&ini, cli)?,
            header_encoding: Self::get_header_encoding(&ini, cli),

            threshold: Self::get_threshold(&ini, cli)?,
            temp_dir: Self::get_temp_dir(&ini, cli),

            output_dir: Self::get_output_dir(&ini, cli),
            max_parts: Self::get_max_parts(&ini, cli)?,

            verbose: cli.verbose || ini.get_bool("logging", "verbose").unwrap_or(false),
            detailed_logging: cli.detailed_logging
                || ini.get_bool("logging", "detailed").unwrap_or(false),
        })
    }

    /// Find configuration file in order of preference
    fn find_config_file(cli: &Cli) -> Result<Option<PathBuf>, String> {
        if let Some(ref config_path) = cli.config_file {
            let path = PathBuf::from(config_path);
            return if path.exists() {
                Ok(Some(path))
            } else {
                Err(format!("Config file specified but not found: {config_path}"))
            };
        }

        let mut candidates = vec![
            PathBuf::from("formstream.ini"),
            PathBuf::from("formstream.conf"),
        ];
        if let Some(home_dir) = std::env::var_os("HOME") {
            candidates.push(
                Path::new(&home_dir)
                    .join(".config")
                    .join("formstream")
                    .join("config.ini"),
            );
        }
        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/formstream/config.ini"));

        Ok(candidates.into_iter().find(|path| path.is_file()))
    }

    fn get_buffer_size(ini: &IniFile, cli: &Cli) -> Result<usize, String> {
        if let Some(size) = cli.buffer_size {
            return Ok(size);
        }

        match ini.get_string("scanner", "buffer_size") {
            Some(raw) => ini
                .get_size("scanner", "buffer_size")
                .and_then(|size| usize::try_from(size).ok())
                .filter(|size| (1..=MAX_BUFFER_SIZE).contains(size))
                .ok_or_else(|| {
                    format!("Invalid [scanner] buffer_size: {raw} (must be 1 byte to 16 MB)")
                }),
            None => Ok(DEFAULT_BUFSIZE),
        }
    }

    fn get_header_encoding(ini: &IniFile, cli: &Cli) -> Option<String> {
        cli.header_encoding
            .clone()
            .or_else(|| ini.get_string("scanner", "header_encoding"))
            .filter(|label| !label.is_empty())
    }

    fn get_threshold(ini: &IniFile, cli: &Cli) -> Result<u64, String> {
        if let Some(threshold) = cli.threshold {
            return Ok(threshold);
        }

        match ini.get_string("spill", "threshold") {
            Some(raw) => ini
                .get_size("spill", "threshold")
                .ok_or_else(|| format!("Invalid [spill] threshold: {raw}")),
            None => Ok(DEFAULT_THRESHOLD),
        }
    }

    fn get_temp_dir(ini: &IniFile, cli: &Cli) -> Option<PathBuf> {
        cli.temp_dir
            .clone()
            .or_else(|| ini.get_string("spill", "temp_dir").map(PathBuf::from))
    }

    fn get_output_dir(ini: &IniFile, cli: &Cli) -> PathBuf {
        cli.output_dir
            .clone()
            .or_else(|| ini.get_string("output", "directory").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn get_max_parts(ini: &IniFile, cli: &Cli) -> Result<usize, String> {
        if let Some(max_parts) = cli.max_parts {
            return Ok(max_parts);
        }

        match ini.get_string("output", "max_parts") {
            Some(raw) => ini
                .get_usize("output", "max_parts")
                .ok_or_else(|| format!("Invalid [output] max_parts: {raw}")),
            None => Ok(DEFAULT_MAX_PARTS),
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        log::info!("Configuration Summary:");
        match &self.input {
            Some(path) => log::info!("  Input: {}", path.display()),
            None => log::info!("  Input: <stdin>"),
        }
        log::info!("  Boundary: {} bytes", self.boundary.len());
        log::info!("  Buffer Size: {} bytes", self.buffer_size);
        log::info!(
            "  Header Encoding: {}",
            self.header_encoding.as_deref().unwrap_or("UTF-8")
        );
        log::info!("  Spill Threshold: {} bytes", self.threshold);
        if let Some(ref temp_dir) = self.temp_dir {
            log::info!("  Spill Directory: {}", temp_dir.display());
        }
        log::info!("  Output Directory: {}", self.output_dir.display());
        log::info!("  Max Parts: {}", self.max_parts);
        log::info!("  Verbose Logging: {}", self.verbose);
        log::info!("  Detailed Logging: {}", self.detailed_logging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_cli() -> Cli {
        Cli {
            input: None,
            boundary: Some("sep".to_string()),
            content_type: None,
            output_dir: None,
            buffer_size: None,
            threshold: None,
            header_encoding: None,
            temp_dir: None,
            max_parts: None,
            content_length: None,
            verbose: false,
            detailed_logging: false,
            config_file: None,
        }
    }

    fn write_config(dir: &TempDir, content: &str) -> String {
        let path = dir.path().join("formstream.ini");
        fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_config_file_values_apply() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = create_test_cli();
        cli.config_file = Some(write_config(
            &temp_dir,
            r#"
[scanner]
buffer_size = 8KB
header_encoding = windows-1252

[spill]
threshold = 1MB
temp_dir = /var/tmp/formstream

[output]
directory = parts
max_parts = 12

[logging]
detailed = true
"#,
        ));

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.boundary, "sep");
        assert_eq!(config.buffer_size, 8 * 1024);
        assert_eq!(config.header_encoding.as_deref(), Some("windows-1252"));
        assert_eq!(config.threshold, 1024 * 1024);
        assert_eq!(config.temp_dir, Some(PathBuf::from("/var/tmp/formstream")));
        assert_eq!(config.output_dir, PathBuf::from("parts"));
        assert_eq!(config.max_parts, 12);
        assert!(config.detailed_logging);
        assert!(!config.verbose);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = create_test_cli();
        cli.config_file = Some(write_config(
            &temp_dir,
            "[scanner]\nbuffer_size = 8192\n[spill]\nthreshold = 10\n",
        ));
        cli.buffer_size = Some(1024);
        cli.threshold = Some(99);

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.threshold, 99);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = create_test_cli();
        cli.config_file = Some(write_config(&temp_dir, "[spill]\nthreshold = huge\n"));

        let err = Config::load(&cli).unwrap_err();
        assert!(err.contains("threshold"), "{err}");
    }

    #[test]
    fn test_config_file_buffer_size_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = create_test_cli();

        cli.config_file = Some(write_config(&temp_dir, "[scanner]\nbuffer_size = 32MB\n"));
        let err = Config::load(&cli).unwrap_err();
        assert!(err.contains("buffer_size"), "{err}");

        cli.config_file = Some(write_config(&temp_dir, "[scanner]\nbuffer_size = 0\n"));
        assert!(Config::load(&cli).is_err());

        cli.config_file = Some(write_config(&temp_dir, "[scanner]\nbuffer_size = 16MB\n"));
        assert_eq!(Config::load(&cli).unwrap().buffer_size, MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let mut cli = create_test_cli();
        cli.config_file = Some("/nonexistent/formstream.ini".to_string());
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    fn test_boundary_from_content_type() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = create_test_cli();
        cli.config_file = Some(write_config(&temp_dir, ""));
        cli.boundary = None;
        cli.content_type = Some("multipart/form-data; boundary=\"xyz\"".to_string());

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.boundary, "xyz");
        assert_eq!(config.buffer_size, DEFAULT_BUFSIZE);
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.max_parts, DEFAULT_MAX_PARTS);
    }
}
