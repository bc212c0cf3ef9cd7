use clap::Parser;
use formstream::cli::Cli;
use formstream::config::{Config, ini_parser::IniFile};
use formstream::multipart::DEFAULT_BUFSIZE;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_ini_file_basic() {
    let ini_content = r#"
# formstream configuration
[scanner]
buffer_size = 16KB
header_encoding = ISO-8859-1

[spill]
threshold = 1.5MB
temp_dir = "/var/tmp/formstream spill"

[output]
directory = ./parts
max_parts = 250

[logging]
verbose = no
detailed = on
"#;

    let ini = IniFile::parse(ini_content).expect("Failed to parse INI");

    assert_eq!(ini.get_size("scanner", "buffer_size"), Some(16 * 1024));
    assert_eq!(
        ini.get_string("scanner", "header_encoding"),
        Some("ISO-8859-1".to_string())
    );
    assert_eq!(
        ini.get_size("spill", "threshold"),
        Some((1.5 * 1024.0 * 1024.0) as u64)
    );
    assert_eq!(
        ini.get_string("spill", "temp_dir"),
        Some("/var/tmp/formstream spill".to_string())
    );
    assert_eq!(ini.get_usize("output", "max_parts"), Some(250));
    assert_eq!(ini.get_bool("logging", "verbose"), Some(false));
    assert_eq!(ini.get_bool("logging", "detailed"), Some(true));
    assert!(!ini.has_section("server"));
}

#[test]
fn test_ini_file_load_errors() {
    let temp_dir = TempDir::new().unwrap();
    assert!(IniFile::load_file(temp_dir.path().join("missing.ini")).is_err());

    let broken = temp_dir.path().join("broken.ini");
    fs::write(&broken, "[scanner\nbuffer_size = 1\n").unwrap();
    let err = IniFile::load_file(&broken).unwrap_err();
    assert!(err.contains("line 1"), "{err}");
}

#[test]
fn test_config_precedence_cli_over_ini_over_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("formstream.ini");
    fs::write(
        &config_path,
        "[scanner]\nbuffer_size = 2KB\n\n[spill]\nthreshold = 100\n\n[output]\ndirectory = from-ini\n",
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "formstream",
        "--boundary",
        "sep",
        "--config-file",
        config_path.to_str().unwrap(),
        "--threshold",
        "4KB",
    ])
    .unwrap();
    let config = Config::load(&cli).unwrap();

    // CLI wins
    assert_eq!(config.threshold, 4 * 1024);
    // INI fills what the CLI leaves open
    assert_eq!(config.buffer_size, 2 * 1024);
    assert_eq!(config.output_dir, PathBuf::from("from-ini"));
    // Defaults for the rest
    assert_eq!(config.header_encoding, None);
    assert_eq!(config.temp_dir, None);
    assert!(!config.verbose);
}

#[test]
fn test_config_requires_boundary() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("empty.ini");
    fs::write(&config_path, "").unwrap();

    let cli = Cli::try_parse_from([
        "formstream",
        "--config-file",
        config_path.to_str().unwrap(),
    ])
    .unwrap();
    assert!(Config::load(&cli).is_err());
    assert!(cli.validate().is_err());

    let cli = Cli::try_parse_from([
        "formstream",
        "--config-file",
        config_path.to_str().unwrap(),
        "--content-type",
        "multipart/form-data; boundary=from-header",
    ])
    .unwrap();
    let config = Config::load(&cli).unwrap();
    assert_eq!(config.boundary, "from-header");
    assert_eq!(config.buffer_size, DEFAULT_BUFSIZE);
}

#[test]
fn test_cli_rejects_bad_values() {
    assert!(Cli::try_parse_from(["formstream", "-b", "x", "--buffer-size", "0"]).is_err());
    assert!(Cli::try_parse_from(["formstream", "-b", "x", "--threshold", "plenty"]).is_err());
    assert!(
        Cli::try_parse_from(["formstream", "-b", "x", "--config-file", "/nonexistent.ini"]).is_err()
    );
}
