use formstream::config::Config;
use formstream::error::MultipartError;
use formstream::extract::{ExtractConfig, PartExtractor};
use formstream::extract_with_config;
use formstream::multipart::{MultipartConfig, MultipartStream};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

fn form_body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (headers, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n{headers}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn hidden_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with('.'))
        .collect()
}

fn stream_over(body: Vec<u8>) -> MultipartStream<Cursor<Vec<u8>>> {
    MultipartStream::new(Cursor::new(body), BOUNDARY.as_bytes(), MultipartConfig::default())
        .unwrap()
}

#[test]
fn test_form_upload_is_split_into_files() {
    let output = TempDir::new().unwrap();
    let spill = TempDir::new().unwrap();
    let file_content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    let body = form_body(&[
        ("Content-Disposition: form-data; name=\"title\"", b"Quarterly report"),
        (
            "Content-Disposition: form-data; name=\"upload\"; filename=\"report.bin\"\r\nContent-Type: application/octet-stream",
            &file_content,
        ),
        ("Content-Disposition: form-data; name=\"notes\"", b""),
    ]);

    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: output.path().to_path_buf(),
        temp_dir: Some(spill.path().to_path_buf()),
        threshold: 1024,
        ..Default::default()
    })
    .unwrap();
    let result = extractor.extract(&mut stream_over(body)).unwrap();

    assert_eq!(result.parts.len(), 3);
    assert_eq!(result.total_bytes, 16 + 5000);

    let title = &result.parts[0];
    assert_eq!(title.index, 1);
    assert!(!title.spilled);
    assert_eq!(title.body_path, output.path().join("part-0001.body"));
    assert_eq!(fs::read(&title.body_path).unwrap(), b"Quarterly report");

    let upload = &result.parts[1];
    assert!(upload.spilled);
    assert_eq!(upload.size, 5000);
    assert_eq!(fs::read(&upload.body_path).unwrap(), file_content);
    assert_eq!(
        fs::read_to_string(&upload.header_path).unwrap(),
        "Content-Disposition: form-data; name=\"upload\"; filename=\"report.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    assert_eq!(upload.header_block, fs::read_to_string(&upload.header_path).unwrap());

    let notes = &result.parts[2];
    assert_eq!(notes.size, 0);
    assert_eq!(fs::read(&notes.body_path).unwrap(), b"");

    assert!(hidden_files(output.path()).is_empty());
    assert_eq!(fs::read_dir(spill.path()).unwrap().count(), 0);
}

#[test]
fn test_empty_body_has_no_parts() {
    let output = TempDir::new().unwrap();
    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: output.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();

    let result = extractor.extract(&mut stream_over(Vec::new())).unwrap();
    assert!(result.parts.is_empty());
    assert_eq!(result.total_bytes, 0);
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
}

#[test]
fn test_truncated_upload_leaves_no_spill_file() {
    let output = TempDir::new().unwrap();
    let mut body = form_body(&[("A: 1", b"complete"), ("A: 2", &[0x55u8; 4096])]);
    // Cut the second body short
    body.truncate(body.len() - 1000);

    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: output.path().to_path_buf(),
        threshold: 512,
        ..Default::default()
    })
    .unwrap();

    let err = extractor.extract(&mut stream_over(body)).unwrap_err();
    assert!(err.is_malformed(), "{err}");
    assert!(hidden_files(output.path()).is_empty());
    assert!(output.path().join("part-0001.body").exists());
    assert!(!output.path().join("part-0002.body").exists());
}

#[test]
fn test_failed_store_leaves_no_spill_file() {
    let root = TempDir::new().unwrap();
    let spill = TempDir::new().unwrap();
    let output_dir = root.path().join("out");

    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: output_dir.clone(),
        temp_dir: Some(spill.path().to_path_buf()),
        threshold: 64,
        ..Default::default()
    })
    .unwrap();

    // Replace the output directory with a plain file so nothing can be written into it
    fs::remove_dir(&output_dir).unwrap();
    fs::write(&output_dir, b"").unwrap();

    let body = form_body(&[("A: 1", &[0x42u8; 2048])]);
    let err = extractor.extract(&mut stream_over(body)).unwrap_err();
    assert!(matches!(err, MultipartError::Io(_)), "{err}");
    assert_eq!(fs::read_dir(spill.path()).unwrap().count(), 0);
}

#[test]
fn test_part_limit() {
    let output = TempDir::new().unwrap();
    let body = form_body(&[("A: 1", b"a"), ("A: 2", b"b"), ("A: 3", b"c")]);

    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: output.path().to_path_buf(),
        max_parts: 3,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(extractor.extract(&mut stream_over(body.clone())).unwrap().parts.len(), 3);

    let mut extractor = PartExtractor::new(ExtractConfig {
        output_dir: output.path().to_path_buf(),
        max_parts: 1,
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        extractor.extract(&mut stream_over(body)),
        Err(MultipartError::TooManyParts(1))
    ));

    assert!(matches!(
        PartExtractor::new(ExtractConfig {
            output_dir: output.path().to_path_buf(),
            max_parts: 0,
            ..Default::default()
        }),
        Err(MultipartError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_output_directory_is_created() {
    let root = TempDir::new().unwrap();
    let nested = root.path().join("a").join("b");

    let extractor = PartExtractor::new(ExtractConfig {
        output_dir: nested.clone(),
        ..Default::default()
    })
    .unwrap();
    assert!(nested.is_dir());
    assert_eq!(extractor.config().output_dir, nested);
}

#[test]
fn test_extract_with_config_reads_input_file() {
    let root = TempDir::new().unwrap();
    let input = root.path().join("body.bin");
    fs::write(&input, form_body(&[("A: 1", b"from a file")])).unwrap();

    let config = Config {
        input: Some(input),
        boundary: BOUNDARY.to_string(),
        content_length: None,
        buffer_size: 128,
        header_encoding: None,
        threshold: 4,
        temp_dir: None,
        output_dir: root.path().join("out"),
        max_parts: 10,
        verbose: false,
        detailed_logging: false,
    };

    let result = extract_with_config(&config).unwrap();
    assert_eq!(result.parts.len(), 1);
    assert!(result.parts[0].spilled);
    assert_eq!(
        fs::read(root.path().join("out").join("part-0001.body")).unwrap(),
        b"from a file"
    );

    let missing = Config {
        input: Some(PathBuf::from("/nonexistent/body.bin")),
        ..config
    };
    assert!(matches!(
        extract_with_config(&missing),
        Err(MultipartError::Io(_))
    ));
}
