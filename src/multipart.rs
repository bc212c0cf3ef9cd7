//! Single-pass multipart/form-data scanner
//!
//! [`MultipartStream`] walks a multipart body (RFC 2046 / RFC 7578 framing) with a
//! fixed-size buffer, no matter how large the body or its parts are. The caller drives
//! it part by part:
//!
//! 1. [`MultipartStream::skip_preamble`] discards everything before the first boundary.
//! 2. [`MultipartStream::read_headers`] returns the raw header block of the current part.
//! 3. [`MultipartStream::new_body_cursor`] yields a [`BodyCursor`] that reads the part
//!    body and stops exactly at the next delimiter.
//! 4. [`MultipartStream::read_boundary`] consumes that delimiter and reports whether
//!    another part follows.
//!
//! # Example
//! ```rust,no_run
//! use formstream::multipart::{MultipartConfig, MultipartStream};
//! use std::io::{Cursor, Read};
//!
//! fn list_parts() -> Result<(), Box<dyn std::error::Error>> {
//!     let body = b"--X\r\nA: 1\r\n\r\nhello\r\n--X--".to_vec();
//!     let mut stream = MultipartStream::new(Cursor::new(body), b"X", MultipartConfig::default())?;
//!
//!     let mut next_part = stream.skip_preamble()?;
//!     while next_part {
//!         let headers = stream.read_headers()?;
//!         let mut data = Vec::new();
//!         stream.new_body_cursor().read_to_end(&mut data)?;
//!         println!("{} header bytes, {} body bytes", headers.len(), data.len());
//!         next_part = stream.read_boundary()?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::MultipartError;
use crate::progress::ProgressNotifier;
use encoding_rs::Encoding;
use log::{debug, trace, warn};
use std::io::{self, Read, Write};

/// Default size of the scan buffer
pub const DEFAULT_BUFSIZE: usize = 4096;
/// Upper bound for a single part's header block
pub const HEADER_PART_SIZE_MAX: usize = 10240;

const CR: u8 = 0x0D;
const LF: u8 = 0x0A;
const DASH: u8 = 0x2D;

const HEADER_SEPARATOR: [u8; 4] = [CR, LF, CR, LF];
const FIELD_SEPARATOR: [u8; 2] = [CR, LF];
const STREAM_TERMINATOR: [u8; 2] = [DASH, DASH];
/// Prepended to the boundary token to form the delimiter that is searched for
const BOUNDARY_PREFIX: [u8; 4] = [CR, LF, DASH, DASH];

const MAX_BOUNDARY_LENGTH: usize = 70; // RFC 2046 limit

/// Scanner settings
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Size of the scan buffer; must hold the prefixed boundary plus one byte
    pub buffer_size: usize,
    /// Charset label used to decode header blocks (UTF-8 when unset or unknown)
    pub header_encoding: Option<String>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFSIZE,
            header_encoding: None,
        }
    }
}

/// Forward-only scanner over one multipart body
pub struct MultipartStream<R> {
    /// `None` once a body cursor hard-closed the source
    input: Option<R>,
    /// CR LF "--" followed by the boundary token
    boundary: Vec<u8>,
    /// 2 while skipping the preamble, where the leading CR LF is optional
    delimiter_offset: usize,
    keep_region: usize,
    buffer: Box<[u8]>,
    head: usize,
    tail: usize,
    header_encoding: Option<&'static Encoding>,
    notifier: ProgressNotifier,
}

impl<R: Read> MultipartStream<R> {
    /// Create a scanner for `input` delimited by `boundary` (the raw token, without "--")
    pub fn new(input: R, boundary: &[u8], config: MultipartConfig) -> Result<Self, MultipartError> {
        if boundary.is_empty() {
            return Err(MultipartError::invalid_configuration(
                "Boundary token may not be empty",
            ));
        }

        let boundary_length = boundary.len() + BOUNDARY_PREFIX.len();
        if config.buffer_size < boundary_length + 1 {
            return Err(MultipartError::invalid_configuration(format!(
                "Buffer size {} is too small for a {}-byte boundary",
                config.buffer_size,
                boundary.len()
            )));
        }

        let mut delimiter = Vec::with_capacity(boundary_length);
        delimiter.extend_from_slice(&BOUNDARY_PREFIX);
        delimiter.extend_from_slice(boundary);

        let mut stream = Self {
            input: Some(input),
            boundary: delimiter,
            delimiter_offset: 0,
            keep_region: boundary_length,
            buffer: vec![0u8; config.buffer_size].into_boxed_slice(),
            head: 0,
            tail: 0,
            header_encoding: None,
            notifier: ProgressNotifier::default(),
        };
        if let Some(label) = config.header_encoding.as_deref() {
            stream.set_header_encoding(label);
        }

        debug!(
            "Created multipart scanner: boundary {} bytes, buffer {} bytes",
            boundary.len(),
            config.buffer_size
        );
        Ok(stream)
    }

    /// Create a scanner using the `boundary=` parameter of a multipart Content-Type value
    pub fn from_content_type(
        input: R,
        content_type: &str,
        config: MultipartConfig,
    ) -> Result<Self, MultipartError> {
        let boundary = extract_boundary_from_content_type(content_type)?;
        Self::new(input, boundary.as_bytes(), config)
    }

    /// Attach a progress notifier
    pub fn with_progress(mut self, notifier: ProgressNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Select the charset used by [`read_headers`](Self::read_headers).
    /// Unknown labels fall back to UTF-8.
    pub fn set_header_encoding(&mut self, label: &str) {
        self.header_encoding = Encoding::for_label(label.trim().as_bytes());
        if self.header_encoding.is_none() {
            warn!("Unknown header encoding '{label}', falling back to UTF-8");
        }
    }

    pub fn header_encoding(&self) -> &'static Encoding {
        self.header_encoding.unwrap_or(encoding_rs::UTF_8)
    }

    pub fn progress(&self) -> &ProgressNotifier {
        &self.notifier
    }

    /// Replace the boundary token, e.g. to scan a nested multipart body.
    ///
    /// The buffer bookkeeping depends on the boundary length, so the new token
    /// must be exactly as long as the current one.
    pub fn set_boundary(&mut self, boundary: &[u8]) -> Result<(), MultipartError> {
        if boundary.len() != self.boundary.len() - BOUNDARY_PREFIX.len() {
            return Err(MultipartError::illegal_boundary(format!(
                "The length of a boundary token cannot be changed (expected {} bytes, got {})",
                self.boundary.len() - BOUNDARY_PREFIX.len(),
                boundary.len()
            )));
        }
        self.boundary[BOUNDARY_PREFIX.len()..].copy_from_slice(boundary);
        Ok(())
    }

    /// Discard the preamble and the first boundary.
    ///
    /// Returns `false` if the source ends without containing a usable boundary,
    /// which is how an empty multipart body looks.
    pub fn skip_preamble(&mut self) -> Result<bool, MultipartError> {
        // The first delimiter need not be preceded by CR LF
        self.delimiter_offset = 2;
        let outcome = self
            .discard_body_data()
            .and_then(|discarded| {
                trace!("Discarded {discarded} preamble bytes");
                self.read_boundary()
            });
        self.delimiter_offset = 0;

        match outcome {
            Ok(found) => Ok(found),
            Err(e) if e.is_malformed() => {
                debug!("No multipart boundary found: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Consume the delimiter at the current position.
    ///
    /// Returns `true` if another part follows and `false` after the closing delimiter.
    pub fn read_boundary(&mut self) -> Result<bool, MultipartError> {
        let delimiter_len = self.boundary.len() - self.delimiter_offset;
        if !self.ensure_buffered(delimiter_len)? {
            return Err(MultipartError::malformed("Stream ended unexpectedly"));
        }
        if self.buffer[self.head..self.head + delimiter_len]
            != self.boundary[self.delimiter_offset..]
        {
            return Err(MultipartError::malformed(
                "Expected a boundary at the current position",
            ));
        }
        self.head += delimiter_len;

        let first = self.next_byte_or_malformed()?;
        // Some browsers end the boundary line with a bare LF
        if first == LF {
            self.notifier.note_item();
            return Ok(true);
        }

        let second = self.next_byte_or_malformed()?;
        match [first, second] {
            STREAM_TERMINATOR => {
                debug!("Reached closing boundary");
                Ok(false)
            }
            FIELD_SEPARATOR => {
                self.notifier.note_item();
                Ok(true)
            }
            _ => Err(MultipartError::malformed(
                "Unexpected characters follow a boundary",
            )),
        }
    }

    /// Read the header block of the current part, including the blank line that ends it
    pub fn read_headers(&mut self) -> Result<String, MultipartError> {
        let mut block = Vec::new();
        let mut matched = 0;

        while matched < HEADER_SEPARATOR.len() {
            let b = self.next_byte_or_malformed()?;
            if block.len() >= HEADER_PART_SIZE_MAX {
                return Err(MultipartError::HeaderSectionTooLarge(HEADER_PART_SIZE_MAX));
            }
            if b == HEADER_SEPARATOR[matched] {
                matched += 1;
            } else {
                matched = 0;
            }
            block.push(b);
        }

        let (headers, _) = self
            .header_encoding()
            .decode_without_bom_handling(&block);
        trace!("Read {} header bytes", block.len());
        Ok(headers.into_owned())
    }

    /// Cursor over the body of the current part
    pub fn new_body_cursor(&mut self) -> BodyCursor<'_, R> {
        BodyCursor::new(self)
    }

    /// Copy the body of the current part into `output`
    pub fn read_body_data<W: Write>(&mut self, output: &mut W) -> Result<u64, MultipartError> {
        let mut cursor = self.new_body_cursor();
        let copied = io::copy(&mut cursor, output)?;
        cursor.close(false)?;
        Ok(copied)
    }

    /// Skip the body of the current part
    pub fn discard_body_data(&mut self) -> Result<u64, MultipartError> {
        let mut cursor = self.new_body_cursor();
        cursor.close(false)?;
        Ok(cursor.bytes_read())
    }

    /// Locate the active delimiter within `head..tail`
    fn find_separator(&self) -> Option<usize> {
        let delimiter = &self.boundary[self.delimiter_offset..];
        let len = delimiter.len();
        if self.tail < self.head + len {
            return None;
        }

        let max_pos = self.tail - len;
        let mut first = self.head;
        while first <= max_pos {
            let candidate = self.find_byte(delimiter[0], first)?;
            if candidate > max_pos {
                return None;
            }
            if self.buffer[candidate + 1..candidate + len] == delimiter[1..] {
                return Some(candidate);
            }
            first = candidate + 1;
        }
        None
    }

    fn find_byte(&self, value: u8, from: usize) -> Option<usize> {
        self.buffer[from..self.tail]
            .iter()
            .position(|&b| b == value)
            .map(|offset| from + offset)
    }

    /// Read from the source into `buffer[from..]`; `Ok(0)` means end of source
    fn fill(&mut self, from: usize) -> Result<usize, MultipartError> {
        let input = self.input.as_mut().ok_or_else(|| {
            MultipartError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "byte source has been closed",
            ))
        })?;

        loop {
            match input.read(&mut self.buffer[from..]) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(MultipartError::Io(e)),
            }
        }
    }

    /// Compact and refill until `n` bytes follow `head`; `false` if the source ends first
    fn ensure_buffered(&mut self, n: usize) -> Result<bool, MultipartError> {
        if self.tail - self.head >= n {
            return Ok(true);
        }

        self.buffer.copy_within(self.head..self.tail, 0);
        self.tail -= self.head;
        self.head = 0;
        while self.tail < n {
            let tail = self.tail;
            let read = self.fill(tail)?;
            if read == 0 {
                return Ok(false);
            }
            self.notifier.note_bytes_read(read);
            self.tail += read;
        }
        Ok(true)
    }

    fn next_byte(&mut self) -> Result<Option<u8>, MultipartError> {
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
            let read = self.fill(0)?;
            if read == 0 {
                return Ok(None);
            }
            self.tail = read;
            self.notifier.note_bytes_read(read);
        }
        let b = self.buffer[self.head];
        self.head += 1;
        Ok(Some(b))
    }

    fn next_byte_or_malformed(&mut self) -> Result<u8, MultipartError> {
        self.next_byte()?
            .ok_or_else(|| MultipartError::malformed("Stream ended unexpectedly"))
    }

    fn close_source(&mut self) {
        if self.input.take().is_some() {
            debug!("Closed underlying byte source");
        }
    }
}

/// Bounded reader over the body of one part.
///
/// Returned by [`MultipartStream::new_body_cursor`]; it borrows the scanner, so a
/// cursor cannot outlive the part it was created for. Dropping an open cursor
/// discards whatever is left of the body.
pub struct BodyCursor<'a, R: Read> {
    stream: &'a mut MultipartStream<R>,
    /// Start of the delimiter, if it is within the buffered bytes
    pos: Option<usize>,
    /// Trailing bytes held back because they may begin a delimiter
    pad: usize,
    total: u64,
    closed: bool,
}

impl<'a, R: Read> BodyCursor<'a, R> {
    fn new(stream: &'a mut MultipartStream<R>) -> Self {
        let mut cursor = Self {
            stream,
            pos: None,
            pad: 0,
            total: 0,
            closed: false,
        };
        cursor.locate_separator();
        cursor
    }

    /// Bytes that can be read without touching the source
    pub fn available(&self) -> usize {
        match self.pos {
            Some(pos) => pos - self.stream.head,
            None => self.stream.tail - self.stream.head - self.pad,
        }
    }

    /// Bytes read or skipped so far
    pub fn bytes_read(&self) -> u64 {
        self.total
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read one byte; `None` once the delimiter is reached
    pub fn read_byte(&mut self) -> Result<Option<u8>, MultipartError> {
        self.ensure_open()?;
        if self.available() == 0 && self.make_available()? == 0 {
            return Ok(None);
        }
        let b = self.stream.buffer[self.stream.head];
        self.stream.head += 1;
        self.total += 1;
        Ok(Some(b))
    }

    /// Skip up to `n` bytes of the body, returning how many were skipped
    pub fn skip(&mut self, n: u64) -> Result<u64, MultipartError> {
        self.ensure_open()?;
        let mut available = self.available();
        if available == 0 {
            available = self.make_available()?;
            if available == 0 {
                return Ok(0);
            }
        }
        let skipped = n.min(available as u64);
        self.stream.head += skipped as usize;
        self.total += skipped;
        Ok(skipped)
    }

    /// Close the cursor.
    ///
    /// A soft close (`hard == false`) discards the unread remainder of the body so the
    /// scanner is positioned at the next delimiter. A hard close drops the underlying
    /// byte source instead.
    pub fn close(&mut self, hard: bool) -> Result<(), MultipartError> {
        if self.closed {
            return Ok(());
        }
        if hard {
            self.closed = true;
            self.stream.close_source();
            return Ok(());
        }

        let drained = self.drain();
        self.closed = true;
        drained
    }

    fn drain(&mut self) -> Result<(), MultipartError> {
        loop {
            let mut available = self.available();
            if available == 0 {
                available = self.make_available()?;
                if available == 0 {
                    return Ok(());
                }
            }
            self.stream.head += available;
            self.total += available as u64;
        }
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, MultipartError> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut available = self.available();
        if available == 0 {
            available = self.make_available()?;
            if available == 0 {
                return Ok(0);
            }
        }

        let n = available.min(buf.len());
        let head = self.stream.head;
        buf[..n].copy_from_slice(&self.stream.buffer[head..head + n]);
        self.stream.head += n;
        self.total += n as u64;
        Ok(n)
    }

    fn ensure_open(&self) -> Result<(), MultipartError> {
        if self.closed {
            Err(MultipartError::ItemAlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn locate_separator(&mut self) {
        self.pos = self.stream.find_separator();
        if self.pos.is_none() {
            let buffered = self.stream.tail - self.stream.head;
            self.pad = buffered.min(self.stream.keep_region);
        }
    }

    /// Refill the scan buffer, keeping the pad bytes that may start a delimiter.
    /// Returns the bytes now available, `0` meaning the delimiter has been reached.
    fn make_available(&mut self) -> Result<usize, MultipartError> {
        if self.pos.is_some() {
            return Ok(0);
        }

        let stream = &mut *self.stream;
        let pad_start = stream.tail - self.pad;
        stream.buffer.copy_within(pad_start..stream.tail, 0);
        stream.head = 0;
        stream.tail = self.pad;

        loop {
            let tail = self.stream.tail;
            let read = self.stream.fill(tail)?;
            if read == 0 {
                return Err(MultipartError::malformed("Stream ended unexpectedly"));
            }
            self.stream.notifier.note_bytes_read(read);
            self.stream.tail += read;

            self.locate_separator();
            let available = self.available();
            if available > 0 || self.pos.is_some() {
                return Ok(available);
            }
        }
    }
}

impl<R: Read> Read for BodyCursor<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf).map_err(io::Error::from)
    }
}

impl<R: Read> Drop for BodyCursor<'_, R> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close(false) {
                debug!("Failed to discard unread part body: {e}");
            }
        }
    }
}

/// Extract the boundary token from a `multipart/*` Content-Type value
pub fn extract_boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        return Err(MultipartError::invalid_configuration(format!(
            "Not a multipart content type: {content_type}"
        )));
    }

    for param in content_type.split(';').skip(1) {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("boundary") {
                let boundary = value.trim().trim_matches('"');
                validate_boundary(boundary)?;
                return Ok(boundary.to_string());
            }
        }
    }

    Err(MultipartError::invalid_configuration(
        "No boundary found in Content-Type",
    ))
}

/// Check a boundary token against the RFC 2046 character set and length
pub fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.is_empty() {
        return Err(MultipartError::invalid_configuration("Boundary too short"));
    }

    if boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(MultipartError::invalid_configuration("Boundary too long"));
    }

    if !boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c))
        || boundary.ends_with(' ')
    {
        return Err(MultipartError::invalid_configuration(
            "Boundary contains invalid characters",
        ));
    }

    Ok(())
}
