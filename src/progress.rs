//! Progress reporting for multipart scanning
//!
//! A [`ProgressNotifier`] is handed to the scanner and forwards running totals
//! to an optional [`ProgressListener`] after every buffer refill and after every
//! newly detected part.

use std::fmt;

/// Receives progress updates while a multipart body is scanned.
///
/// `content_length` is `-1` when the total size of the body is unknown.
pub trait ProgressListener {
    fn update(&mut self, bytes_read: u64, content_length: i64, items: u32);
}

impl<F> ProgressListener for F
where
    F: FnMut(u64, i64, u32),
{
    fn update(&mut self, bytes_read: u64, content_length: i64, items: u32) {
        self(bytes_read, content_length, items)
    }
}

/// Running totals for one multipart body
pub struct ProgressNotifier {
    listener: Option<Box<dyn ProgressListener>>,
    content_length: i64,
    bytes_read: u64,
    items: u32,
}

impl ProgressNotifier {
    /// Create a notifier; pass `-1` as `content_length` when it is unknown
    pub fn new(listener: Option<Box<dyn ProgressListener>>, content_length: i64) -> Self {
        Self {
            listener,
            content_length,
            bytes_read: 0,
            items: 0,
        }
    }

    /// Convenience constructor for closure listeners
    pub fn with_listener<L>(listener: L, content_length: i64) -> Self
    where
        L: ProgressListener + 'static,
    {
        Self::new(Some(Box::new(listener)), content_length)
    }

    pub fn note_bytes_read(&mut self, bytes: usize) {
        self.bytes_read += bytes as u64;
        self.notify_listener();
    }

    pub fn note_item(&mut self) {
        self.items += 1;
        self.notify_listener();
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn items(&self) -> u32 {
        self.items
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    fn notify_listener(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener.update(self.bytes_read, self.content_length, self.items);
        }
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new(None, -1)
    }
}

impl fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("has_listener", &self.listener.is_some())
            .field("content_length", &self.content_length)
            .field("bytes_read", &self.bytes_read)
            .field("items", &self.items)
            .finish()
    }
}
