//! Incremental decoder for a top-level JSON array of objects.
//!
//! The dump is far larger than memory, so it is never parsed as a whole.
//! A byte scanner tracks brace depth outside string literals and hands each
//! complete top-level element to `serde_json` on its own. Memory use is
//! bounded by the largest single element (and capped by `max_object_bytes`).
//!
//! Scanner states:
//!
//! ```text
//!            '"'                '\\'
//!  Default ───────▶ InString ─────────▶ EscapePending
//!     ▲                │  ▲                   │
//!     └────── '"' ─────┘  └──── any byte ─────┘
//! ```
//!
//! Braces only move the depth counter in `Default`. Structural bytes are
//! ASCII, so scanning raw UTF-8 bytes is safe: continuation bytes never
//! collide with `{`, `}`, `"` or `\`.

use std::io::{self, BufRead};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::IngestError;

/// Default cap on the size of one buffered element (16 MiB).
pub const DEFAULT_MAX_OBJECT_BYTES: usize = 16 * 1024 * 1024;

const PREVIEW_BYTES: usize = 80;

/// Counters describing what a decoder has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Objects emitted.
    pub objects: u64,
    /// Candidates between matched braces that failed to parse.
    pub discarded: u64,
    /// Candidates dropped because they exceeded `max_object_bytes`.
    pub oversized: u64,
    /// Closing braces seen at depth zero.
    pub stray_braces: u64,
    /// Objects still open when the input ended.
    pub incomplete: u64,
    /// Decompressed bytes consumed from the reader.
    pub bytes_read: u64,
    /// Set when the underlying reader failed; decoding stopped there.
    pub read_error: Option<String>,
    /// The most recent parse failure, as a decode error message.
    pub last_discard: Option<String>,
}

impl DecoderStats {
    /// Every candidate that was dropped instead of emitted.
    pub fn skipped(&self) -> u64 {
        self.discarded + self.oversized + self.stray_braces + self.incomplete
    }

    /// The input stopped early, by a read error or mid-object.
    pub fn is_truncated(&self) -> bool {
        self.read_error.is_some() || self.incomplete > 0
    }
}

// ─── Scanner ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    InString,
    EscapePending,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    /// Depth returned to zero; the buffer holds one candidate.
    Complete,
    /// A `}` arrived at depth zero.
    Stray,
}

#[derive(Debug)]
struct Scanner {
    buf: Vec<u8>,
    depth: u32,
    state: State,
    /// The array's opening `[` (or the first significant byte) was seen.
    started: bool,
    /// The current candidate outgrew `max_object_bytes`.
    oversized: bool,
    max_object_bytes: usize,
}

impl Scanner {
    fn new(max_object_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            depth: 0,
            state: State::Default,
            started: false,
            oversized: false,
            max_object_bytes,
        }
    }

    fn push(&mut self, b: u8) {
        if self.buf.len() < self.max_object_bytes {
            self.buf.push(b);
        } else {
            self.oversized = true;
        }
    }

    fn step(&mut self, b: u8) -> Step {
        if !self.started {
            match b {
                // whitespace and a UTF-8 byte order mark
                b' ' | b'\t' | b'\r' | b'\n' | 0xEF | 0xBB | 0xBF => return Step::Continue,
                b'[' => {
                    self.started = true;
                    return Step::Continue;
                }
                _ => self.started = true,
            }
        }

        self.push(b);
        match self.state {
            State::EscapePending => self.state = State::InString,
            State::InString => match b {
                b'\\' => self.state = State::EscapePending,
                b'"' => self.state = State::Default,
                _ => {}
            },
            State::Default => match b {
                b'"' => self.state = State::InString,
                b'{' => self.depth += 1,
                b'}' if self.depth == 0 => return Step::Stray,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Step::Complete;
                    }
                }
                _ => {}
            },
        }
        Step::Continue
    }

    /// The candidate text with the array's `,` / whitespace separators removed.
    fn candidate(&self) -> &[u8] {
        let trimmed = self.buf.trim_ascii_start();
        let start = trimmed
            .iter()
            .position(|b| *b != b',')
            .unwrap_or(trimmed.len());
        trimmed[start..].trim_ascii()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.oversized = false;
    }
}

// ─── StreamDecoder ───────────────────────────────────────────────────────────

enum Fill {
    Eof,
    Failed(io::Error),
    Scanned { consumed: usize, step: Step },
}

/// Lazy, forward-only iterator over the objects of a JSON array.
///
/// Each `next()` resumes scanning where the previous call stopped. The
/// decoder owns its reader, so two decoders can never share one stream.
/// A read error ends the sequence; inspect [`StreamDecoder::stats`] to
/// distinguish it from a clean end of input.
pub struct StreamDecoder<R> {
    reader: R,
    scanner: Scanner,
    stats: DecoderStats,
    finished: bool,
}

impl<R: BufRead> StreamDecoder<R> {
    /// Create a decoder over an already-decompressed text stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scanner: Scanner::new(DEFAULT_MAX_OBJECT_BYTES),
            stats: DecoderStats::default(),
            finished: false,
        }
    }

    /// Override the per-object memory cap.
    pub fn with_max_object_bytes(mut self, max: usize) -> Self {
        self.scanner.max_object_bytes = max.max(2);
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// Consume the decoder, returning its final counters.
    pub fn into_stats(self) -> DecoderStats {
        self.stats
    }

    fn fill(&mut self) -> Fill {
        match self.reader.fill_buf() {
            Ok([]) => Fill::Eof,
            Ok(chunk) => {
                let mut consumed = 0;
                for &b in chunk {
                    consumed += 1;
                    let step = self.scanner.step(b);
                    if step != Step::Continue {
                        return Fill::Scanned { consumed, step };
                    }
                }
                Fill::Scanned {
                    consumed,
                    step: Step::Continue,
                }
            }
            Err(e) => Fill::Failed(e),
        }
    }

    fn take_candidate(&mut self) -> Option<Value> {
        if self.scanner.oversized {
            self.stats.oversized += 1;
            warn!(
                limit = self.scanner.max_object_bytes,
                offset = self.stats.bytes_read,
                "dropping oversized object"
            );
            self.scanner.reset();
            return None;
        }

        let parsed = serde_json::from_slice::<Value>(self.scanner.candidate());
        let out = match parsed {
            Ok(value) => {
                self.stats.objects += 1;
                Some(value)
            }
            Err(e) => {
                self.stats.discarded += 1;
                let text = self.scanner.candidate();
                let preview = String::from_utf8_lossy(&text[..text.len().min(PREVIEW_BYTES)]);
                let err = IngestError::Decode(e.to_string());
                warn!(
                    error = %err,
                    offset = self.stats.bytes_read,
                    preview = %preview,
                    "discarding malformed object"
                );
                self.stats.last_discard = Some(err.to_string());
                None
            }
        };
        self.scanner.reset();
        out
    }
}

impl<R: BufRead> Iterator for StreamDecoder<R> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        while !self.finished {
            match self.fill() {
                Fill::Eof => {
                    self.finished = true;
                    if self.scanner.depth > 0 {
                        self.stats.incomplete += 1;
                        warn!(
                            depth = self.scanner.depth,
                            buffered = self.scanner.buf.len(),
                            "input ended inside an object"
                        );
                    }
                    debug!(
                        objects = self.stats.objects,
                        skipped = self.stats.skipped(),
                        bytes = self.stats.bytes_read,
                        "end of stream"
                    );
                }
                Fill::Failed(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Fill::Failed(e) => {
                    self.finished = true;
                    warn!(error = %e, offset = self.stats.bytes_read, "stream read failed");
                    self.stats.read_error = Some(e.to_string());
                    if self.scanner.depth > 0 {
                        self.stats.incomplete += 1;
                    }
                }
                Fill::Scanned { consumed, step } => {
                    self.reader.consume(consumed);
                    self.stats.bytes_read += consumed as u64;
                    match step {
                        Step::Continue => {}
                        Step::Stray => {
                            self.stats.stray_braces += 1;
                            debug!(offset = self.stats.bytes_read, "stray closing brace");
                            self.scanner.reset();
                        }
                        Step::Complete => {
                            if let Some(value) = self.take_candidate() {
                                return Some(value);
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
