//! Opening the galaxy dump: compression sniffing and buffering.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::error::IngestError;

/// A buffered, decompressed text stream.
pub type InputStream = Box<dyn BufRead + Send>;

const READ_BUFFER: usize = 256 * 1024;

/// Detected compression format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Detect compression from magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [0x1f, 0x8b, ..] => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}

/// Wrap `reader` in a gzip decoder if it starts with the gzip magic.
pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Result<(Compression, InputStream), IngestError> {
    let mut raw = BufReader::with_capacity(READ_BUFFER, reader);
    let compression = Compression::detect(raw.fill_buf()?);
    let stream: InputStream = match compression {
        Compression::Gzip => Box::new(BufReader::with_capacity(READ_BUFFER, MultiGzDecoder::new(raw))),
        Compression::None => Box::new(raw),
    };
    Ok((compression, stream))
}

/// Open a dump file, transparently decompressing gzip.
pub fn open_input(path: impl AsRef<Path>) -> Result<InputStream, IngestError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| IngestError::StreamRead(format!("{}: {e}", path.display())))?;
    let (compression, stream) = from_reader(file)?;
    debug!(path = %path.display(), %compression, "opened input");
    Ok(stream)
}
