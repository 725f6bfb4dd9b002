//! Chunk files: one sorted run of records per file.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic    [u8; 4]  "RSRT"
//! version  u16      1
//! flags    u16      bit0 = body is zstd-compressed
//! records  u64      number of records in the body
//! body     records × { uvarint key_len, uvarint line_len, line bytes }
//!          followed by u32 CRC-32 of the uncompressed record bytes
//! ```
//!
//! The key is always a prefix of the line, so it is stored only once.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::codec::{push_uvarint, read_uvarint_from, Crc32};
use crate::{Result, SortError};

const MAGIC: &[u8; 4] = b"RSRT";
const VERSION: u16 = 1;
const FLAG_ZSTD: u16 = 1;
const HEADER_LEN: usize = 16;

/// A text line carrying the length of its sort key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    line: String,
    key_len: usize,
}

impl Record {
    /// Build a record whose key is `line[..key_len]`.
    pub fn new(line: String, key_len: usize) -> Result<Self> {
        if key_len > line.len() || !line.is_char_boundary(key_len) {
            return Err(SortError::Invalid("key is not a prefix of the line"));
        }
        Ok(Record { line, key_len })
    }

    pub fn key(&self) -> &str {
        &self.line[..self.key_len]
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn into_line(self) -> String {
        self.line
    }
}

/// Summary of a chunk written to disk.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub path: PathBuf,
    pub records: u64,
    pub bytes: u64,
}

enum BodyWriter {
    Raw(BufWriter<File>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl BodyWriter {
    fn finish(self) -> Result<()> {
        match self {
            BodyWriter::Raw(mut w) => w.flush()?,
            #[cfg(feature = "zstd")]
            BodyWriter::Zstd(enc) => enc.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            BodyWriter::Raw(w) => w.write(buf),
            #[cfg(feature = "zstd")]
            BodyWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            BodyWriter::Raw(w) => w.flush(),
            #[cfg(feature = "zstd")]
            BodyWriter::Zstd(w) => w.flush(),
        }
    }
}

/// Writes sorted runs to chunk files.
#[derive(Debug, Clone, Copy)]
pub struct ChunkWriter {
    compress: bool,
}

impl ChunkWriter {
    pub fn new(compress: bool) -> Self {
        ChunkWriter { compress }
    }

    /// Write `records` as they are ordered in the slice. Callers are
    /// responsible for sorting; the merge relies on each chunk being ordered.
    pub fn write_run(&self, path: &Path, records: &[Record]) -> Result<ChunkInfo> {
        let mut file = BufWriter::new(File::create(path)?);
        let flags = if self.compress { FLAG_ZSTD } else { 0 };
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&flags.to_le_bytes());
        header[8..16].copy_from_slice(&(records.len() as u64).to_le_bytes());
        file.write_all(&header)?;

        let mut body = if self.compress {
            #[cfg(feature = "zstd")]
            {
                BodyWriter::Zstd(zstd::stream::write::Encoder::new(file, 0)?)
            }
            #[cfg(not(feature = "zstd"))]
            {
                return Err(SortError::Invalid("zstd feature not enabled"));
            }
        } else {
            BodyWriter::Raw(file)
        };

        let mut crc = Crc32::new();
        let mut prefix = Vec::with_capacity(20);
        for record in records {
            prefix.clear();
            push_uvarint(record.key_len as u64, &mut prefix);
            push_uvarint(record.line.len() as u64, &mut prefix);
            body.write_all(&prefix)?;
            body.write_all(record.line.as_bytes())?;
            crc.update(&prefix);
            crc.update(record.line.as_bytes());
        }
        body.write_all(&crc.finalize().to_le_bytes())?;
        body.finish()?;

        let bytes = fs::metadata(path)?.len();
        Ok(ChunkInfo {
            path: path.to_path_buf(),
            records: records.len() as u64,
            bytes,
        })
    }
}

enum BodyReader {
    Raw(BufReader<File>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::stream::read::Decoder<'static, BufReader<File>>),
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            BodyReader::Raw(r) => r.read(buf),
            #[cfg(feature = "zstd")]
            BodyReader::Zstd(r) => r.read(buf),
        }
    }
}

/// Streams the records of one chunk file in stored order.
pub struct ChunkReader {
    path: PathBuf,
    body: Option<BodyReader>,
    total: u64,
    remaining: u64,
    crc: Crc32,
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("path", &self.path)
            .field("total", &self.total)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl ChunkReader {
    /// Open a chunk and validate its header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| SortError::Invalid("short or invalid chunk header"))?;
        if &header[0..4] != MAGIC {
            return Err(SortError::Invalid("bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(SortError::Invalid("unsupported chunk version"));
        }
        let flags = u16::from_le_bytes([header[6], header[7]]);
        let mut count = [0u8; 8];
        count.copy_from_slice(&header[8..16]);
        let total = u64::from_le_bytes(count);

        let body = if flags & FLAG_ZSTD != 0 {
            #[cfg(feature = "zstd")]
            {
                BodyReader::Zstd(zstd::stream::read::Decoder::new(file)?)
            }
            #[cfg(not(feature = "zstd"))]
            {
                return Err(SortError::Invalid("zstd feature not enabled"));
            }
        } else {
            BodyReader::Raw(BufReader::new(file))
        };

        Ok(ChunkReader {
            path: path.to_path_buf(),
            body: Some(body),
            total,
            remaining: total,
            crc: Crc32::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records the header announces.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Read the next record. At the end of the run the body checksum is
    /// verified and the file handle is released.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };
        if self.remaining == 0 {
            let mut stored = [0u8; 4];
            body.read_exact(&mut stored)
                .map_err(|_| SortError::Corrupt(format!("{}: missing checksum", self.path.display())))?;
            self.body = None;
            if u32::from_le_bytes(stored) != self.crc.finalize() {
                return Err(SortError::Corrupt(format!(
                    "{}: checksum mismatch",
                    self.path.display()
                )));
            }
            return Ok(None);
        }

        let key_len = read_uvarint_from(body, &mut self.crc)? as usize;
        let line_len = read_uvarint_from(body, &mut self.crc)? as usize;
        let mut bytes = vec![0u8; line_len];
        body.read_exact(&mut bytes)?;
        self.crc.update(&bytes);
        let line = String::from_utf8(bytes)
            .map_err(|_| SortError::Corrupt(format!("{}: line is not UTF-8", self.path.display())))?;
        self.remaining -= 1;
        Record::new(line, key_len)
            .map(Some)
            .map_err(|_| SortError::Corrupt(format!("{}: key length out of range", self.path.display())))
    }

    /// Release the handle and delete the chunk file.
    pub fn remove(mut self) -> Result<()> {
        self.body = None;
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
