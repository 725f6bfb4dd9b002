use anyhow::{Context, Result};

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::FileError;

/// `<source dir>/<source stem>.json`; a `.zst` suffix is looked through, so
/// `dumps/lcsh.nt.zst` maps to `dumps/lcsh.json`.
pub fn default_output_path(source: &Path) -> PathBuf {
    let mut stem_source = source.to_path_buf();
    if is_zstd(source) {
        stem_source.set_extension("");
    }
    let stem = stem_source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    let mut name = stem;
    name.push(".json");
    source.with_file_name(name)
}

pub fn is_zstd(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("zst")
}

/// Open a statement dump for line reading, decoding zstd on the fly.
pub fn open_source(path: &Path) -> Result<Box<dyn BufRead>> {
    debug!("Reading source: {}", path.display());
    let file = File::open(path).with_context(|| FileError {
        path: path.to_path_buf(),
        op: "open source",
    })?;
    if is_zstd(path) {
        let decoder = zstd::stream::read::Decoder::new(file).with_context(|| FileError {
            path: path.to_path_buf(),
            op: "decompress",
        })?;
        return Ok(Box::new(BufReader::new(decoder)));
    }
    Ok(Box::new(BufReader::with_capacity(1 << 20, file)))
}

pub fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| FileError {
        path: path.to_path_buf(),
        op: "create",
    })?;
    Ok(BufWriter::new(file))
}

/// Result of [`read_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    Line,
    /// The line is not valid UTF-8; the buffer holds a lossy rendering.
    NotUtf8,
    End,
}

/// Reads lines into a reusable buffer. Invalid UTF-8 is reported per line
/// instead of failing the read.
pub fn read_line(reader: &mut dyn BufRead, buf: &mut String, path: &Path) -> Result<LineRead> {
    let mut bytes = std::mem::take(buf).into_bytes();
    bytes.clear();
    let n = reader.read_until(b'\n', &mut bytes).with_context(|| FileError {
        path: path.to_path_buf(),
        op: "read",
    })?;
    if n == 0 {
        return Ok(LineRead::End);
    }
    match String::from_utf8(bytes) {
        Ok(line) => {
            *buf = line;
            Ok(LineRead::Line)
        }
        Err(e) => {
            *buf = String::from_utf8_lossy(e.as_bytes()).into_owned();
            Ok(LineRead::NotUtf8)
        }
    }
}

/// Flush a writer, naming the file in the error.
pub fn finish_file<W: Write>(mut writer: W, path: &Path) -> Result<()> {
    writer.flush().with_context(|| FileError {
        path: path.to_path_buf(),
        op: "write",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/dumps/lcgft.nt")),
            PathBuf::from("/dumps/lcgft.json")
        );
        assert_eq!(
            default_output_path(Path::new("dumps/lcsh.nt.zst")),
            PathBuf::from("dumps/lcsh.json")
        );
        assert_eq!(default_output_path(Path::new("aat")), PathBuf::from("aat.json"));
    }

    #[test]
    fn test_open_zstd_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.nt.zst");
        let mut encoder = zstd::stream::write::Encoder::new(File::create(&path).unwrap(), 3).unwrap();
        encoder.write_all(b"<a> <b> <c> .\n<d> <e> <f> .\n").unwrap();
        encoder.finish().unwrap();

        let mut reader = open_source(&path).unwrap();
        let mut line = String::new();
        let mut lines = 0;
        while read_line(reader.as_mut(), &mut line, &path).unwrap() != LineRead::End {
            lines += 1;
        }
        assert_eq!(lines, 2);
    }

    #[test]
    fn test_read_line_reports_invalid_utf8() {
        let path = Path::new("dump.nt");
        let mut input: &[u8] = b"<a> <b> \"caf\xff\" .\n<d> <e> <f> .\n";
        let mut line = String::new();
        assert_eq!(read_line(&mut input, &mut line, path).unwrap(), LineRead::NotUtf8);
        assert!(line.starts_with("<a> <b>"));
        assert_eq!(read_line(&mut input, &mut line, path).unwrap(), LineRead::Line);
        assert_eq!(line, "<d> <e> <f> .\n");
        assert_eq!(read_line(&mut input, &mut line, path).unwrap(), LineRead::End);
    }

    #[test]
    fn test_missing_source_names_path() {
        let err = open_source(Path::new("/nonexistent/dump.nt")).err().unwrap();
        assert!(format!("{:#}", err).contains("/nonexistent/dump.nt"));
    }
}
