//! JSON Lines document output.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::errors::FileError;
use crate::options::OutputMode;
use crate::project::Document;

pub struct DocumentWriter<W: Write> {
    out: W,
    written: u64,
}

impl DocumentWriter<BufWriter<File>> {
    /// Open `path` for writing, truncating or appending per `mode`.
    pub fn create(path: &Path, mode: OutputMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(mode.is_append())
            .truncate(!mode.is_append())
            .open(path)
            .with_context(|| FileError {
                path: path.to_path_buf(),
                op: "open output file",
            })?;
        Ok(DocumentWriter::new(BufWriter::new(file)))
    }
}

impl<W: Write> DocumentWriter<W> {
    pub fn new(out: W) -> Self {
        DocumentWriter { out, written: 0 }
    }

    pub fn write(&mut self, document: &Document) -> Result<()> {
        serde_json::to_writer(&mut self.out, document)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> Document {
        Document {
            uri: format!("http://id.loc.gov/authorities/genreForms/{id}"),
            term: "Comic books".into(),
            term_idx: "Comic books".into(),
            term_type: "genreform".into(),
            record_id: id.into(),
            language: "en".into(),
            authority_code: "lcgft".into(),
            authority_name: "Genre/Form".into(),
            unique_id: format!("lcgft_{id}"),
            alternate_term: Some(vec!["Comics".into()]),
            alternate_term_idx: Some(vec!["Comics".into()]),
        }
    }

    #[test]
    fn writes_one_object_per_line() {
        let mut writer = DocumentWriter::new(Vec::new());
        writer.write(&doc("gf1")).unwrap();
        writer.write(&doc("gf2")).unwrap();
        assert_eq!(writer.written(), 2);
        let out = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: Document = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, doc("gf2"));
    }

    #[test]
    fn append_keeps_earlier_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut first = DocumentWriter::create(&path, OutputMode::Truncate).unwrap();
        first.write(&doc("gf1")).unwrap();
        first.finish().unwrap();

        let mut second = DocumentWriter::create(&path, OutputMode::Append).unwrap();
        second.write(&doc("gf2")).unwrap();
        second.finish().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

        DocumentWriter::create(&path, OutputMode::Truncate)
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
