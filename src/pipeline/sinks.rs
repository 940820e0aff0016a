//! Run outputs shared by all workers: the CSV manifest and the warnings stream.
//! Each owns a writer lock; callers never serialize around them.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::repository::RepoObject;

/// Columns every manifest starts with.
pub const MANIFEST_BASE_COLUMNS: [&str; 3] = ["id", "version_id", "path"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarnLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for WarnLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WarnLevel::Info => "INFO",
            WarnLevel::Warn => "WARN",
            WarnLevel::Error => "ERROR",
        })
    }
}

/// Line-oriented `LEVEL: message` stream (stderr or a file).
pub struct WarningSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl WarningSink {
    pub fn stderr() -> Self {
        Self::from_writer(io::stderr())
    }

    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create warnings file {}", path.display()))?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(w: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(w)),
        }
    }

    fn out(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.out.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write one line. A failing sink is reported to the log, never to the caller.
    pub fn emit(&self, level: WarnLevel, message: &str) {
        if let Err(e) = writeln!(self.out(), "{}: {}", level, message) {
            log::error!("Cannot write to warnings sink: {}", e);
        }
    }

    pub fn info(&self, message: &str) {
        self.emit(WarnLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(WarnLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(WarnLevel::Error, message);
    }

    pub fn flush(&self) -> Result<()> {
        self.out().flush().context("flush warnings sink")
    }
}

/// CSV manifest: header of base columns plus extra attributes, one row per exported object.
/// Rows accumulate across resumed runs, so the file keeps describing the whole output tree.
pub struct ManifestSink {
    writer: Mutex<csv::Writer<Box<dyn Write + Send>>>,
    columns: Vec<String>,
}

/// Base columns followed by `extra`, skipping duplicates.
pub fn manifest_columns(extra: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = MANIFEST_BASE_COLUMNS.iter().map(|s| s.to_string()).collect();
    for attr in extra {
        if !columns.contains(attr) {
            columns.push(attr.clone());
        }
    }
    columns
}

impl ManifestSink {
    /// Open the manifest for appending. The header is written only into a new or empty file;
    /// `truncate` starts it over (used by `--reset`).
    pub fn open(path: &Path, extra: &[String], truncate: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(path)
            .with_context(|| format!("open manifest {}", path.display()))?;
        let is_empty = file
            .metadata()
            .with_context(|| format!("stat manifest {}", path.display()))?
            .len()
            == 0;
        Self::build(BufWriter::new(file), extra, is_empty)
    }

    fn build(w: impl Write + Send + 'static, extra: &[String], header: bool) -> Result<Self> {
        let columns = manifest_columns(extra);
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(Box::new(w) as Box<dyn Write + Send>);
        if header {
            writer
                .write_record(&columns)
                .context("write manifest header")?;
            writer.flush().context("flush manifest header")?;
        }
        Ok(Self {
            writer: Mutex::new(writer),
            columns,
        })
    }

    /// Append and flush one row, so rows for completed items survive a killed run.
    pub fn append(&self, obj: &RepoObject, path: &str) -> Result<()> {
        let row: Vec<String> = self
            .columns
            .iter()
            .map(|c| match c.as_str() {
                "path" => path.to_string(),
                other => obj.attribute(other),
            })
            .collect();
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .write_record(&row)
            .with_context(|| format!("write manifest row for {}", obj.id))?;
        writer.flush().context("flush manifest")?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush()
            .context("flush manifest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_columns_follow_base_without_duplicates() {
        let cols = manifest_columns(&["title".into(), "path".into(), "owner".into()]);
        assert_eq!(cols, vec!["id", "version_id", "path", "title", "owner"]);
    }

    #[test]
    fn manifest_rows_quote_and_fill_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        let sink = ManifestSink::open(&path, &["title".into(), "owner".into()], false).unwrap();
        let obj = RepoObject {
            id: "c1".into(),
            version_id: "v1".into(),
            attributes: [("title".to_string(), "Q3, final".to_string())].into(),
            ..Default::default()
        };
        sink.append(&obj, "/out/Q3.pdf").unwrap();
        drop(sink);
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,version_id,path,title,owner");
        assert_eq!(lines[1], "c1,v1,/out/Q3.pdf,\"Q3, final\",");
    }

    #[test]
    fn reopened_manifest_keeps_rows_and_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        let row = |id: &str| RepoObject {
            id: id.into(),
            version_id: format!("{id}1"),
            ..Default::default()
        };
        let first = ManifestSink::open(&path, &[], false).unwrap();
        first.append(&row("b"), "out/b.txt").unwrap();
        drop(first);
        let second = ManifestSink::open(&path, &[], false).unwrap();
        second.append(&row("c"), "out/c.txt").unwrap();
        drop(second);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,version_id,path\r\nb,b1,out/b.txt\r\nc,c1,out/c.txt\r\n"
        );

        let reset = ManifestSink::open(&path, &[], true).unwrap();
        drop(reset);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,version_id,path\r\n");
    }

    #[test]
    fn warning_lines_are_level_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warnings.txt");
        let sink = WarningSink::create(&path).unwrap();
        sink.info("Object c1 has no content");
        sink.warn("Object c2 has more than one path");
        sink.flush().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "INFO: Object c1 has no content\nWARN: Object c2 has more than one path\n"
        );
    }
}
