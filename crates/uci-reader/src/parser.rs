// Record sources — turn UCI text into feature / label fields
//
// A UCI data file holds one sample per line, columns separated by spaces,
// tabs or commas:
//
//   5.1 3.5 1.4 0.2 Iris-setosa
//   7.0 3.2 4.7 1.4 Iris-versicolor
//
// The caller says which columns are features and which are labels (labels
// may come first). Feature columns must be numeric. Label columns are kept
// as raw tokens for category lookup, and parsed as numbers too when the
// layout asks for numeric labels, so a bad value reports its line.
//
// Sources are addressable by record index. `UciParser` learns the byte offset
// of every record it passes, so once a file has been counted any record can
// be reached with a single seek.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use uci_core::{Error, Result};

use crate::config::ReaderConfig;

/// Which columns of a line hold what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub feature_start: usize,
    pub feature_dim: usize,
    pub label_start: usize,
    pub label_columns: usize,
    /// Parse label columns as numbers (regression / other labels).
    pub numeric_labels: bool,
}

impl RecordLayout {
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self {
            feature_start: config.feature_start,
            feature_dim: config.feature_dim,
            label_start: config.resolved_label_start(),
            label_columns: config.label_columns(),
            numeric_labels: config.label_type.is_numeric(),
        }
    }

    /// Number of columns a line must have at least.
    pub fn min_columns(&self) -> usize {
        let features = self.feature_start + self.feature_dim;
        if self.label_columns == 0 {
            features
        } else {
            features.max(self.label_start + self.label_columns)
        }
    }
}

/// One parsed line. Buffers are reused from record to record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecord {
    pub features: Vec<f64>,
    /// Raw label tokens.
    pub labels: Vec<String>,
    /// Label tokens as numbers, filled only for numeric label layouts.
    pub label_values: Vec<f64>,
}

/// The line parser collaborator: a sequence of records addressable by index.
pub trait RecordSource: Send {
    /// Human-readable name used in error messages.
    fn name(&self) -> &str;

    /// Parse the next record into `record`. Returns `Ok(false)` once the
    /// source is exhausted.
    fn read_record(&mut self, record: &mut ParsedRecord) -> Result<bool>;

    /// Position the source so the next `read_record` returns record `index`.
    fn seek_record(&mut self, index: usize) -> Result<()>;

    /// Index of the record the next `read_record` returns.
    fn position(&self) -> usize;

    /// Count all records, leaving the source positioned at record 0.
    fn count_records(&mut self) -> Result<usize>;
}

/// Open the source described by `config`.
pub fn open_source(config: &ReaderConfig) -> Result<Box<dyn RecordSource>> {
    let layout = RecordLayout::from_config(config);
    if config.one_line_per_file {
        Ok(Box::new(OneLinePerFileSource::open(
            &config.file,
            layout,
            &config.delimiters,
        )?))
    } else {
        Ok(Box::new(UciParser::open(
            &config.file,
            layout,
            &config.delimiters,
            config.skip_header,
        )?))
    }
}

/// Split `line` into fields and fill `record` according to `layout`.
fn parse_fields(
    line: &str,
    delimiters: &[char],
    layout: &RecordLayout,
    source_name: &str,
    line_no: usize,
    record: &mut ParsedRecord,
) -> Result<()> {
    let fields: Vec<&str> = line
        .split(|c: char| delimiters.contains(&c) || c == '\r' || c == '\n')
        .filter(|f| !f.is_empty())
        .collect();

    if fields.len() < layout.min_columns() {
        return Err(Error::parse(
            source_name,
            line_no,
            format!(
                "has {} columns, expected at least {}",
                fields.len(),
                layout.min_columns()
            ),
        ));
    }

    record.features.clear();
    for c in layout.feature_start..layout.feature_start + layout.feature_dim {
        let val: f64 = fields[c].parse().map_err(|e| {
            Error::parse(
                source_name,
                line_no,
                format!("col {c}: {:?} is not a number: {e}", fields[c]),
            )
        })?;
        record.features.push(val);
    }

    record.labels.clear();
    record.label_values.clear();
    for c in layout.label_start..layout.label_start + layout.label_columns {
        record.labels.push(fields[c].to_string());
        if layout.numeric_labels {
            let val: f64 = fields[c].parse().map_err(|e| {
                Error::parse(
                    source_name,
                    line_no,
                    format!("label col {c}: {:?} is not a number: {e}", fields[c]),
                )
            })?;
            record.label_values.push(val);
        }
    }
    Ok(())
}

// UciParser — one record per non-blank line of a single file

/// Streaming parser over a delimited text file.
pub struct UciParser {
    name: String,
    reader: BufReader<File>,
    layout: RecordLayout,
    delimiters: Vec<char>,
    skip_header: bool,
    /// `(byte offset, line number)` of every record seen so far.
    offsets: Vec<(u64, usize)>,
    next_record: usize,
    byte_pos: u64,
    line_no: usize,
    line: String,
}

impl UciParser {
    pub fn open(
        path: impl AsRef<Path>,
        layout: RecordLayout,
        delimiters: &str,
        skip_header: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::config(format!("cannot open data file {}: {e}", path.display()))
        })?;
        Ok(Self {
            name: path.display().to_string(),
            reader: BufReader::new(file),
            layout,
            delimiters: delimiters.chars().collect(),
            skip_header,
            offsets: Vec::new(),
            next_record: 0,
            byte_pos: 0,
            line_no: 0,
            line: String::new(),
        })
    }

    /// Advance to the next record line, leaving it in `self.line`.
    fn next_line(&mut self) -> Result<bool> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line)?;
            if n == 0 {
                return Ok(false);
            }
            let start = self.byte_pos;
            self.byte_pos += n as u64;
            self.line_no += 1;
            if self.line_no == 1 && self.skip_header {
                continue;
            }
            if self.line.trim().is_empty() {
                continue;
            }
            if self.next_record == self.offsets.len() {
                self.offsets.push((start, self.line_no));
            }
            self.next_record += 1;
            return Ok(true);
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.byte_pos = 0;
        self.line_no = 0;
        self.next_record = 0;
        Ok(())
    }
}

impl RecordSource for UciParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_record(&mut self, record: &mut ParsedRecord) -> Result<bool> {
        if !self.next_line()? {
            return Ok(false);
        }
        parse_fields(
            &self.line,
            &self.delimiters,
            &self.layout,
            &self.name,
            self.line_no,
            record,
        )?;
        Ok(true)
    }

    fn seek_record(&mut self, index: usize) -> Result<()> {
        if index == self.next_record {
            return Ok(());
        }
        if let Some(&(offset, line_no)) = self.offsets.get(index) {
            self.reader.seek(SeekFrom::Start(offset))?;
            self.byte_pos = offset;
            self.line_no = line_no - 1;
            self.next_record = index;
            return Ok(());
        }

        // Unknown offset: continue from the furthest known record.
        match self.offsets.last().copied() {
            Some((offset, line_no)) if self.next_record < self.offsets.len() => {
                self.reader.seek(SeekFrom::Start(offset))?;
                self.byte_pos = offset;
                self.line_no = line_no - 1;
                self.next_record = self.offsets.len() - 1;
            }
            None if self.next_record != 0 => self.rewind()?,
            _ => {}
        }
        while self.next_record < index {
            if !self.next_line()? {
                return Err(Error::msg(format!(
                    "{}: cannot seek to record {index}, source has {} records",
                    self.name, self.next_record
                )));
            }
        }
        Ok(())
    }

    fn position(&self) -> usize {
        self.next_record
    }

    fn count_records(&mut self) -> Result<usize> {
        self.rewind()?;
        while self.next_line()? {}
        let count = self.next_record;
        self.rewind()?;
        Ok(count)
    }
}

// OneLinePerFileSource — every record lives in its own file

/// Source for "one line per file" mode: `list` names one data file per line,
/// relative paths are resolved against the list's directory, and each data
/// file holds exactly one record line.
pub struct OneLinePerFileSource {
    name: String,
    files: Vec<PathBuf>,
    layout: RecordLayout,
    delimiters: Vec<char>,
    next: usize,
}

impl OneLinePerFileSource {
    pub fn open(list: impl AsRef<Path>, layout: RecordLayout, delimiters: &str) -> Result<Self> {
        let list = list.as_ref();
        let content = fs::read_to_string(list).map_err(|e| {
            Error::config(format!("cannot read file list {}: {e}", list.display()))
        })?;
        let base = list.parent().map(Path::to_path_buf).unwrap_or_default();
        let files = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                let p = PathBuf::from(l);
                if p.is_absolute() {
                    p
                } else {
                    base.join(p)
                }
            })
            .collect();
        Ok(Self {
            name: list.display().to_string(),
            files,
            layout,
            delimiters: delimiters.chars().collect(),
            next: 0,
        })
    }
}

impl RecordSource for OneLinePerFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_record(&mut self, record: &mut ParsedRecord) -> Result<bool> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(false);
        };
        let name = path.display().to_string();
        let content = fs::read_to_string(path)?;
        let (line_no, line) = content
            .lines()
            .enumerate()
            .find(|(_, l)| !l.trim().is_empty())
            .ok_or_else(|| Error::parse(&name, 1, "file holds no record"))?;
        parse_fields(
            line,
            &self.delimiters,
            &self.layout,
            &name,
            line_no + 1,
            record,
        )?;
        self.next += 1;
        Ok(true)
    }

    fn seek_record(&mut self, index: usize) -> Result<()> {
        if index > self.files.len() {
            return Err(Error::msg(format!(
                "{}: cannot seek to record {index}, source has {} records",
                self.name,
                self.files.len()
            )));
        }
        self.next = index;
        Ok(())
    }

    fn position(&self) -> usize {
        self.next
    }

    fn count_records(&mut self) -> Result<usize> {
        self.next = 0;
        Ok(self.files.len())
    }
}

// Tests
