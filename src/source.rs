//! Streaming record readers for the two source dialects.
//!
//! Delimited files start with a header line; each data line is split with
//! the [`Tokenizer`] and must have as many fields as the header. JSON-lines
//! files hold one object per line whose scalar values become raw strings.
//! Both are read lazily, one line at a time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{IngestError, RowError};
use crate::models::{RawRow, JOB_REFERENCE};
use crate::tokenize::Tokenizer;

/// One item from a reader: a fatal read error, or a row that may itself be
/// malformed.
pub type RecordItem = Result<Result<RawRow, RowError>, IngestError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Delimited(Tokenizer),
    JsonLines,
}

impl Dialect {
    /// `.jsonl` / `.ndjson` are JSON lines, anything else is delimited.
    pub fn for_path(path: &Path, delimiter: char) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jsonl" | "ndjson" => Dialect::JsonLines,
            _ => Dialect::Delimited(Tokenizer::new(delimiter)),
        }
    }
}

pub struct RecordReader<R: BufRead> {
    path: PathBuf,
    reader: R,
    buf: Vec<u8>,
    line_no: u64,
    dialect: Dialect,
    header: Vec<String>,
}

/// Open `path` and, for delimited files, consume its header line.
pub fn open_records(
    path: &Path,
    dialect: Dialect,
) -> Result<RecordReader<BufReader<File>>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    RecordReader::new(path, BufReader::new(file), dialect)
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(path: &Path, reader: R, dialect: Dialect) -> Result<Self, IngestError> {
        let mut rdr = Self {
            path: path.to_path_buf(),
            reader,
            buf: Vec::new(),
            line_no: 0,
            dialect,
            header: Vec::new(),
        };

        if let Dialect::Delimited(tokenizer) = dialect {
            while rdr.read_raw()? {
                let text = String::from_utf8_lossy(&rdr.buf).into_owned();
                let line = text.trim_start_matches('\u{feff}');
                if line.trim().is_empty() {
                    continue;
                }
                rdr.header = tokenizer
                    .parse_line(line)
                    .into_iter()
                    .map(|h| h.trim().to_ascii_uppercase())
                    .collect();
                if !rdr.header.iter().any(|h| h == JOB_REFERENCE) {
                    return Err(IngestError::MissingKeyColumn {
                        path: rdr.path.clone(),
                    });
                }
                break;
            }
        }

        Ok(rdr)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Read the next physical line into `buf` without its terminator.
    /// Returns `false` at end of input.
    fn read_raw(&mut self) -> Result<bool, IngestError> {
        self.buf.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|source| IngestError::Io {
                path: self.path.clone(),
                source,
            })?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        Ok(true)
    }

    /// Next line as text. Undecodable bytes reject only that line.
    fn next_line(&mut self) -> Result<Option<Result<String, RowError>>, IngestError> {
        if !self.read_raw()? {
            return Ok(None);
        }
        let decoded = String::from_utf8(std::mem::take(&mut self.buf))
            .map_err(|_| RowError::InvalidUtf8 { line: self.line_no });
        Ok(Some(decoded))
    }

    fn delimited_row(&self, tokenizer: &Tokenizer, line: &str) -> Result<RawRow, RowError> {
        let fields = tokenizer.parse_line(line);
        if fields.len() != self.header.len() {
            return Err(RowError::FieldCount {
                line: self.line_no,
                expected: self.header.len(),
                found: fields.len(),
            });
        }
        let mut row = RawRow::new(self.line_no);
        for (h, v) in self.header.iter().zip(fields) {
            row.push(h, v);
        }
        Ok(row)
    }

    fn json_row(&self, line: &str) -> Result<RawRow, RowError> {
        let not_object = |reason: String| RowError::NotAnObject {
            line: self.line_no,
            reason,
        };
        let value: Value = serde_json::from_str(line).map_err(|e| not_object(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(not_object("expected an object".to_string()));
        };
        let mut row = RawRow::new(self.line_no);
        for (key, v) in map {
            let raw = match v {
                Value::Null => String::new(),
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            row.push(&key, raw);
        }
        Ok(row)
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = RecordItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line() {
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(bad))) => return Some(Ok(Err(bad))),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            if line.trim().is_empty() {
                continue;
            }
            let row = match self.dialect {
                Dialect::Delimited(tokenizer) => self.delimited_row(&tokenizer, &line),
                Dialect::JsonLines => self.json_row(&line),
            };
            return Some(Ok(row));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str, dialect: Dialect) -> RecordReader<Cursor<Vec<u8>>> {
        RecordReader::new(
            Path::new("mem.csv"),
            Cursor::new(text.as_bytes().to_vec()),
            dialect,
        )
        .unwrap()
    }

    fn delimited() -> Dialect {
        Dialect::Delimited(Tokenizer::default())
    }

    #[test]
    fn test_dialect_from_extension() {
        assert_eq!(
            Dialect::for_path(Path::new("a/b.NDJSON"), ','),
            Dialect::JsonLines
        );
        assert_eq!(Dialect::for_path(Path::new("b.jsonl"), ','), Dialect::JsonLines);
        assert_eq!(
            Dialect::for_path(Path::new("b.tsv"), '\t'),
            Dialect::Delimited(Tokenizer::new('\t'))
        );
    }

    #[test]
    fn test_header_and_rows() {
        let text = "\u{feff}job_reference_fake,NB_TEU\r\nA,10\r\n\r\nB,\"7\"\r\n";
        let mut rdr = reader(text, delimited());
        assert_eq!(rdr.header(), &["JOB_REFERENCE_FAKE", "NB_TEU"]);

        let a = rdr.next().unwrap().unwrap().unwrap();
        assert_eq!(a.line, 2);
        assert_eq!(a.get("NB_TEU"), Some("10"));

        let b = rdr.next().unwrap().unwrap().unwrap();
        assert_eq!(b.line, 4);
        assert_eq!(b.get(JOB_REFERENCE), Some("B"));
        assert!(rdr.next().is_none());
    }

    #[test]
    fn test_field_count_mismatch_is_row_error() {
        let mut rdr = reader("JOB_REFERENCE_FAKE,NB_TEU\nA,1,extra\nB\n", delimited());
        let first = rdr.next().unwrap().unwrap();
        assert_eq!(
            first,
            Err(RowError::FieldCount {
                line: 2,
                expected: 2,
                found: 3
            })
        );
        assert!(rdr.next().unwrap().unwrap().is_err());
    }

    #[test]
    fn test_invalid_utf8_rejects_only_that_line() {
        let mut bytes = b"JOB_REFERENCE_FAKE,SEQ,NOTE\nA,1,ok\nB,1,caf".to_vec();
        bytes.extend_from_slice(&[0xE9]);
        bytes.extend_from_slice(b"\r\nC,1,ok\n");
        let mut rdr =
            RecordReader::new(Path::new("mem.csv"), Cursor::new(bytes), delimited()).unwrap();

        assert_eq!(rdr.next().unwrap().unwrap().unwrap().get(JOB_REFERENCE), Some("A"));
        assert_eq!(
            rdr.next().unwrap().unwrap(),
            Err(RowError::InvalidUtf8 { line: 3 })
        );
        let c = rdr.next().unwrap().unwrap().unwrap();
        assert_eq!(c.line, 4);
        assert_eq!(c.get("NOTE"), Some("ok"));
        assert!(rdr.next().is_none());
    }

    #[test]
    fn test_missing_key_column_fails_file() {
        let res = RecordReader::new(
            Path::new("bad.csv"),
            Cursor::new(b"NB_TEU,HAZ_FLAG\n1,true\n".to_vec()),
            delimited(),
        );
        assert!(matches!(res, Err(IngestError::MissingKeyColumn { .. })));
    }

    #[test]
    fn test_empty_file_has_no_rows() {
        let mut rdr = reader("", delimited());
        assert!(rdr.header().is_empty());
        assert!(rdr.next().is_none());
    }

    #[test]
    fn test_json_lines() {
        let text = concat!(
            r#"{"JOB_REFERENCE_FAKE":"A","NB_TEU":10,"HAZ_FLAG":true,"NET_WEIGHT":null}"#,
            "\n",
            "[1,2]\n",
            "not json\n",
        );
        let mut rdr = reader(text, Dialect::JsonLines);
        let a = rdr.next().unwrap().unwrap().unwrap();
        assert_eq!(a.get("NB_TEU"), Some("10"));
        assert_eq!(a.get("HAZ_FLAG"), Some("true"));
        assert_eq!(a.get("NET_WEIGHT"), Some(""));
        assert!(matches!(
            rdr.next().unwrap().unwrap(),
            Err(RowError::NotAnObject { line: 2, .. })
        ));
        assert!(matches!(
            rdr.next().unwrap().unwrap(),
            Err(RowError::NotAnObject { line: 3, .. })
        ));
    }
}
