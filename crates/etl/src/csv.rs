//! Minimal CSV reading and writing for the raw inputs and the persisted
//! star-schema tables.

use mmm_core::error::{MmmError, MmmResult};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Split a CSV line respecting quoted fields (handles commas inside quotes).
/// Returns owned strings because quoted fields need unquoting.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    // Escaped quote ("")
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Group physical lines into records, joining lines while a quoted field is
/// still open. Yields `(1-based start line, record text)`.
fn records(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, line) in text.lines().enumerate() {
        let (start, mut record) = match pending.take() {
            Some((start, mut record)) => {
                record.push('\n');
                (start, record)
            }
            None => (idx + 1, String::new()),
        };
        record.push_str(line);

        // "" escapes keep the count even, so odd means a field is still open.
        if record.matches('"').count() % 2 == 1 {
            pending = Some((start, record));
        } else {
            out.push((start, record));
        }
    }
    // Unterminated quote at end of input: keep what was read.
    out.extend(pending);
    out
}

/// Quote a field if it contains a delimiter, quote or line break.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// A parsed CSV file: normalized header plus data rows tagged with their
/// 1-based line number.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub name: String,
    header: Vec<String>,
    rows: Vec<(usize, Vec<String>)>,
}

impl CsvTable {
    /// Parse CSV text. Header names are trimmed and lower-cased; blank lines
    /// are skipped. A quoted field may span several lines; the record keeps
    /// the number of the line it starts on.
    pub fn parse(name: &str, text: &str) -> Self {
        let mut records = records(text).into_iter();
        let header = records
            .by_ref()
            .find(|(_, r)| !r.trim().is_empty())
            .map(|(_, r)| {
                split_line(r.trim_start_matches('\u{feff}'))
                    .into_iter()
                    .map(|h| h.trim().to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let rows = records
            .filter(|(_, r)| !r.trim().is_empty())
            .map(|(line, r)| (line, split_line(&r)))
            .collect();

        Self {
            name: name.to_string(),
            header,
            rows,
        }
    }

    /// Read a CSV file. A missing file is reported as `MissingInput`.
    pub fn read(name: &str, path: &Path) -> MmmResult<Self> {
        if !path.is_file() {
            return Err(MmmError::MissingInput {
                table: name.to_string(),
                path: path.to_path_buf(),
            });
        }

        let reader = BufReader::new(File::open(path)?);
        let mut text = String::new();
        for line in reader.lines() {
            text.push_str(&line?);
            text.push('\n');
        }
        Ok(Self::parse(name, &text))
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Resolve every required column or fail listing all that are missing.
    pub fn require(&self, columns: &[&str]) -> MmmResult<Vec<usize>> {
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| self.column(c).is_none())
            .map(|c| c.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(MmmError::SchemaMismatch {
                table: self.name.clone(),
                missing,
            });
        }

        Ok(columns.iter().filter_map(|c| self.column(c)).collect())
    }

    /// Data rows as `(line_number, fields)`.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows.iter().map(|(line, fields)| (*line, fields.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trimmed field at `idx`, empty when the row is short.
pub fn field(fields: &[String], idx: usize) -> &str {
    fields.get(idx).map(|f| f.trim()).unwrap_or("")
}

/// Write a header and rows to `path`, flushing before returning.
pub fn write_table<I>(path: &Path, header: &[&str], rows: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", header.join(","))?;
    for row in rows {
        let line: Vec<Cow<'_, str>> = row.iter().map(|f| escape_field(f)).collect();
        writeln!(writer, "{}", line.join(","))?;
    }
    writer.flush()
}
