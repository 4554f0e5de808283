//! The RECORD manifest.
//!
//! RECORD is CSV without a header: `path,hash-spec,size`, one row per
//! archive member. Fields are quoted only when they contain a comma, a
//! double quote or a line break; embedded quotes are doubled. Rows end with
//! a bare `\n`.

use crate::error::FormatError;
use crate::hash::EntryHash;

/// One RECORD row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    /// Forward-slash path relative to the archive root.
    pub path: String,
    /// Digest, symlink target, or nothing (RECORD's own row).
    pub hash: EntryHash,
    /// Byte length of the stored content; absent for RECORD itself and symlinks.
    pub size: Option<u64>,
}

impl RecordRow {
    /// Row for a regular file with the given stored bytes.
    pub fn file(path: impl Into<String>, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            hash: EntryHash::Sha256(crate::hash::RecordHash::compute(data)),
            size: Some(data.len() as u64),
        }
    }

    /// Row for a symlink pointing at `target`.
    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: EntryHash::Symlink(target.into()),
            size: None,
        }
    }

    /// The RECORD's own row, with empty hash and size.
    pub fn own(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: EntryHash::None,
            size: None,
        }
    }
}

/// An ordered RECORD manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    rows: Vec<RecordRow>,
}

impl Record {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row.
    pub fn push(&mut self, row: RecordRow) {
        self.rows.push(row);
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[RecordRow] {
        &self.rows
    }

    /// Look up the row for `path`.
    pub fn get(&self, path: &str) -> Option<&RecordRow> {
        self.rows.iter().find(|row| row.path == path)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize to CSV text.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let size = row.size.map(|s| s.to_string()).unwrap_or_default();
            push_field(&mut out, &row.path);
            out.push(',');
            push_field(&mut out, &row.hash.to_string());
            out.push(',');
            push_field(&mut out, &size);
            out.push('\n');
        }
        out
    }

    /// Parse CSV text produced by [`Record::to_csv`] or any conforming writer.
    ///
    /// Both `\n` and `\r\n` row terminators are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if a row does not have three columns, a quoted field
    /// is unterminated, or a hash/size column is malformed.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut record = Self::new();
        for (index, fields) in split_rows(text)?.into_iter().enumerate() {
            let row_no = index + 1;
            let [path, hash, size]: [String; 3] =
                fields
                    .try_into()
                    .map_err(|fields: Vec<String>| FormatError::RecordColumns {
                        row: row_no,
                        columns: fields.len(),
                    })?;
            let size = if size.is_empty() {
                None
            } else {
                Some(size.parse().map_err(|_| FormatError::InvalidValue {
                    field: "size",
                    value: size.clone(),
                })?)
            };
            record.push(RecordRow {
                path,
                hash: EntryHash::parse(&hash)?,
                size,
            });
        }
        Ok(record)
    }
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn split_rows(text: &str) -> Result<Vec<Vec<String>>, FormatError> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut fields));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(FormatError::UnterminatedQuote(rows.len() + 1));
    }
    // Final row without trailing newline
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        rows.push(fields);
    }
    Ok(rows)
}
