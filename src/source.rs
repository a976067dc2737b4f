//! Input contracts for node ids and attribute values, and the tabular
//! (delimited text) readers that implement them.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::NodeId;

/// Something that yields `(id, parent)` pairs; the root is its own parent.
///
/// Any iterable of `Result<(NodeId, NodeId)>` is a source, so read errors
/// travel with the pairs.
pub trait IdSource {
    type Pairs: Iterator<Item = Result<(NodeId, NodeId)>>;

    fn pairs(self) -> Self::Pairs;
}

impl<I> IdSource for I
where
    I: IntoIterator<Item = Result<(NodeId, NodeId)>>,
{
    type Pairs = I::IntoIter;

    fn pairs(self) -> Self::Pairs {
        self.into_iter()
    }
}

/// Something that yields `(id, raw value)` pairs, possibly several per id.
pub trait AttributeSource {
    type Raw;
    type Values: Iterator<Item = Result<(NodeId, Self::Raw)>>;

    fn values(self) -> Self::Values;
}

impl<I, R> AttributeSource for I
where
    I: IntoIterator<Item = Result<(NodeId, R)>>,
{
    type Raw = R;
    type Values = I::IntoIter;

    fn values(self) -> Self::Values {
        self.into_iter()
    }
}

/// Collects a source, stopping at the first error.
pub fn collect_pairs<S: IdSource>(source: S) -> Result<Vec<(NodeId, NodeId)>> {
    source.pairs().collect()
}

/// Column layout of a delimited text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularFormat {
    pub separator: char,
    /// 0-based column of the node id.
    pub id_column: usize,
    /// 0-based column of the parent id (or of the attribute value).
    pub value_column: usize,
    /// Lines starting with this prefix are skipped.
    pub comment_prefix: String,
}

impl Default for TabularFormat {
    fn default() -> Self {
        Self {
            separator: '\t',
            id_column: 0,
            value_column: 1,
            comment_prefix: "#".to_string(),
        }
    }
}

/// Reads data lines and splits out the id and value columns.
struct Columns<R> {
    lines: Lines<R>,
    line_no: usize,
    format: TabularFormat,
}

impl<R: BufRead> Columns<R> {
    fn new(reader: R, format: TabularFormat) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            format,
        }
    }

    fn parse_error(&self, reason: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line_no,
            reason: reason.into(),
        }
    }

    fn parse_id(&self, field: &str) -> Result<NodeId> {
        field
            .trim()
            .parse()
            .map_err(|_| self.parse_error(format!("invalid node id {field:?}")))
    }

    /// The next `(id, value)` field pair, with the line number set for errors.
    fn next_fields(&mut self) -> Option<Result<(NodeId, String)>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let prefix = &self.format.comment_prefix;
            if line.trim().is_empty() || (!prefix.is_empty() && line.starts_with(prefix.as_str())) {
                continue;
            }

            let fields: Vec<&str> = line.split(self.format.separator).collect();
            let wanted = self.format.id_column.max(self.format.value_column) + 1;
            if fields.len() < wanted {
                return Some(Err(self.parse_error(format!(
                    "expected at least {wanted} columns, found {}",
                    fields.len()
                ))));
            }
            let value = fields[self.format.value_column].trim_end_matches('\r');
            return Some(
                self.parse_id(fields[self.format.id_column])
                    .map(|id| (id, value.to_string())),
            );
        }
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens a tabular file for reading, rejecting gzip-compressed input, which
/// would otherwise be split into garbage lines.
fn open_table(path: &Path) -> Result<BufReader<File>> {
    let mut reader = BufReader::new(File::open(path)?);
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        return Err(Error::InvalidFormat(format!(
            "{} is gzip-compressed; decompress it first",
            path.display()
        )));
    }
    Ok(reader)
}

/// `(id, parent)` pairs read from a delimited text file.
pub struct TabularIds<R = BufReader<File>> {
    columns: Columns<R>,
}

impl TabularIds {
    pub fn open(path: impl AsRef<Path>, format: TabularFormat) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading tabular ids");
        Ok(Self::from_reader(open_table(path)?, format))
    }
}

impl<R: BufRead> TabularIds<R> {
    pub fn from_reader(reader: R, format: TabularFormat) -> Self {
        Self {
            columns: Columns::new(reader, format),
        }
    }
}

impl<R: BufRead> Iterator for TabularIds<R> {
    type Item = Result<(NodeId, NodeId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let fields = self.columns.next_fields()?;
        Some(fields.and_then(|(id, parent)| Ok((id, self.columns.parse_id(&parent)?))))
    }
}

/// `(id, raw value)` pairs read from a delimited text file.
pub struct TabularValues<R = BufReader<File>> {
    columns: Columns<R>,
}

impl TabularValues {
    pub fn open(path: impl AsRef<Path>, format: TabularFormat) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading tabular attribute values");
        Ok(Self::from_reader(open_table(path)?, format))
    }
}

impl<R: BufRead> TabularValues<R> {
    pub fn from_reader(reader: R, format: TabularFormat) -> Self {
        Self {
            columns: Columns::new(reader, format),
        }
    }
}

impl<R: BufRead> Iterator for TabularValues<R> {
    type Item = Result<(NodeId, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.columns.next_fields()
    }
}
