use crate::dialect::{Dialect, Encoding, Quoting};
use crate::ForestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

pub type Row = Vec<String>;

/// A column addressed either by position or by header name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawColumnRef", into = "RawColumnRef")]
pub enum ColumnRef {
    Index(usize),
    Last,
    Name(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawColumnRef {
    Index(i64),
    Name(String),
}

impl TryFrom<RawColumnRef> for ColumnRef {
    type Error = String;

    fn try_from(raw: RawColumnRef) -> Result<Self, Self::Error> {
        match raw {
            RawColumnRef::Index(-1) => Ok(ColumnRef::Last),
            RawColumnRef::Index(i) if i >= 0 => Ok(ColumnRef::Index(i as usize)),
            RawColumnRef::Index(i) => Err(format!("column index {} is out of range", i)),
            RawColumnRef::Name(name) => Ok(ColumnRef::parse(&name)),
        }
    }
}

impl From<ColumnRef> for RawColumnRef {
    fn from(column: ColumnRef) -> Self {
        match column {
            ColumnRef::Index(i) => RawColumnRef::Index(i as i64),
            ColumnRef::Last => RawColumnRef::Index(-1),
            ColumnRef::Name(name) => RawColumnRef::Name(name),
        }
    }
}

impl ColumnRef {
    /// Integers are indices, `-1` is the last column, anything else a name.
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<i64>() {
            Ok(-1) => ColumnRef::Last,
            Ok(i) if i >= 0 => ColumnRef::Index(i as usize),
            _ => ColumnRef::Name(text.to_string()),
        }
    }

    pub fn resolve(&self, header: Option<&[String]>, width: usize, path: &Path) -> Result<usize, ForestError> {
        let missing = || ForestError::MissingColumn {
            path: path.to_path_buf(),
            column: self.to_string(),
        };
        match self {
            ColumnRef::Index(i) if *i < width => Ok(*i),
            ColumnRef::Index(_) => Err(missing()),
            ColumnRef::Last if width > 0 => Ok(width - 1),
            ColumnRef::Last => Err(missing()),
            ColumnRef::Name(name) => {
                let header = header.ok_or_else(|| ForestError::MissingHeader(path.to_path_buf()))?;
                header.iter().position(|h| h == name).ok_or_else(missing)
            }
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "{}", i),
            ColumnRef::Last => write!(f, "-1"),
            ColumnRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Drops the spaces that open a field, before its quote if it has one.
/// Spaces inside quotes are data and pass through.
struct SkipInitialSpace<R> {
    inner: R,
    delimiter: u8,
    quote: Option<u8>,
    in_quotes: bool,
    field_start: bool,
}

impl<R: Read> SkipInitialSpace<R> {
    fn new(inner: R, delimiter: u8, quote: Option<u8>) -> Self {
        Self {
            inner,
            delimiter,
            quote,
            in_quotes: false,
            field_start: true,
        }
    }
}

impl<R: Read> Read for SkipInitialSpace<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                let byte = buf[i];
                if self.field_start && !self.in_quotes && byte == b' ' {
                    continue;
                }
                self.field_start = false;
                if Some(byte) == self.quote {
                    // A doubled quote toggles twice.
                    self.in_quotes = !self.in_quotes;
                } else if !self.in_quotes && (byte == self.delimiter || byte == b'\n' || byte == b'\r') {
                    self.field_start = true;
                }
                buf[kept] = byte;
                kept += 1;
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Lazy row iterator over one delimited file. Each call to [`read_rows`]
/// re-opens the file, so a table can be walked as many times as needed.
pub struct Rows {
    records: csv::StringRecordsIntoIter<Box<dyn Read>>,
}

impl Iterator for Rows {
    type Item = Result<Row, ForestError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(
            record
                .map(|record| record.iter().map(str::to_string).collect())
                .map_err(ForestError::from),
        )
    }
}

pub fn read_rows(path: &Path, dialect: &Dialect) -> Result<Rows, ForestError> {
    let source: Box<dyn Read> = match dialect.encoding {
        Encoding::Utf8 => Box::new(BufReader::new(File::open(path)?)),
        encoding => {
            let text = encoding.decode(fs::read(path)?, path)?;
            Box::new(Cursor::new(text.into_bytes()))
        }
    };
    let source: Box<dyn Read> = if dialect.skip_initial_space {
        let (delimiter, quote) = dialect.field_bytes()?;
        Box::new(SkipInitialSpace::new(source, delimiter, quote))
    } else {
        source
    };
    let reader = dialect.reader_builder()?.from_reader(source);
    Ok(Rows {
        records: reader.into_records(),
    })
}

/// Buffers rows and writes the whole file on [`TableWriter::finish`].
pub struct TableWriter {
    path: PathBuf,
    dialect: Dialect,
    bytes: Vec<u8>,
    writer: csv::Writer<Vec<u8>>,
    /// Rows with a field opening on a space, which a reader skipping initial
    /// spaces would otherwise lose.
    quoted: Option<csv::Writer<Vec<u8>>>,
    rows: usize,
}

impl TableWriter {
    pub fn new(path: &Path, dialect: &Dialect) -> Result<Self, ForestError> {
        let quoted = if dialect.skip_initial_space && dialect.quoting != Quoting::None {
            Some(
                dialect
                    .writer_builder()?
                    .quote_style(csv::QuoteStyle::Always)
                    .from_writer(Vec::new()),
            )
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            dialect: dialect.clone(),
            bytes: Vec::new(),
            writer: dialect.writer_builder()?.from_writer(Vec::new()),
            quoted,
            rows: 0,
        })
    }

    pub fn write_row<I>(&mut self, row: I) -> Result<(), ForestError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let fields: Vec<I::Item> = row.into_iter().collect();
        let opens_on_space = fields.iter().any(|f| f.as_ref().first() == Some(&b' '));
        let writer = match &mut self.quoted {
            Some(quoted) if opens_on_space => quoted,
            _ => &mut self.writer,
        };
        writer.write_record(&fields)?;
        writer.flush()?;
        self.bytes.append(writer.get_mut());
        self.rows += 1;
        Ok(())
    }

    /// Returns the number of rows written.
    pub fn finish(self) -> Result<usize, ForestError> {
        let bytes = self.bytes;
        let bytes = match self.dialect.encoding {
            Encoding::Utf8 => bytes,
            encoding => {
                let text = String::from_utf8(bytes).map_err(|e| ForestError::Encoding {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;
                encoding.encode(&text, &self.path)?
            }
        };
        fs::write(&self.path, bytes)?;
        Ok(self.rows)
    }
}

pub fn write_rows<R, I>(path: &Path, dialect: &Dialect, rows: R) -> Result<usize, ForestError>
where
    R: IntoIterator<Item = I>,
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut writer = TableWriter::new(path, dialect)?;
    for row in rows {
        writer.write_row(row)?;
    }
    writer.finish()
}

/// Reads a whole table, splitting off the first row when `has_header` is set.
pub fn read_table(path: &Path, has_header: bool, dialect: &Dialect) -> Result<(Option<Row>, Vec<Row>), ForestError> {
    let mut rows = read_rows(path, dialect)?.collect::<Result<Vec<_>, _>>()?;
    let header = if has_header && !rows.is_empty() {
        Some(rows.remove(0))
    } else {
        None
    };
    Ok((header, rows))
}

pub fn read_header(path: &Path, dialect: &Dialect) -> Result<Option<Row>, ForestError> {
    read_rows(path, dialect)?.next().transpose()
}

pub fn count_rows(path: &Path, has_header: bool, dialect: &Dialect) -> Result<usize, ForestError> {
    let mut count: usize = 0;
    for row in read_rows(path, dialect)? {
        row?;
        count += 1;
    }
    Ok(if has_header { count.saturating_sub(1) } else { count })
}

pub fn get_column(path: &Path, column: &ColumnRef, has_header: bool, dialect: &Dialect) -> Result<Vec<String>, ForestError> {
    Ok(get_columns(path, std::slice::from_ref(column), has_header, dialect)?
        .into_iter()
        .map(|mut row| row.remove(0))
        .collect())
}

/// Returns, for every data row, the requested fields in the requested order.
pub fn get_columns(path: &Path, columns: &[ColumnRef], has_header: bool, dialect: &Dialect) -> Result<Vec<Row>, ForestError> {
    let mut rows = read_rows(path, dialect)?;
    let header = if has_header { rows.next().transpose()? } else { None };

    let mut indices: Option<Vec<usize>> = None;
    let mut selected = Vec::new();
    for row in rows {
        let row = row?;
        if indices.is_none() {
            indices = Some(
                columns
                    .iter()
                    .map(|c| c.resolve(header.as_deref(), row.len(), path))
                    .collect::<Result<Vec<_>, _>>()?,
            );
        }
        if let Some(indices) = &indices {
            selected.push(indices.iter().map(|&i| row[i].clone()).collect());
        }
    }

    // Name lookups must fail even on an empty table.
    if indices.is_none() {
        let width = header.as_ref().map_or(0, |h| h.len());
        for column in columns {
            if let ColumnRef::Name(_) = column {
                column.resolve(header.as_deref(), width, path)?;
            }
        }
    }
    Ok(selected)
}
