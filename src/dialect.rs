use crate::ForestError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Character encoding of a delimited file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf8", alias = "utf-8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "latin1", alias = "iso-8859-1", alias = "ISO-8859-1")]
    Latin1,
}

impl Encoding {
    pub fn decode(self, bytes: Vec<u8>, path: &Path) -> Result<String, ForestError> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes).map_err(|e| ForestError::Encoding {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
            Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }

    pub fn encode(self, text: &str, path: &Path) -> Result<Vec<u8>, ForestError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| ForestError::Encoding {
                        path: path.to_path_buf(),
                        reason: format!("'{}' cannot be represented in latin1", c),
                    })
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineDelimiter {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl LineDelimiter {
    fn terminator(self) -> csv::Terminator {
        match self {
            LineDelimiter::Lf => csv::Terminator::Any(b'\n'),
            LineDelimiter::CrLf => csv::Terminator::CRLF,
            LineDelimiter::Cr => csv::Terminator::Any(b'\r'),
        }
    }
}

/// Quoting behaviour on write. `None` also disables quote handling on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quoting {
    #[default]
    Minimal,
    All,
    NonNumeric,
    None,
}

impl Quoting {
    fn style(self) -> csv::QuoteStyle {
        match self {
            Quoting::Minimal => csv::QuoteStyle::Necessary,
            Quoting::All => csv::QuoteStyle::Always,
            Quoting::NonNumeric => csv::QuoteStyle::NonNumeric,
            Quoting::None => csv::QuoteStyle::Never,
        }
    }
}

/// How a delimited table is laid out on disk. Resolved once per run and shared
/// by every reader and writer of that run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dialect {
    pub encoding: Encoding,
    pub delimiter: char,
    pub line_delimiter: LineDelimiter,
    pub quote_char: char,
    pub quoting: Quoting,
    pub skip_initial_space: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            delimiter: ',',
            line_delimiter: LineDelimiter::Lf,
            quote_char: '"',
            quoting: Quoting::Minimal,
            skip_initial_space: true,
        }
    }
}

impl Dialect {
    pub fn validate(&self) -> Result<(), ForestError> {
        ascii_byte(self.delimiter, "delimiter")?;
        ascii_byte(self.quote_char, "quote character")?;
        if self.delimiter == self.quote_char {
            return Err(ForestError::Configuration(format!(
                "delimiter and quote character are both '{}'",
                self.delimiter
            )));
        }
        Ok(())
    }

    pub(crate) fn reader_builder(&self) -> Result<csv::ReaderBuilder, ForestError> {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(false)
            .delimiter(ascii_byte(self.delimiter, "delimiter")?)
            .quote(ascii_byte(self.quote_char, "quote character")?)
            .quoting(self.quoting != Quoting::None);
        Ok(builder)
    }

    /// Delimiter byte, and the quote byte when quoting is honoured on read.
    pub(crate) fn field_bytes(&self) -> Result<(u8, Option<u8>), ForestError> {
        let delimiter = ascii_byte(self.delimiter, "delimiter")?;
        let quote = match self.quoting {
            Quoting::None => None,
            _ => Some(ascii_byte(self.quote_char, "quote character")?),
        };
        Ok((delimiter, quote))
    }

    pub(crate) fn writer_builder(&self) -> Result<csv::WriterBuilder, ForestError> {
        let mut builder = csv::WriterBuilder::new();
        builder
            .has_headers(false)
            .flexible(false)
            .delimiter(ascii_byte(self.delimiter, "delimiter")?)
            .quote(ascii_byte(self.quote_char, "quote character")?)
            .quote_style(self.quoting.style())
            .terminator(self.line_delimiter.terminator());
        Ok(builder)
    }
}

fn ascii_byte(c: char, what: &str) -> Result<u8, ForestError> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ForestError::Configuration(format!("{} '{}' must be a single ASCII character", what, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_round_trip() {
        let path = Path::new("memory");
        let bytes = Encoding::Latin1.encode("café", path).unwrap();
        assert_eq!(bytes, vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(Encoding::Latin1.decode(bytes, path).unwrap(), "café");
    }

    #[test]
    fn test_latin1_rejects_wide_chars() {
        let result = Encoding::Latin1.encode("€", Path::new("memory"));
        assert!(matches!(result, Err(ForestError::Encoding { .. })));
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let result = Encoding::Utf8.decode(vec![0xFF, 0xFE], Path::new("memory"));
        assert!(matches!(result, Err(ForestError::Encoding { .. })));
    }

    #[test]
    fn test_validate_rejects_shared_delimiter_and_quote() {
        let dialect = Dialect { quote_char: ',', ..Dialect::default() };
        assert!(dialect.validate().is_err());
        assert!(Dialect::default().validate().is_ok());
    }

    #[test]
    fn test_dialect_deserializes_with_defaults() {
        let dialect: Dialect = serde_json::from_str(r#"{"delimiter": ";", "encoding": "iso-8859-1"}"#).unwrap();
        assert_eq!(dialect.delimiter, ';');
        assert_eq!(dialect.encoding, Encoding::Latin1);
        assert_eq!(dialect.quote_char, '"');
        assert_eq!(dialect.line_delimiter, LineDelimiter::Lf);
    }
}
