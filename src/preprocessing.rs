use crate::config::Configuration;
use crate::dialect::Dialect;
use crate::layout::Layout;
use crate::table::{self, ColumnRef, Row, TableWriter};
use crate::ForestError;
use itertools::Itertools;
use std::path::Path;
use tracing::info;

/// Header name of a synthesized identifier column.
pub const IDENTIFIER_HEADER: &str = "ID";

#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub rows: usize,
    /// Reordered header, when the input had one.
    pub header: Option<Row>,
    pub classes: Vec<String>,
}

/// Column order of the normalized table: identifier first, class last,
/// everything else in its original order.
#[derive(Debug, Clone, PartialEq)]
struct ColumnPlan {
    identifier: Option<usize>,
    class: usize,
    rest: Vec<usize>,
}

impl ColumnPlan {
    fn resolve(config: &Configuration, header: Option<&[String]>, width: usize, path: &Path) -> Result<Self, ForestError> {
        let class = config.class_column.resolve(header, width, path)?;
        let identifier = config
            .identifier
            .as_ref()
            .map(|c| c.resolve(header, width, path))
            .transpose()?;
        if identifier == Some(class) {
            return Err(ForestError::Configuration(format!(
                "identifier column {} is also the class column",
                class
            )));
        }
        let rest = (0..width).filter(|i| *i != class && Some(*i) != identifier).collect();
        Ok(Self { identifier, class, rest })
    }

    fn apply(&self, row: &[String], synthesized_id: impl FnOnce() -> String) -> Row {
        let mut out = Vec::with_capacity(self.rest.len() + 2);
        out.push(match self.identifier {
            Some(i) => row[i].clone(),
            None => synthesized_id(),
        });
        out.extend(self.rest.iter().map(|&i| row[i].clone()));
        out.push(row[self.class].clone());
        out
    }
}

/// Transcodes the input database into the output dialect with the identifier
/// column first and the class column last. The header, if any, goes to its
/// own file and the preprocessed database is header-less.
pub fn preprocess(config: &Configuration, layout: &Layout) -> Result<Preprocessed, ForestError> {
    let source = &config.database;
    let mut rows = table::read_rows(source, &config.input_dialect)?.peekable();

    let header = if config.has_header {
        Some(rows.next().transpose()?.ok_or_else(|| ForestError::MissingHeader(source.to_path_buf()))?)
    } else {
        None
    };

    let width = match (&header, rows.peek()) {
        (Some(h), _) => h.len(),
        (None, Some(Ok(row))) => row.len(),
        (None, _) => 0,
    };
    let plan = ColumnPlan::resolve(config, header.as_deref(), width, source)?;

    std::fs::create_dir_all(layout.main_dir())?;
    let mut writer = TableWriter::new(&layout.preprocessed(), &config.output_dialect)?;
    let mut classes = Vec::new();
    for (index, row) in rows.enumerate() {
        let row = plan.apply(&row?, || index.to_string());
        if let Some(class) = row.last() {
            classes.push(class.clone());
        }
        writer.write_row(&row)?;
    }
    let count = writer.finish()?;

    let header = header.map(|h| plan.apply(&h, || IDENTIFIER_HEADER.to_string()));
    if let Some(h) = &header {
        table::write_rows(&layout.header(), &config.output_dialect, std::iter::once(h))?;
    }

    let classes: Vec<String> = classes.into_iter().sorted().dedup().collect();
    info!(
        "[preprocess] {} rows, {} classes written to {}",
        count,
        classes.len(),
        layout.preprocessed().display()
    );
    Ok(Preprocessed {
        rows: count,
        header,
        classes,
    })
}

/// Sorted distinct values of the last column of a header-less database.
pub fn possible_classes(database: &Path, dialect: &Dialect) -> Result<Vec<String>, ForestError> {
    Ok(table::get_column(database, &ColumnRef::Last, false, dialect)?
        .into_iter()
        .sorted()
        .dedup()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Encoding;
    use std::fs;
    use std::path::PathBuf;

    fn setup(contents: &[u8], config: impl FnOnce(&mut Configuration)) -> (tempfile::TempDir, Configuration, Layout) {
        let temp_dir = tempfile::tempdir().unwrap();
        let database = temp_dir.path().join("data.csv");
        fs::write(&database, contents).unwrap();
        let mut c = Configuration {
            database,
            ..Configuration::default()
        };
        config(&mut c);
        let layout = Layout::new(&c);
        (temp_dir, c, layout)
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_synthesizes_identifiers() {
        let (_dir, config, layout) = setup(b"a,b,class\n1,2,X\n3,4,Y\n5,6,X\n", |_| {});
        let report = preprocess(&config, &layout).unwrap();

        assert_eq!(report.rows, 3);
        assert_eq!(report.classes, vec!["X", "Y"]);
        assert_eq!(read(layout.preprocessed()), "0,1,2,X\n1,3,4,Y\n2,5,6,X\n");
        assert_eq!(read(layout.header()), "ID,a,b,class\n");
    }

    #[test]
    fn test_moves_identifier_and_class() {
        let (_dir, config, layout) = setup(b"class;a;id\nX;1;10\nY;2;11\n", |c| {
            c.input_dialect.delimiter = ';';
            c.identifier = Some(ColumnRef::Name("id".to_string()));
            c.class_column = ColumnRef::Index(0);
        });
        let report = preprocess(&config, &layout).unwrap();

        assert_eq!(report.header, Some(vec!["id".to_string(), "a".to_string(), "class".to_string()]));
        assert_eq!(read(layout.preprocessed()), "10,1,X\n11,2,Y\n");
    }

    #[test]
    fn test_without_header() {
        let (_dir, config, layout) = setup(b"1,2,X\n3,4,Y\n", |c| c.has_header = false);
        let report = preprocess(&config, &layout).unwrap();
        assert_eq!(report.header, None);
        assert!(!layout.header().exists());
        assert_eq!(read(layout.preprocessed()), "0,1,2,X\n1,3,4,Y\n");
    }

    #[test]
    fn test_transcodes_latin1() {
        let (_dir, config, layout) = setup(b"name,class\ncaf\xe9,X\n", |c| c.input_dialect.encoding = Encoding::Latin1);
        preprocess(&config, &layout).unwrap();
        assert_eq!(read(layout.preprocessed()), "0,café,X\n");
    }

    #[test]
    fn test_unknown_class_column() {
        let (_dir, config, layout) = setup(b"a,b\n1,2\n", |c| c.class_column = ColumnRef::Name("class".to_string()));
        assert!(matches!(preprocess(&config, &layout), Err(ForestError::MissingColumn { .. })));
    }

    #[test]
    fn test_empty_database_with_header_flag() {
        let (_dir, config, layout) = setup(b"", |_| {});
        assert!(matches!(preprocess(&config, &layout), Err(ForestError::MissingHeader(_))));
    }

    #[test]
    fn test_possible_classes_from_preprocessed() {
        let (_dir, config, layout) = setup(b"a,class\n1,b\n2,a\n3,b\n", |_| {});
        preprocess(&config, &layout).unwrap();
        let classes = possible_classes(&layout.preprocessed(), &config.output_dialect).unwrap();
        assert_eq!(classes, vec!["a", "b"]);
    }
}
