use crate::dialect::Dialect;
use crate::result_parser::{parse_identifier, ClassificationRecord};
use crate::table::{self, ColumnRef, TableWriter};
use crate::tnorm::tnorm_name;
use crate::ForestError;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Decimal places kept when summing quality shares across trees.
pub const DIFFICULTY_PRECISION: i32 = 6;

pub const KEY_IDENTIFIER: &str = "ID";
pub const KEY_TRUE_CLASS: &str = "trueclass";

pub fn round_float(value: f64) -> f64 {
    let scale = 10f64.powi(DIFFICULTY_PRECISION);
    (value * scale).round() / scale
}

/// Whether one tree classified each instance correctly under one t-norm.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanVector {
    pub tnorm: String,
    pub entries: Vec<(u64, bool)>,
}

impl BooleanVector {
    pub fn accuracy(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let correct = self.entries.iter().filter(|(_, ok)| *ok).count();
        correct as f64 / self.entries.len() as f64
    }

    pub fn write(&self, path: &Path, dialect: &Dialect) -> Result<usize, ForestError> {
        table::write_rows(
            path,
            dialect,
            self.entries
                .iter()
                .map(|(id, ok)| [id.to_string(), if *ok { "1" } else { "0" }.to_string()]),
        )
    }

    pub fn read(tnorm: &str, path: &Path, dialect: &Dialect) -> Result<Self, ForestError> {
        let entries = read_pairs(path, dialect)?
            .into_iter()
            .map(|(id, flag)| match flag.as_str() {
                "1" => Ok((id, true)),
                "0" => Ok((id, false)),
                other => Err(ForestError::Reduction(format!(
                    "{}: \"{}\" is not a boolean flag",
                    path.display(),
                    other
                ))),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            tnorm: tnorm.to_string(),
            entries,
        })
    }
}

/// One boolean vector per t-norm. An instance counts as correct only when the
/// class with the highest degree is its true class; no answer counts as wrong.
pub fn correctness(records: &[ClassificationRecord], tnorm_count: usize) -> Vec<BooleanVector> {
    (0..tnorm_count)
        .map(|tnorm| BooleanVector {
            tnorm: tnorm_name(tnorm),
            entries: records
                .iter()
                .map(|r| (r.id, r.predicted(tnorm) == Some(r.true_class.as_str())))
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipRow {
    pub id: u64,
    pub true_class: String,
    /// Aligned with [`MembershipVector::classes`]; `None` when the tree never
    /// considered that class.
    pub degrees: Vec<Option<f64>>,
}

/// Every degree a tree reported under one t-norm, one column per class.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipVector {
    pub tnorm: String,
    pub classes: Vec<String>,
    pub rows: Vec<MembershipRow>,
}

impl MembershipVector {
    pub fn from_records(records: &[ClassificationRecord], tnorm: usize, classes: &[String]) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                let memberships = record.memberships(tnorm).unwrap_or_default();
                for m in memberships {
                    if !classes.contains(&m.class) {
                        warn!("[reducer] instance {} reports unknown class {}, ignored", record.id, m.class);
                    }
                }
                MembershipRow {
                    id: record.id,
                    true_class: record.true_class.clone(),
                    degrees: classes.iter().map(|c| record.degree_of(tnorm, c)).collect(),
                }
            })
            .collect();
        Self {
            tnorm: tnorm_name(tnorm),
            classes: classes.to_vec(),
            rows,
        }
    }

    pub fn degree(&self, row: &MembershipRow, class: &str) -> Option<f64> {
        let column = self.classes.iter().position(|c| c == class)?;
        row.degrees[column]
    }

    pub fn write(&self, path: &Path, dialect: &Dialect) -> Result<usize, ForestError> {
        let mut writer = TableWriter::new(path, dialect)?;
        let header = [KEY_IDENTIFIER, KEY_TRUE_CLASS]
            .into_iter()
            .map(str::to_string)
            .chain(self.classes.iter().cloned());
        writer.write_row(header)?;
        for row in &self.rows {
            let cells = [row.id.to_string(), row.true_class.clone()]
                .into_iter()
                .chain(row.degrees.iter().map(|d| d.map(|d| d.to_string()).unwrap_or_default()));
            writer.write_row(cells)?;
        }
        writer.finish().map(|rows| rows - 1)
    }

    pub fn read(tnorm: &str, path: &Path, dialect: &Dialect) -> Result<Self, ForestError> {
        let (header, rows) = table::read_table(path, true, dialect)?;
        let header = header.ok_or_else(|| ForestError::MissingHeader(path.to_path_buf()))?;
        if header.len() < 2 {
            return Err(ForestError::MissingColumn {
                path: path.to_path_buf(),
                column: KEY_TRUE_CLASS.to_string(),
            });
        }
        let malformed = |what: &str, value: &str| {
            ForestError::Reduction(format!("{}: {} \"{}\" is malformed", path.display(), what, value))
        };

        let rows = rows
            .into_iter()
            .map(|row| -> Result<MembershipRow, ForestError> {
                let id = parse_identifier(&row[0]).map_err(|_| malformed("identifier", &row[0]))?;
                let degrees = row[2..]
                    .iter()
                    .map(|cell| match cell.as_str() {
                        "" => Ok(None),
                        value => value.parse::<f64>().map(Some).map_err(|_| malformed("degree", value)),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(MembershipRow {
                    id,
                    true_class: row[1].clone(),
                    degrees,
                })
            })
            .collect::<Result<_, ForestError>>()?;

        Ok(Self {
            tnorm: tnorm.to_string(),
            classes: header[2..].to_vec(),
            rows,
        })
    }
}

/// Per-instance true-class share contributed by one tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QualityVector {
    pub entries: Vec<(u64, f64)>,
}

/// `true class degree / tree_count` for every instance. A tree that never
/// considered the true class contributes 0.
pub fn quality(vector: &MembershipVector, tree_count: usize) -> QualityVector {
    let trees = tree_count.max(1) as f64;
    let entries = vector
        .rows
        .iter()
        .map(|row| {
            let degree = vector.degree(row, &row.true_class).unwrap_or_else(|| {
                warn!(
                    "[reducer] no {} membership for instance {} of true class {}, counting 0",
                    vector.tnorm, row.id, row.true_class
                );
                0.0
            });
            (row.id, degree / trees)
        })
        .collect();
    QualityVector { entries }
}

/// Summed quality across trees for one t-norm.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DifficultyVector {
    pub entries: Vec<(u64, f64)>,
}

impl DifficultyVector {
    pub fn get(&self, id: u64) -> Option<f64> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, v)| *v)
    }
}

/// Element-wise sum of the quality vectors, rounded to
/// [`DIFFICULTY_PRECISION`] places. Instances keep their first-seen order.
pub fn difficulty(vectors: &[QualityVector]) -> DifficultyVector {
    let mut index: FxHashMap<u64, usize> = FxHashMap::default();
    let mut entries: Vec<(u64, f64)> = Vec::new();
    for vector in vectors {
        for &(id, value) in &vector.entries {
            match index.get(&id) {
                Some(&slot) => entries[slot].1 += value,
                None => {
                    index.insert(id, entries.len());
                    entries.push((id, value));
                }
            }
        }
    }
    for entry in &mut entries {
        entry.1 = round_float(entry.1);
    }
    DifficultyVector { entries }
}

macro_rules! float_vector_io {
    ($ty:ty) => {
        impl $ty {
            pub fn write(&self, path: &Path, dialect: &Dialect) -> Result<usize, ForestError> {
                table::write_rows(
                    path,
                    dialect,
                    self.entries.iter().map(|(id, value)| [id.to_string(), value.to_string()]),
                )
            }

            pub fn read(path: &Path, dialect: &Dialect) -> Result<Self, ForestError> {
                let entries = read_pairs(path, dialect)?
                    .into_iter()
                    .map(|(id, value)| {
                        value.parse::<f64>().map(|v| (id, v)).map_err(|_| {
                            ForestError::Reduction(format!("{}: \"{}\" is not a number", path.display(), value))
                        })
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Self { entries })
            }
        }
    };
}

float_vector_io!(QualityVector);
float_vector_io!(DifficultyVector);

fn read_pairs(path: &Path, dialect: &Dialect) -> Result<Vec<(u64, String)>, ForestError> {
    table::read_rows(path, dialect)?
        .map(|row| -> Result<(u64, String), ForestError> {
            let row = row?;
            if row.len() != 2 {
                return Err(ForestError::Reduction(format!(
                    "{}: expected 2 fields, found {}",
                    path.display(),
                    row.len()
                )));
            }
            let id = parse_identifier(&row[0])
                .map_err(|reason| ForestError::Reduction(format!("{}: {}", path.display(), reason)))?;
            Ok((id, row[1].clone()))
        })
        .collect()
}

/// Tree × instance grid of membership degrees for one class and one t-norm.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMatrix {
    pub class: String,
    pub tnorm: String,
    pub identifiers: Vec<String>,
    /// `(tree name, one degree per identifier)`.
    pub rows: Vec<(String, Vec<String>)>,
}

impl ClassMatrix {
    pub fn write(&self, path: &Path, dialect: &Dialect) -> Result<usize, ForestError> {
        let mut writer = TableWriter::new(path, dialect)?;
        writer.write_row(std::iter::once(KEY_IDENTIFIER).chain(self.identifiers.iter().map(String::as_str)))?;
        for (tree, cells) in &self.rows {
            writer.write_row(std::iter::once(tree.as_str()).chain(cells.iter().map(String::as_str)))?;
        }
        writer.finish()
    }
}

/// Builds the class matrix of `class` under `tnorm`. `trees` pairs each tree
/// name with its membership vector file; columns follow `identifiers`.
pub fn class_matrix(
    class: &str,
    tnorm: &str,
    trees: &[(String, PathBuf)],
    identifiers: &[String],
    dialect: &Dialect,
) -> Result<ClassMatrix, ForestError> {
    let keys = identifiers
        .iter()
        .map(|id| parse_identifier(id).map_err(ForestError::Reduction))
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(trees.len());
    for (tree, path) in trees {
        let columns = [ColumnRef::Index(0), ColumnRef::Name(class.to_string())];
        let degrees: FxHashMap<u64, String> = table::get_columns(path, &columns, true, dialect)?
            .into_iter()
            .map(|mut pair| -> Result<(u64, String), ForestError> {
                let degree = pair.pop().unwrap_or_default();
                let id = parse_identifier(&pair[0]).map_err(ForestError::Reduction)?;
                Ok((id, if degree.is_empty() { "0".to_string() } else { degree }))
            })
            .collect::<Result<_, ForestError>>()?;

        let cells = keys
            .iter()
            .map(|key| {
                degrees.get(key).cloned().ok_or_else(|| {
                    ForestError::Reduction(format!("tree {} has no result for instance {}", tree, key))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push((tree.clone(), cells));
    }

    Ok(ClassMatrix {
        class: class.to_string(),
        tnorm: tnorm.to_string(),
        identifiers: identifiers.to_vec(),
        rows,
    })
}
