use crate::dialect::Dialect;
use crate::table::{self, ColumnRef, Row, TableWriter};
use crate::ForestError;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SplitMethod {
    /// First `limit` rows to the first destination, the rest to the others.
    EvenSplit,
    /// Per-class proportional allocation.
    Stratified,
}

impl TryFrom<String> for SplitMethod {
    type Error = ForestError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<SplitMethod> for String {
    fn from(method: SplitMethod) -> Self {
        method.to_string()
    }
}

impl FromStr for SplitMethod {
    type Err = ForestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "halfing" | "even" | "even_split" => Ok(SplitMethod::EvenSplit),
            "keepdistribution" | "stratified" | "keep_distribution" => Ok(SplitMethod::Stratified),
            _ => Err(ForestError::UnknownSplittingMethod(s.to_string())),
        }
    }
}

impl fmt::Display for SplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMethod::EvenSplit => write!(f, "halfing"),
            SplitMethod::Stratified => write!(f, "keepdistribution"),
        }
    }
}

/// A configured split size: an absolute row count or a proportion of the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitValue {
    Absolute(u64),
    Proportion(f64),
}

impl SplitValue {
    pub fn validate(&self) -> Result<(), ForestError> {
        match *self {
            SplitValue::Proportion(p) if !(0.0..=1.0).contains(&p) => Err(ForestError::InvalidProportion(p)),
            _ => Ok(()),
        }
    }

    pub fn row_limit(&self, total_rows: usize) -> Result<RowLimit, ForestError> {
        self.validate()?;
        match *self {
            SplitValue::Proportion(p) => Ok(RowLimit {
                rows: (total_rows as f64 * p).round() as usize,
                ratio: p,
            }),
            SplitValue::Absolute(n) => {
                let rows = n as usize;
                if rows > total_rows {
                    return Err(ForestError::InvalidRowLimit { limit: rows, total: total_rows });
                }
                let ratio = if total_rows == 0 { 0.0 } else { rows as f64 / total_rows as f64 };
                Ok(RowLimit { rows, ratio })
            }
        }
    }
}

/// Rows owed to the first destination. `ratio` drives the per-class
/// allocation of stratified splits, `rows` the cut of even splits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowLimit {
    pub rows: usize,
    pub ratio: f64,
}

/// Rows allocated to the first destination for one class bucket.
/// Rounds half away from zero, so each class can drift by at most half a row.
pub fn stratified_share(bucket_size: usize, ratio: f64) -> usize {
    ((bucket_size as f64 * ratio).round() as usize).min(bucket_size)
}

/// Destination (0 or 1) of every row, given its class label.
/// The first `stratified_share` rows of each class, in source order, go to 0.
pub fn stratified_assignment<S: AsRef<str>>(classes: &[S], ratio: f64) -> Vec<usize> {
    let buckets = bucket_by_class(classes);
    let mut assignment = vec![1; classes.len()];
    for bucket in &buckets {
        let give = stratified_share(bucket.len(), ratio);
        for &row in &bucket[..give] {
            assignment[row] = 0;
        }
    }
    assignment
}

/// Destination (0..n) of every row. Each class bucket is dealt round-robin and
/// the rotation carries over between buckets, so sizes differ by at most one.
pub fn round_robin_assignment<S: AsRef<str>>(classes: &[S], n: usize) -> Vec<usize> {
    let mut assignment = vec![0; classes.len()];
    let mut offset = 0;
    for bucket in bucket_by_class(classes) {
        for (j, &row) in bucket.iter().enumerate() {
            assignment[row] = (offset + j) % n;
        }
        offset = (offset + bucket.len()) % n;
    }
    assignment
}

/// Row indices grouped by class, buckets in first-seen order.
fn bucket_by_class<S: AsRef<str>>(classes: &[S]) -> Vec<Vec<usize>> {
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (row, class) in classes.iter().enumerate() {
        let bucket = *index.entry(class.as_ref()).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[bucket].push(row);
    }
    buckets
}

/// Splits delimited tables into disjoint destination tables.
pub struct Splitter<'a> {
    dialect: &'a Dialect,
    has_header: bool,
}

impl<'a> Splitter<'a> {
    pub fn new(dialect: &'a Dialect, has_header: bool) -> Self {
        Splitter { dialect, has_header }
    }

    /// Two-way split. Returns the row counts of `(first, second)`.
    pub fn split2(
        &self,
        source: &Path,
        limit: RowLimit,
        method: SplitMethod,
        class_column: &ColumnRef,
        first: &Path,
        second: &Path,
    ) -> Result<(usize, usize), ForestError> {
        let destinations = [first.to_path_buf(), second.to_path_buf()];
        let counts = match method {
            SplitMethod::EvenSplit => self.even_split2(source, limit.rows, &destinations)?,
            SplitMethod::Stratified => {
                self.assigned_split(source, class_column, &destinations, |classes| {
                    stratified_assignment(classes, limit.ratio)
                })?
            }
        };
        debug!(
            "[splitter] {} -> {} ({} rows), {} ({} rows)",
            source.display(),
            first.display(),
            counts[0],
            second.display(),
            counts[1]
        );
        Ok((counts[0], counts[1]))
    }

    /// N-way split over `destinations`. Returns the row count of each one.
    pub fn split_many(
        &self,
        source: &Path,
        method: SplitMethod,
        class_column: &ColumnRef,
        destinations: &[PathBuf],
    ) -> Result<Vec<usize>, ForestError> {
        if destinations.is_empty() {
            return Err(ForestError::Configuration("a split needs at least one destination".to_string()));
        }
        let n = destinations.len();
        match method {
            SplitMethod::EvenSplit => self.round_robin_split(source, destinations),
            SplitMethod::Stratified => {
                self.assigned_split(source, class_column, destinations, |classes| round_robin_assignment(classes, n))
            }
        }
    }

    fn open_destinations(&self, header: Option<&Row>, destinations: &[PathBuf]) -> Result<Vec<TableWriter>, ForestError> {
        destinations
            .iter()
            .map(|path| {
                let mut writer = TableWriter::new(path, self.dialect)?;
                if let Some(header) = header {
                    writer.write_row(header)?;
                }
                Ok(writer)
            })
            .collect()
    }

    fn finish(writers: Vec<TableWriter>, header: bool) -> Result<Vec<usize>, ForestError> {
        writers
            .into_iter()
            .map(|w| w.finish().map(|rows| if header { rows - 1 } else { rows }))
            .collect()
    }

    fn read_header(&self, rows: &mut table::Rows) -> Result<Option<Row>, ForestError> {
        if self.has_header { rows.next().transpose() } else { Ok(None) }
    }

    fn even_split2(&self, source: &Path, limit: usize, destinations: &[PathBuf]) -> Result<Vec<usize>, ForestError> {
        let mut rows = table::read_rows(source, self.dialect)?;
        let header = self.read_header(&mut rows)?;
        let mut writers = self.open_destinations(header.as_ref(), destinations)?;
        for (index, row) in rows.enumerate() {
            let target = if index < limit { 0 } else { 1 };
            writers[target].write_row(&row?)?;
        }
        let counts = Self::finish(writers, header.is_some())?;
        if counts[0] < limit {
            return Err(ForestError::InvalidRowLimit { limit, total: counts[0] + counts[1] });
        }
        Ok(counts)
    }

    fn round_robin_split(&self, source: &Path, destinations: &[PathBuf]) -> Result<Vec<usize>, ForestError> {
        let mut rows = table::read_rows(source, self.dialect)?;
        let header = self.read_header(&mut rows)?;
        let mut writers = self.open_destinations(header.as_ref(), destinations)?;
        let n = writers.len();
        for (index, row) in rows.enumerate() {
            writers[index % n].write_row(&row?)?;
        }
        Self::finish(writers, header.is_some())
    }

    /// Materializes the table, asks `assign` for a destination per row
    /// (given the class labels) and writes each destination in source order.
    fn assigned_split<F>(
        &self,
        source: &Path,
        class_column: &ColumnRef,
        destinations: &[PathBuf],
        assign: F,
    ) -> Result<Vec<usize>, ForestError>
    where
        F: FnOnce(&[&str]) -> Vec<usize>,
    {
        let (header, rows) = table::read_table(source, self.has_header, self.dialect)?;
        if rows.is_empty() {
            let writers = self.open_destinations(header.as_ref(), destinations)?;
            return Self::finish(writers, header.is_some());
        }
        let width = rows.first().or(header.as_ref()).map_or(0, |r| r.len());
        let class_index = class_column.resolve(header.as_deref(), width, source)?;

        let classes: Vec<&str> = rows.iter().map(|row| row[class_index].as_str()).collect();
        let assignment = assign(&classes);

        let mut writers = self.open_destinations(header.as_ref(), destinations)?;
        for (row, target) in rows.iter().zip(assignment) {
            writers[target].write_row(row)?;
        }
        Self::finish(writers, header.is_some())
    }
}
