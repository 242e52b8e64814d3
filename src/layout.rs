use crate::config::{Configuration, Names};
use std::path::{Path, PathBuf};

/// Every path a run reads or writes, derived from the configuration.
#[derive(Debug, Clone)]
pub struct Layout {
    main_dir: PathBuf,
    names: Names,
    trees: usize,
}

impl Layout {
    pub fn new(config: &Configuration) -> Self {
        let parent = config
            .parent_dir
            .clone()
            .or_else(|| config.database.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let main = config.main_directory.clone().unwrap_or_else(|| {
            config
                .database
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "forest".to_string())
        });
        Self {
            main_dir: parent.join(main),
            names: config.names.clone(),
            trees: config.trees_in_forest,
        }
    }

    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    pub fn preprocessed(&self) -> PathBuf {
        self.main_dir.join(&self.names.preprocessed)
    }

    pub fn header(&self) -> PathBuf {
        self.main_dir.join(&self.names.header)
    }

    pub fn train(&self) -> PathBuf {
        self.main_dir.join(&self.names.train)
    }

    pub fn test(&self) -> PathBuf {
        self.main_dir.join(&self.names.test)
    }

    pub fn subtrain_dir(&self) -> PathBuf {
        self.main_dir.join(&self.names.subtrain_dir)
    }

    pub fn reference(&self) -> PathBuf {
        self.subtrain_dir().join(&self.names.reference)
    }

    pub fn subtrain(&self) -> PathBuf {
        self.subtrain_dir().join(&self.names.subtrain)
    }

    pub fn tree_count(&self) -> usize {
        self.trees
    }

    /// Directory name of shard `index` (1-based), zero-padded to the width of
    /// the tree count.
    pub fn shard_name(&self, index: usize) -> String {
        let width = self.trees.to_string().len();
        self.names
            .shard_pattern
            .replacen("{}", &format!("{:0width$}", index, width = width), 1)
    }

    pub fn shard_names(&self) -> Vec<String> {
        (1..=self.trees).map(|i| self.shard_name(i)).collect()
    }

    pub fn shard_dir(&self, index: usize) -> PathBuf {
        self.subtrain_dir().join(self.shard_name(index))
    }

    pub fn shard_database(&self, index: usize) -> PathBuf {
        self.shard_dir(index).join(format!("{}.csv", self.shard_name(index)))
    }

    pub fn shard_databases(&self) -> Vec<PathBuf> {
        (1..=self.trees).map(|i| self.shard_database(i)).collect()
    }

    pub fn tree_output(&self, index: usize) -> PathBuf {
        self.shard_dir(index).join(&self.names.tree_output)
    }

    pub fn bool_vector(&self, index: usize, tnorm: &str) -> PathBuf {
        self.shard_dir(index).join(prefixed(&self.names.bool_prefix, tnorm))
    }

    pub fn membership_vector(&self, index: usize, tnorm: &str) -> PathBuf {
        self.shard_dir(index).join(prefixed(&self.names.membership_prefix, tnorm))
    }

    pub fn quality_vector(&self, index: usize, tnorm: &str) -> PathBuf {
        self.shard_dir(index).join(prefixed(&self.names.quality_prefix, tnorm))
    }

    pub fn difficulty_vector(&self, tnorm: &str) -> PathBuf {
        self.subtrain_dir().join(prefixed(&self.names.difficulty_prefix, tnorm))
    }

    pub fn forest_quality(&self, tnorm: &str) -> PathBuf {
        self.subtrain_dir().join(prefixed(&self.names.forest_quality_prefix, tnorm))
    }

    pub fn class_matrix_dir(&self, class: &str) -> PathBuf {
        self.main_dir
            .join(&self.names.classes_matrices_dir)
            .join(class_dir_name(class))
    }

    pub fn class_matrix(&self, class: &str, tnorm: &str) -> PathBuf {
        self.class_matrix_dir(class).join(prefixed(&self.names.matrix_prefix, tnorm))
    }

    pub fn clusters_dir(&self) -> PathBuf {
        self.main_dir.join(&self.names.clusters_dir)
    }

    pub fn cluster(&self, tnorm: &str) -> PathBuf {
        self.clusters_dir().join(format!("{}.csv", tnorm))
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.main_dir.join(&self.names.checkpoint)
    }

    pub fn statistics(&self) -> PathBuf {
        self.main_dir.join(&self.names.statistics)
    }
}

/// Class labels come from the data. Anything that could climb out of, nest
/// under, or hide in the matrices directory is written as `%XX`.
fn class_dir_name(class: &str) -> String {
    let mut name = String::with_capacity(class.len());
    for (i, byte) in class.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if plain {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    if name.is_empty() {
        name.push('%');
    }
    name
}

fn prefixed(prefix: &str, tnorm: &str) -> String {
    format!("{}{}.csv", prefix, tnorm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(trees: usize) -> Configuration {
        Configuration {
            database: PathBuf::from("/data/iris.csv"),
            trees_in_forest: trees,
            ..Configuration::default()
        }
    }

    #[test]
    fn test_main_dir_defaults_to_database_stem() {
        let layout = Layout::new(&config(3));
        assert_eq!(layout.main_dir(), Path::new("/data/iris"));
        assert_eq!(layout.reference(), PathBuf::from("/data/iris/subtrain/reference.csv"));
    }

    #[test]
    fn test_explicit_directories() {
        let mut c = config(3);
        c.parent_dir = Some(PathBuf::from("/out"));
        c.main_directory = Some("run1".to_string());
        assert_eq!(Layout::new(&c).main_dir(), Path::new("/out/run1"));
    }

    #[test]
    fn test_shard_names_are_zero_padded() {
        let layout = Layout::new(&config(12));
        assert_eq!(layout.shard_name(1), "01_sstrain");
        assert_eq!(layout.shard_name(12), "12_sstrain");
        assert_eq!(layout.shard_names().len(), 12);
        assert_eq!(
            layout.shard_database(3),
            PathBuf::from("/data/iris/subtrain/03_sstrain/03_sstrain.csv")
        );
        assert_eq!(
            layout.bool_vector(3, "zadeh"),
            PathBuf::from("/data/iris/subtrain/03_sstrain/bool_zadeh.csv")
        );
    }

    #[test]
    fn test_single_tree_has_no_padding() {
        let layout = Layout::new(&config(1));
        assert_eq!(layout.shard_name(1), "1_sstrain");
    }

    #[test]
    fn test_matrix_paths() {
        let layout = Layout::new(&config(2));
        assert_eq!(
            layout.class_matrix("setosa", "weber"),
            PathBuf::from("/data/iris/classes_matrices/setosa/matrix_weber.csv")
        );
        assert_eq!(layout.cluster("zadeh"), PathBuf::from("/data/iris/clusters/zadeh.csv"));
    }

    #[test]
    fn test_class_labels_stay_inside_matrices_dir() {
        let layout = Layout::new(&config(2));
        let matrices = PathBuf::from("/data/iris/classes_matrices");
        for class in ["../x", "a/b", "..", ".", "", "x\\y", "Iris-setosa.v2"] {
            let dir = layout.class_matrix_dir(class);
            assert_eq!(dir.parent(), Some(matrices.as_path()), "{:?}", class);
        }
        assert_eq!(layout.class_matrix_dir("../x"), matrices.join("%2E.%2Fx"));
        assert_eq!(layout.class_matrix_dir("a/b"), matrices.join("a%2Fb"));
        assert_eq!(layout.class_matrix_dir("Iris-setosa.v2"), matrices.join("Iris-setosa.v2"));
        assert_ne!(layout.class_matrix_dir("a/b"), layout.class_matrix_dir("a_b"));
    }
}
