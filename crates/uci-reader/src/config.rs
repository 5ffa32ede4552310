// ReaderConfig — static configuration of a UciReader
//
// Everything here is fixed at construction time. Per-epoch parameters
// (minibatch size, epoch number, epoch size) are passed to
// `start_minibatch_loop` instead.
//
// The struct can be built in code with the chained setters or decoded from an
// external config object with serde (camelCase keys):
//
//   {
//     "file": "data/iris.txt",
//     "featureDim": 4,
//     "labelType": "Category",
//     "labelDim": 3,
//     "randomize": "Auto",
//     "partialMinibatch": false
//   }

use std::path::{Path, PathBuf};

use serde::Deserialize;

use uci_core::{Error, Result};

/// How the label column(s) of a record are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LabelKind {
    /// No labels are read.
    None,
    /// Categorical labels, mapped to integer IDs and emitted one-hot.
    #[default]
    Category,
    /// Numeric regression targets, emitted verbatim.
    Regression,
    /// Any other numeric label, emitted verbatim like regression.
    Other,
}

impl LabelKind {
    /// Whether labels of this kind go through the label mapper.
    pub fn is_categorical(&self) -> bool {
        matches!(self, LabelKind::Category)
    }

    /// Whether labels are stored as raw numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, LabelKind::Regression | LabelKind::Other)
    }
}

/// Sample-order randomization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RandomizeRepr")]
pub enum Randomize {
    /// Source order, no permutation.
    #[default]
    None,
    /// Permute across the whole dataset.
    Auto,
    /// Permute within consecutive windows of this many samples.
    Window(usize),
}

impl Randomize {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Randomize::None)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RandomizeRepr {
    Named(String),
    Window(usize),
}

impl TryFrom<RandomizeRepr> for Randomize {
    type Error = String;

    fn try_from(repr: RandomizeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            RandomizeRepr::Window(0) => Ok(Randomize::None),
            RandomizeRepr::Window(n) => Ok(Randomize::Window(n)),
            RandomizeRepr::Named(s) => match s.as_str() {
                "None" | "none" => Ok(Randomize::None),
                "Auto" | "auto" => Ok(Randomize::Auto),
                other => other
                    .parse::<usize>()
                    .map(|n| if n == 0 { Randomize::None } else { Randomize::Window(n) })
                    .map_err(|_| format!("randomize must be None, Auto or a window size, got {other:?}")),
            },
        }
    }
}

/// Cache settings. When the file at `path` exists and matches the minibatch
/// loop, minibatches are replayed from it; a file that does not match is left
/// alone and the loop is read live. The cache is built once, from the first
/// complete epoch read live, when no cache file exists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub path: PathBuf,
}

/// Configuration for a [`UciReader`](crate::UciReader).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderConfig {
    /// Data file, or with `one_line_per_file` a file listing one path per line.
    pub file: PathBuf,
    pub label_type: LabelKind,
    pub randomize: Randomize,
    /// Emit a short final minibatch instead of ending the epoch early.
    pub partial_minibatch: bool,
    /// Output stream name for features.
    pub feature_section: String,
    /// First feature column (0-based).
    pub feature_start: usize,
    /// Number of feature columns.
    pub feature_dim: usize,
    /// Output stream name for labels.
    pub label_section: String,
    /// First label column. Defaults to the column right after the features.
    pub label_start: Option<usize>,
    /// Maximum number of distinct categories (Category) or number of label
    /// columns (Regression / Other, 0 means 1).
    pub label_dim: usize,
    pub one_line_per_file: bool,
    /// Skip the first line of the data file.
    pub skip_header: bool,
    /// Characters separating columns. Runs of delimiters count as one.
    pub delimiters: String,
    pub cache: Option<CacheConfig>,
    /// 0 = quiet, 1 = per-epoch messages, 2+ = per-window messages.
    pub trace_level: u32,
    /// Label vocabulary file: loaded when present, written once otherwise.
    pub label_mapping_file: Option<PathBuf>,
    /// Out-of-vocabulary bucket for fixed vocabularies.
    pub unknown_label: Option<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            label_type: LabelKind::Category,
            randomize: Randomize::None,
            partial_minibatch: true,
            feature_section: "features".to_string(),
            feature_start: 0,
            feature_dim: 0,
            label_section: "labels".to_string(),
            label_start: None,
            label_dim: 0,
            one_line_per_file: false,
            skip_header: false,
            delimiters: " \t,".to_string(),
            cache: None,
            trace_level: 0,
            label_mapping_file: None,
            unknown_label: None,
        }
    }
}

impl ReaderConfig {
    pub fn new(file: impl AsRef<Path>, feature_dim: usize) -> Self {
        Self {
            file: file.as_ref().to_path_buf(),
            feature_dim,
            ..Self::default()
        }
    }

    /// Decode from a JSON config object and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::config(format!("bad reader config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn label_type(mut self, kind: LabelKind) -> Self {
        self.label_type = kind;
        self
    }
    pub fn randomize(mut self, r: Randomize) -> Self {
        self.randomize = r;
        self
    }
    pub fn partial_minibatch(mut self, p: bool) -> Self {
        self.partial_minibatch = p;
        self
    }
    pub fn feature_section(mut self, name: impl Into<String>) -> Self {
        self.feature_section = name.into();
        self
    }
    pub fn feature_start(mut self, col: usize) -> Self {
        self.feature_start = col;
        self
    }
    pub fn label_section(mut self, name: impl Into<String>) -> Self {
        self.label_section = name.into();
        self
    }
    pub fn label_start(mut self, col: usize) -> Self {
        self.label_start = Some(col);
        self
    }
    pub fn label_dim(mut self, dim: usize) -> Self {
        self.label_dim = dim;
        self
    }
    pub fn one_line_per_file(mut self, v: bool) -> Self {
        self.one_line_per_file = v;
        self
    }
    pub fn skip_header(mut self, v: bool) -> Self {
        self.skip_header = v;
        self
    }
    pub fn delimiters(mut self, d: impl Into<String>) -> Self {
        self.delimiters = d.into();
        self
    }
    pub fn cache(mut self, path: impl AsRef<Path>) -> Self {
        self.cache = Some(CacheConfig {
            path: path.as_ref().to_path_buf(),
        });
        self
    }
    pub fn trace_level(mut self, level: u32) -> Self {
        self.trace_level = level;
        self
    }
    pub fn label_mapping_file(mut self, path: impl AsRef<Path>) -> Self {
        self.label_mapping_file = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn unknown_label(mut self, label: impl Into<String>) -> Self {
        self.unknown_label = Some(label.into());
        self
    }

    /// First label column, resolving the "right after the features" default.
    pub fn resolved_label_start(&self) -> usize {
        self.label_start
            .unwrap_or(self.feature_start + self.feature_dim)
    }

    /// Number of label columns a record carries.
    pub fn label_columns(&self) -> usize {
        match self.label_type {
            LabelKind::None => 0,
            LabelKind::Category => 1,
            LabelKind::Regression | LabelKind::Other => self.label_dim.max(1),
        }
    }

    /// Rows of the label output stream.
    pub fn label_rows(&self) -> usize {
        match self.label_type {
            LabelKind::None => 0,
            LabelKind::Category => self.label_dim,
            LabelKind::Regression | LabelKind::Other => self.label_dim.max(1),
        }
    }

    /// Check the static configuration for contradictions.
    pub fn validate(&self) -> Result<()> {
        if self.file.as_os_str().is_empty() {
            return Err(Error::config("file must be set"));
        }
        if self.feature_dim == 0 {
            return Err(Error::config("featureDim must be greater than 0"));
        }
        if self.feature_section.is_empty() {
            return Err(Error::config("featureSection must not be empty"));
        }
        if self.delimiters.is_empty() {
            return Err(Error::config("delimiters must not be empty"));
        }
        if let Randomize::Window(0) = self.randomize {
            return Err(Error::config("randomize window must be greater than 0"));
        }
        if self.label_type == LabelKind::None {
            return Ok(());
        }
        if self.label_section.is_empty() {
            return Err(Error::config("labelSection must not be empty"));
        }
        if self.label_section == self.feature_section {
            return Err(Error::config(format!(
                "featureSection and labelSection are both {:?}",
                self.feature_section
            )));
        }
        if self.label_type.is_categorical() && self.label_dim == 0 {
            return Err(Error::config(
                "labelDim (number of distinct categories) is required for Category labels",
            ));
        }
        if self.label_type.is_categorical() && self.label_dim > u32::MAX as usize {
            return Err(Error::config(format!(
                "labelDim {} exceeds the label id range",
                self.label_dim
            )));
        }
        let label_start = self.resolved_label_start();
        let label_end = label_start + self.label_columns();
        let feature_end = self.feature_start + self.feature_dim;
        if label_start < feature_end && self.feature_start < label_end {
            return Err(Error::config(format!(
                "label columns [{label_start}, {label_end}) overlap feature columns [{}, {feature_end})",
                self.feature_start
            )));
        }
        Ok(())
    }
}
