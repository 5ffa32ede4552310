// LabelMap — bijection between category labels and integer IDs
//
// IDs are handed out in first-seen order starting at 0 and never change or
// disappear during a pass. The capacity is the configured label dimension:
// the (labelDim + 1)-th distinct label is an error, never silently dropped.
//
// A mapping installed from outside (or loaded from a vocabulary file) puts
// the map in fixed mode: unseen labels are then rejected, or routed to the
// out-of-vocabulary bucket when one is part of the vocabulary.
//
// Vocabulary file format: one label per line, line i holds the label of ID i.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use uci_core::{Error, Result};

/// Integer ID of a category label.
pub type LabelId = u32;

#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    id_to_label: BTreeMap<LabelId, String>,
    label_to_id: HashMap<String, LabelId>,
    label_dim: usize,
    fixed: bool,
    unknown_label: Option<String>,
}

impl LabelMap {
    /// An empty map in dynamic mode with room for `label_dim` categories.
    pub fn new(label_dim: usize) -> Self {
        Self {
            label_dim,
            ..Self::default()
        }
    }

    /// Register the out-of-vocabulary token used in fixed mode.
    pub fn with_unknown_label(mut self, label: Option<String>) -> Self {
        self.unknown_label = label;
        self
    }

    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }

    pub fn label_dim(&self) -> usize {
        self.label_dim
    }

    /// Whether the vocabulary is fixed (no auto-assignment).
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn id_of(&self, label: &str) -> Option<LabelId> {
        self.label_to_id.get(label).copied()
    }

    pub fn label_of(&self, id: LabelId) -> Option<&str> {
        self.id_to_label.get(&id).map(String::as_str)
    }

    /// Read-only ID → label view.
    pub fn mapping(&self) -> &BTreeMap<LabelId, String> {
        &self.id_to_label
    }

    /// Map `label` to its ID, assigning the next free ID in dynamic mode.
    pub fn store_label(&mut self, label: &str) -> Result<LabelId> {
        if let Some(id) = self.id_of(label) {
            return Ok(id);
        }

        if self.fixed {
            return match self.unknown_label.as_deref().and_then(|u| self.id_of(u)) {
                Some(id) => Ok(id),
                None => Err(Error::UnknownLabel {
                    label: label.to_string(),
                }),
            };
        }

        let next = self.id_to_label.len();
        if next >= self.label_dim {
            return Err(Error::LabelOverflow {
                label: label.to_string(),
                label_dim: self.label_dim,
            });
        }
        let id = next as LabelId;
        self.id_to_label.insert(id, label.to_string());
        self.label_to_id.insert(label.to_string(), id);
        Ok(id)
    }

    /// Replace the mapping wholesale and switch to fixed mode.
    ///
    /// Every ID must be below the label dimension and every label unique.
    pub fn set_fixed(&mut self, mapping: &BTreeMap<LabelId, String>) -> Result<()> {
        let mut label_to_id = HashMap::with_capacity(mapping.len());
        for (&id, label) in mapping {
            if id as usize >= self.label_dim {
                return Err(Error::config(format!(
                    "label mapping id {id} ({label:?}) is outside labelDim {}",
                    self.label_dim
                )));
            }
            if let Some(prev) = label_to_id.insert(label.clone(), id) {
                return Err(Error::config(format!(
                    "label {label:?} is mapped to both {prev} and {id}"
                )));
            }
        }
        self.id_to_label = mapping.clone();
        self.label_to_id = label_to_id;
        self.fixed = true;
        Ok(())
    }

    /// Load a vocabulary file into fixed mode.
    pub fn load_vocabulary(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mapping: BTreeMap<LabelId, String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(i, l)| (i as LabelId, l.to_string()))
            .collect();
        if mapping.is_empty() {
            return Err(Error::config(format!(
                "label mapping file {} is empty",
                path.display()
            )));
        }
        self.set_fixed(&mapping)
    }

    /// Write the mapping as a vocabulary file.
    pub fn write_vocabulary(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let expected: Vec<LabelId> = (0..self.id_to_label.len() as LabelId).collect();
        if !self.id_to_label.keys().copied().eq(expected) {
            return Err(Error::msg(format!(
                "cannot write {}: label ids are not contiguous",
                path.display()
            )));
        }
        let mut w = BufWriter::new(File::create(path)?);
        for label in self.id_to_label.values() {
            writeln!(w, "{label}")?;
        }
        w.flush()?;
        Ok(())
    }
}
