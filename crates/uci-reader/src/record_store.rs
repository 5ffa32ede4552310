// RecordStore — parallel arrays for the resident windows
//
// Slot s of the store holds one sample:
//
//   features[s * feature_dim .. (s + 1) * feature_dim]
//   labels  [s * label_width .. (s + 1) * label_width]   (numeric labels)
//   label_ids[s]                                         (category labels)
//
// Windows are appended as contiguous slot ranges and the whole store is
// dropped at once when the reader needs a range it does not hold. Nothing is
// ever patched in place.

use uci_core::Element;

use crate::label_map::LabelId;
use crate::randomizer::WindowKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResidentWindow {
    key: WindowKey,
    base: usize,
    len: usize,
}

#[derive(Debug)]
pub struct RecordStore<E: Element> {
    feature_dim: usize,
    label_width: usize,
    features: Vec<E>,
    labels: Vec<E>,
    label_ids: Vec<LabelId>,
    windows: Vec<ResidentWindow>,
    slots: usize,
}

impl<E: Element> RecordStore<E> {
    /// `label_width` is the number of numeric label values per sample
    /// (0 for category or no labels).
    pub fn new(feature_dim: usize, label_width: usize) -> Self {
        Self {
            feature_dim,
            label_width,
            features: Vec::new(),
            labels: Vec::new(),
            label_ids: Vec::new(),
            windows: Vec::new(),
            slots: 0,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn label_width(&self) -> usize {
        self.label_width
    }

    /// Number of resident samples.
    pub fn len(&self) -> usize {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// Drop every window and give the memory back.
    pub fn release(&mut self) {
        self.features = Vec::new();
        self.labels = Vec::new();
        self.label_ids = Vec::new();
        self.windows.clear();
        self.slots = 0;
    }

    pub fn contains(&self, key: WindowKey) -> bool {
        self.windows.iter().any(|w| w.key == key)
    }

    /// Reserve `len` slots for window `key`; returns its first slot.
    pub fn begin_window(&mut self, key: WindowKey, len: usize) -> usize {
        let base = self.slots;
        self.slots += len;
        self.features.resize(self.slots * self.feature_dim, E::zero());
        self.labels.resize(self.slots * self.label_width, E::zero());
        self.label_ids.resize(self.slots, 0);
        self.windows.push(ResidentWindow { key, base, len });
        base
    }

    /// Slot of `offset` inside resident window `key`.
    pub fn slot(&self, key: WindowKey, offset: usize) -> Option<usize> {
        self.windows
            .iter()
            .find(|w| w.key == key && offset < w.len)
            .map(|w| w.base + offset)
    }

    /// Store one sample's feature values.
    ///
    /// # Panics
    /// Panics if `slot` is not reserved or `values` has the wrong width.
    pub fn put_features(&mut self, slot: usize, values: &[f64]) {
        assert_eq!(values.len(), self.feature_dim, "feature width mismatch");
        let dst = &mut self.features[slot * self.feature_dim..(slot + 1) * self.feature_dim];
        for (d, &v) in dst.iter_mut().zip(values) {
            *d = E::from_f64(v);
        }
    }

    /// Store one sample's numeric label values.
    ///
    /// # Panics
    /// Panics if `slot` is not reserved or `values` has the wrong width.
    pub fn put_labels(&mut self, slot: usize, values: &[f64]) {
        assert_eq!(values.len(), self.label_width, "label width mismatch");
        let dst = &mut self.labels[slot * self.label_width..(slot + 1) * self.label_width];
        for (d, &v) in dst.iter_mut().zip(values) {
            *d = E::from_f64(v);
        }
    }

    pub fn put_label_id(&mut self, slot: usize, id: LabelId) {
        self.label_ids[slot] = id;
    }

    pub fn features(&self, slot: usize) -> &[E] {
        &self.features[slot * self.feature_dim..(slot + 1) * self.feature_dim]
    }

    pub fn labels(&self, slot: usize) -> &[E] {
        &self.labels[slot * self.label_width..(slot + 1) * self.label_width]
    }

    pub fn label_id(&self, slot: usize) -> LabelId {
        self.label_ids[slot]
    }
}
