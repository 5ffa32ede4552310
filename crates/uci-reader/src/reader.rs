// UciReader — the epoch / minibatch controller
//
// Per minibatch:
//
//   cache reader serves this loop? ──yes──▶ replay frame
//            │ no
//            ▼
//   records_to_read ── 0 ──▶ end of epoch (finish cache)
//            │
//            ▼
//   ensure_data_available ── windows resident? ──no──▶ release store,
//            │                                         parse windows in
//            │ yes                                     randomized slot order
//            ▼
//   assemble outputs ──▶ append frame to cache writer ──▶ advance cursor
//
// The cursor counts global sample positions (see `randomizer`), so epoch
// wraparound and starting at any epoch need no special casing here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use uci_core::{Element, Error, Result};

use crate::cache::{CacheHeader, CacheReader, CacheWriter};
use crate::config::{LabelKind, ReaderConfig};
use crate::data_reader::{DataReader, EndDataType, Minibatch, MinibatchLayout};
use crate::epoch::EpochCursor;
use crate::label_map::{LabelId, LabelMap};
use crate::parser::{open_source, ParsedRecord, RecordSource};
use crate::randomizer::{Randomizer, WindowKey};
use crate::record_store::RecordStore;

/// Lifecycle of a [`UciReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Constructed, no minibatch loop started yet.
    Uninitialized,
    /// A minibatch loop is running.
    EpochActive,
    /// The current loop delivered its last minibatch.
    EpochExhausted,
    /// Destroyed. Terminal.
    Closed,
}

/// Minibatch reader over a UCI delimited text source.
pub struct UciReader<E: Element> {
    config: ReaderConfig,
    state: ReaderState,
    source: Option<Box<dyn RecordSource>>,
    labels: LabelMap,
    store: RecordStore<E>,
    randomizer: Option<Randomizer>,
    total_samples: Option<usize>,
    cursor: Option<EpochCursor>,
    record: ParsedRecord,
    /// Windows of the current randomizer parsed at least once.
    parsed_windows: Vec<bool>,
    label_file_to_write: Option<PathBuf>,
    cache_reader: Option<CacheReader<E>>,
    cache_writer: Option<CacheWriter<E>>,
    serving_from_cache: bool,
    layout: MinibatchLayout,
}

impl<E: Element> UciReader<E> {
    /// Validate `config`, open the record source, prepare the label mapper and
    /// open an existing cache. No per-epoch buffers are allocated.
    pub fn new(config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        let source = open_source(&config)?;

        let mut labels =
            LabelMap::new(config.label_dim).with_unknown_label(config.unknown_label.clone());
        let mut label_file_to_write = None;
        if config.label_type.is_categorical() {
            if let Some(path) = &config.label_mapping_file {
                if path.exists() {
                    labels.load_vocabulary(path)?;
                    if config.trace_level >= 1 {
                        tracing::info!(
                            path = %path.display(),
                            labels = labels.len(),
                            "loaded label vocabulary"
                        );
                    }
                } else {
                    label_file_to_write = Some(path.clone());
                }
            }
        }

        let label_width = if config.label_type.is_numeric() {
            config.label_columns()
        } else {
            0
        };

        let cache_reader = match &config.cache {
            Some(cache) if cache.path.exists() => {
                match CacheReader::open(&cache.path, config.label_section.clone()) {
                    Ok(r) => Some(r),
                    Err(e) => {
                        tracing::warn!(
                            path = %cache.path.display(),
                            error = %e,
                            "ignoring unreadable cache"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Self {
            store: RecordStore::new(config.feature_dim, label_width),
            config,
            state: ReaderState::Uninitialized,
            source: Some(source),
            labels,
            randomizer: None,
            total_samples: None,
            cursor: None,
            record: ParsedRecord::default(),
            parsed_windows: Vec::new(),
            label_file_to_write,
            cache_reader,
            cache_writer: None,
            serving_from_cache: false,
            layout: MinibatchLayout::default(),
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Number of records in the dataset, known once a loop has started.
    pub fn total_samples(&self) -> Option<usize> {
        self.total_samples
    }

    /// Whether the current loop is replayed from the cache.
    pub fn is_serving_from_cache(&self) -> bool {
        self.serving_from_cache
    }

    /// Number of records the minibatch starting at `mb_start` consists of;
    /// 0 at the end of the epoch when `tail` is set. 0 without a loop.
    pub fn records_to_read(&self, mb_start: usize, tail: bool) -> usize {
        self.cursor
            .as_ref()
            .map_or(0, |c| c.records_to_read(mb_start, tail))
    }

    /// Make the records of the minibatch starting at `mb_start` resident.
    ///
    /// Reuses the store when every window the minibatch touches is already
    /// loaded, otherwise releases it and parses those windows. Returns
    /// `Ok(false)` at end of data: nothing left to read (with
    /// `end_of_data_check`, a short tail counts as nothing when partial
    /// minibatches are off), or a source shorter than its record count.
    pub fn ensure_data_available(&mut self, mb_start: usize, end_of_data_check: bool) -> Result<bool> {
        let count = match &self.cursor {
            Some(c) => c.records_to_read(mb_start, end_of_data_check),
            None => {
                return Err(Error::InvalidState(
                    "no minibatch loop has been started".to_string(),
                ))
            }
        };
        if count == 0 {
            return Ok(false);
        }

        let needed = self.windows_for(mb_start, count)?;
        if needed.iter().all(|&key| self.store.contains(key)) {
            return Ok(true);
        }

        self.store.release();
        for key in needed {
            let loaded = self.load_window(key);
            if !matches!(loaded, Ok(true)) {
                self.store.release();
                return loaded;
            }
        }
        Ok(true)
    }

    fn randomizer(&self) -> Result<&Randomizer> {
        self.randomizer
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no minibatch loop has been started".to_string()))
    }

    /// Windows touched by `count` samples from `mb_start`, in order.
    fn windows_for(&self, mb_start: usize, count: usize) -> Result<Vec<WindowKey>> {
        let randomizer = self.randomizer()?;
        let mut keys: Vec<WindowKey> = Vec::new();
        let mut pos = mb_start;
        let end = mb_start + count;
        while pos < end {
            let (key, _) = randomizer.locate(pos);
            let (_, len) = randomizer.window_span(key.index);
            if keys.last() != Some(&key) {
                keys.push(key);
            }
            pos = randomizer.randomize_sweep(pos) + len;
        }
        Ok(keys)
    }

    /// Parse window `key` into fresh slots, record by record in source order,
    /// each into the slot its shuffle assigns it.
    fn load_window(&mut self, key: WindowKey) -> Result<bool> {
        let randomizer = self.randomizer()?;
        let (start, len) = randomizer.window_span(key.index);
        let permutation = randomizer.permutation(key);
        let mut slot_of = vec![0usize; len];
        for (slot, &offset) in permutation.iter().enumerate() {
            slot_of[offset] = slot;
        }

        let base = self.store.begin_window(key, len);
        self.source_mut()?.seek_record(start)?;
        for (offset, &slot) in slot_of.iter().enumerate() {
            if !self.read_record(base + slot)? {
                let name = self.source_mut()?.name().to_string();
                tracing::warn!(
                    source = %name,
                    expected = start + len,
                    got = start + offset,
                    "record source ended early"
                );
                return Ok(false);
            }
        }

        if self.config.trace_level >= 2 {
            tracing::debug!(
                sweep = key.sweep,
                window = key.index,
                first_record = start,
                records = len,
                resident = self.store.len(),
                "loaded window"
            );
        }

        if let Some(parsed) = self.parsed_windows.get_mut(key.index) {
            if !*parsed {
                *parsed = true;
                if self.parsed_windows.iter().all(|&p| p) {
                    self.maybe_write_label_file()?;
                }
            }
        }
        Ok(true)
    }

    /// Parse exactly one record from the source into store slot `slot`.
    fn read_record(&mut self, slot: usize) -> Result<bool> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| Error::InvalidState("reader has been destroyed".to_string()))?;
        if !source.read_record(&mut self.record)? {
            return Ok(false);
        }

        self.store.put_features(slot, &self.record.features);
        match self.config.label_type {
            LabelKind::None => {}
            LabelKind::Category => {
                let id = self.labels.store_label(&self.record.labels[0])?;
                self.store.put_label_id(slot, id);
            }
            LabelKind::Regression | LabelKind::Other => {
                self.store.put_labels(slot, &self.record.label_values);
            }
        }
        Ok(true)
    }

    fn source_mut(&mut self) -> Result<&mut Box<dyn RecordSource>> {
        self.source
            .as_mut()
            .ok_or_else(|| Error::InvalidState("reader has been destroyed".to_string()))
    }

    fn slot_for(&self, sample: usize) -> Result<usize> {
        let (key, offset) = self.randomizer()?.locate(sample);
        self.store.slot(key, offset).ok_or_else(|| {
            Error::InvalidState(format!("sample {sample} is not resident"))
        })
    }

    /// Fill the feature and label streams with `count` samples from
    /// `mb_start`, one column per sample in delivery order.
    fn assemble(&self, mb_start: usize, count: usize, outputs: &mut Minibatch<E>) -> Result<()> {
        let slots = (mb_start..mb_start + count)
            .map(|sample| self.slot_for(sample))
            .collect::<Result<Vec<_>>>()?;

        let features = outputs
            .entry(self.config.feature_section.clone())
            .or_default();
        features.resize(self.config.feature_dim, count);
        for (col, &slot) in slots.iter().enumerate() {
            features.column_mut(col).copy_from_slice(self.store.features(slot));
        }

        if self.config.label_type == LabelKind::None {
            return Ok(());
        }
        let labels = outputs
            .entry(self.config.label_section.clone())
            .or_default();
        labels.resize(self.config.label_rows(), count);
        for (col, &slot) in slots.iter().enumerate() {
            if self.config.label_type.is_categorical() {
                labels.set(self.store.label_id(slot) as usize, col, E::one())?;
            } else {
                labels.column_mut(col).copy_from_slice(self.store.labels(slot));
            }
        }
        Ok(())
    }

    /// Count the source once; later loops reuse the number.
    fn ensure_total(&mut self) -> Result<usize> {
        if let Some(total) = self.total_samples {
            return Ok(total);
        }
        let total = self.source_mut()?.count_records()?;
        if total == 0 {
            tracing::warn!(file = %self.config.file.display(), "dataset has no records");
        } else if self.config.trace_level >= 1 {
            tracing::info!(file = %self.config.file.display(), records = total, "counted dataset");
        }
        self.total_samples = Some(total);
        Ok(total)
    }

    fn maybe_write_label_file(&mut self) -> Result<()> {
        if let Some(path) = self.label_file_to_write.take() {
            self.labels.write_vocabulary(&path)?;
            if self.config.trace_level >= 1 {
                tracing::info!(
                    path = %path.display(),
                    labels = self.labels.len(),
                    "wrote label vocabulary"
                );
            }
        }
        Ok(())
    }

    /// Whether the existing cache can replay the requested loop.
    fn cache_serves(&self, mb_size: usize, epoch: usize, requested_epoch_samples: usize) -> bool {
        self.cache_reader.as_ref().is_some_and(|r| {
            let h = r.header();
            h.serves(
                E::KIND,
                mb_size,
                epoch,
                requested_epoch_samples,
                self.config.partial_minibatch,
            ) && h.feature_dim == self.config.feature_dim
                && h.label_rows == self.config.label_rows()
                && h.window
                    == Randomizer::new(self.config.randomize, h.total_samples).shuffle_window()
        })
    }

    /// Start building a cache from this loop when none exists yet.
    fn begin_cache(&mut self, cursor: &EpochCursor) {
        let Some(cache) = &self.config.cache else {
            return;
        };
        if self.cache_reader.is_some() || cache.path.exists() || cursor.total_samples() == 0 {
            return;
        }
        let header = CacheHeader {
            kind: E::KIND,
            mb_size: cursor.mb_size(),
            epoch_size: cursor.epoch_size(),
            epoch: cursor.epoch(),
            total_samples: cursor.total_samples(),
            window: self
                .randomizer
                .as_ref()
                .map_or(0, Randomizer::shuffle_window),
            partial_minibatch: self.config.partial_minibatch,
            feature_dim: self.config.feature_dim,
            label_rows: self.config.label_rows(),
        };
        match CacheWriter::create(&cache.path, &header) {
            Ok(w) => self.cache_writer = Some(w),
            Err(e) => tracing::warn!(
                path = %cache.path.display(),
                error = %e,
                "cannot create cache, continuing without"
            ),
        }
    }

    /// Complete the cache after the last minibatch of its epoch and switch to
    /// replaying it.
    fn finish_cache(&mut self) {
        let Some(writer) = self.cache_writer.take() else {
            return;
        };
        let frames = writer.frames();
        let path = match writer.finish(self.labels.mapping()) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "cannot finish cache, continuing without");
                return;
            }
        };
        if self.config.trace_level >= 1 {
            tracing::info!(path = %path.display(), minibatches = frames, "wrote cache");
        }
        match CacheReader::open(&path, self.config.label_section.clone()) {
            Ok(r) => self.cache_reader = Some(r),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot reopen cache"),
        }
    }

    fn check_label_section(&self, section: &str) -> Result<()> {
        if !self.config.label_type.is_categorical() || section != self.config.label_section {
            return Err(Error::config(format!(
                "{section:?} is not a categorical label section"
            )));
        }
        Ok(())
    }
}

impl<E: Element> DataReader<E> for UciReader<E> {
    fn start_minibatch_loop(
        &mut self,
        mb_size: usize,
        epoch: usize,
        requested_epoch_samples: usize,
    ) -> Result<()> {
        if self.state == ReaderState::Closed {
            return Err(Error::InvalidState("reader has been destroyed".to_string()));
        }
        // a cache under construction only survives a complete epoch
        self.cache_writer = None;
        self.serving_from_cache = false;
        self.layout = MinibatchLayout::default();

        if self.cache_serves(mb_size, epoch, requested_epoch_samples) {
            if let Some(r) = self.cache_reader.as_mut() {
                r.start_minibatch_loop(mb_size, epoch, requested_epoch_samples)?;
                self.total_samples.get_or_insert(r.header().total_samples);
                self.serving_from_cache = true;
                self.cursor = None;
                self.state = ReaderState::EpochActive;
                if self.config.trace_level >= 1 {
                    tracing::info!(
                        epoch,
                        mb_size,
                        path = %r.path().display(),
                        "replaying minibatches from cache"
                    );
                }
                return Ok(());
            }
        }
        if let Some(r) = &self.cache_reader {
            tracing::warn!(
                path = %r.path().display(),
                epoch,
                mb_size,
                "cache does not match this minibatch loop, reading live"
            );
        }

        let total = self.ensure_total()?;
        let cursor = EpochCursor::start(
            mb_size,
            epoch,
            requested_epoch_samples,
            total,
            self.config.partial_minibatch,
        )?;
        if self.randomizer.as_ref().map(Randomizer::total_samples) != Some(total) {
            let randomizer = Randomizer::new(self.config.randomize, total);
            self.store.release();
            self.parsed_windows = vec![false; randomizer.window_count()];
            self.randomizer = Some(randomizer);
        }

        if self.config.trace_level >= 1 {
            tracing::info!(
                epoch,
                mb_size,
                epoch_size = cursor.epoch_size(),
                total_samples = total,
                randomized = self.config.randomize.is_enabled(),
                "starting minibatch loop"
            );
        }
        self.begin_cache(&cursor);
        self.cursor = Some(cursor);
        self.state = ReaderState::EpochActive;
        Ok(())
    }

    fn get_minibatch(&mut self, outputs: &mut Minibatch<E>) -> Result<bool> {
        match self.state {
            ReaderState::Uninitialized => {
                return Err(Error::InvalidState(
                    "get_minibatch called before start_minibatch_loop".to_string(),
                ))
            }
            ReaderState::Closed => {
                return Err(Error::InvalidState("reader has been destroyed".to_string()))
            }
            ReaderState::EpochExhausted => return Ok(false),
            ReaderState::EpochActive => {}
        }

        if self.serving_from_cache {
            let r = self
                .cache_reader
                .as_mut()
                .ok_or_else(|| Error::InvalidState("cache reader is gone".to_string()))?;
            let delivered = r.get_minibatch(outputs)?;
            self.layout = r.minibatch_layout();
            if !delivered {
                self.state = ReaderState::EpochExhausted;
            }
            return Ok(delivered);
        }

        let mb_start = match &self.cursor {
            Some(c) => c.mb_start(),
            None => return Err(Error::InvalidState("no minibatch loop".to_string())),
        };
        let count = self.records_to_read(mb_start, true);
        if count == 0 || !self.ensure_data_available(mb_start, true)? {
            if count != 0 {
                // partially built cache would not match a live read
                self.cache_writer = None;
            }
            self.finish_cache();
            self.state = ReaderState::EpochExhausted;
            return Ok(false);
        }

        self.assemble(mb_start, count, outputs)?;
        if let Some(w) = self.cache_writer.as_mut() {
            if let Err(e) = w.write_frame(count, outputs) {
                tracing::warn!(error = %e, "cache write failed, abandoning cache");
                self.cache_writer = None;
            }
        }

        let mut epoch_done = false;
        if let Some(c) = self.cursor.as_mut() {
            c.advance(count);
            epoch_done = c.records_to_read(c.mb_start(), true) == 0;
        }
        self.layout = MinibatchLayout::for_samples(count);
        if epoch_done {
            self.finish_cache();
        }
        Ok(true)
    }

    fn data_end(&self, end: EndDataType) -> bool {
        if self.serving_from_cache {
            if let Some(r) = &self.cache_reader {
                return r.data_end(end);
            }
        }
        match &self.cursor {
            Some(c) => {
                (end == EndDataType::Epoch && self.state == ReaderState::EpochExhausted)
                    || c.data_end(end)
            }
            None => end != EndDataType::Null,
        }
    }

    fn label_mapping(&self, section: &str) -> Result<&BTreeMap<LabelId, String>> {
        self.check_label_section(section)?;
        if self.labels.is_empty() {
            if let Some(r) = &self.cache_reader {
                if self.serving_from_cache {
                    return r.label_mapping(section);
                }
            }
        }
        Ok(self.labels.mapping())
    }

    fn set_label_mapping(
        &mut self,
        section: &str,
        mapping: &BTreeMap<LabelId, String>,
    ) -> Result<()> {
        if self.state == ReaderState::Closed {
            return Err(Error::InvalidState("reader has been destroyed".to_string()));
        }
        self.check_label_section(section)?;
        self.labels.set_fixed(mapping)?;
        // resident label ids belong to the old mapping
        self.store.release();
        self.label_file_to_write = None;
        self.cache_writer = None;
        Ok(())
    }

    fn minibatch_layout(&self) -> MinibatchLayout {
        self.layout
    }

    fn destroy(&mut self) {
        if self.state == ReaderState::Closed {
            return;
        }
        self.source = None;
        self.store.release();
        self.cursor = None;
        self.randomizer = None;
        self.parsed_windows = Vec::new();
        self.cache_writer = None;
        if let Some(mut r) = self.cache_reader.take() {
            r.destroy();
        }
        self.serving_from_cache = false;
        self.state = ReaderState::Closed;
        if self.config.trace_level >= 1 {
            tracing::info!(file = %self.config.file.display(), "reader destroyed");
        }
    }
}
