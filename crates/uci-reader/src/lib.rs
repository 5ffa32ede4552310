//! # uci-reader
//!
//! Minibatch reader for delimited UCI feature/label text data.
//!
//! This crate provides:
//! - [`UciReader`] — epoch / minibatch controller over a record source
//! - [`DataReader`] trait — the interface a training loop drives
//! - [`CacheReader`] / [`CacheWriter`] — replay emitted minibatches from disk
//! - [`ReaderConfig`] — static configuration, buildable in code or from JSON
//! - [`LabelMap`] — category label ↔ integer ID bijection
//! - [`Randomizer`] — windowed, reproducible sample order
//! - Record sources: delimited text file, one record per file
//! - Record store holding the resident randomization windows
//! - Epoch cursor with partial / full-only minibatch tails
//!
//! ```no_run
//! use uci_reader::{DataReader, Minibatch, ReaderConfig, UciReader, REQUEST_DATA_SIZE};
//!
//! let config = ReaderConfig::new("iris.txt", 4).label_dim(3);
//! let mut reader = UciReader::<f32>::new(config)?;
//! let mut batch = Minibatch::new();
//! for epoch in 0..10 {
//!     reader.start_minibatch_loop(16, epoch, REQUEST_DATA_SIZE)?;
//!     while reader.get_minibatch(&mut batch)? {
//!         let features = &batch["features"];
//!         let labels = &batch["labels"];
//!         assert_eq!(features.cols(), labels.cols());
//!     }
//! }
//! # Ok::<(), uci_reader::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod data_reader;
pub mod epoch;
pub mod label_map;
pub mod parser;
pub mod randomizer;
pub mod reader;
pub mod record_store;

pub use cache::{CacheHeader, CacheReader, CacheWriter};
pub use config::{CacheConfig, LabelKind, Randomize, ReaderConfig};
pub use data_reader::{DataReader, EndDataType, Minibatch, MinibatchLayout, REQUEST_DATA_SIZE};
pub use epoch::EpochCursor;
pub use label_map::{LabelId, LabelMap};
pub use parser::{open_source, OneLinePerFileSource, ParsedRecord, RecordLayout, RecordSource, UciParser};
pub use randomizer::{Randomizer, WindowKey};
pub use reader::{ReaderState, UciReader};
pub use record_store::RecordStore;

pub use uci_core::{ElemKind, Element, Error, Matrix, Result};
