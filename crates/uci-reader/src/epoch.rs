// EpochCursor — minibatch / epoch bookkeeping
//
// Positions are global sample numbers counted from the start of epoch 0.
// Epoch e covers [e * epoch_size, (e + 1) * epoch_size); an epoch larger than
// the dataset simply runs into the next sweep, one smaller stops early.
//
// 10 samples, mb_size 3, epoch 0:
//
//   start 0 → 3    start 3 → 3    start 6 → 3    start 9 → 1 (partial)
//                                                          → end (full only)

use uci_core::{Error, Result};

use crate::data_reader::{EndDataType, REQUEST_DATA_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochCursor {
    mb_size: usize,
    epoch: usize,
    epoch_size: usize,
    epoch_start: usize,
    mb_start: usize,
    total_samples: usize,
    partial_minibatch: bool,
}

impl EpochCursor {
    /// Position a cursor at the start of `epoch`.
    pub fn start(
        mb_size: usize,
        epoch: usize,
        requested_epoch_samples: usize,
        total_samples: usize,
        partial_minibatch: bool,
    ) -> Result<Self> {
        if mb_size == 0 {
            return Err(Error::config("minibatch size must be greater than 0"));
        }
        let epoch_size = if requested_epoch_samples == REQUEST_DATA_SIZE {
            total_samples
        } else {
            requested_epoch_samples
        };
        let epoch_start = epoch
            .checked_mul(epoch_size)
            .filter(|s| s.checked_add(epoch_size).is_some())
            .ok_or_else(|| {
                Error::config(format!(
                    "epoch {epoch} of {epoch_size} samples is beyond the addressable range"
                ))
            })?;
        Ok(Self {
            mb_size,
            epoch,
            epoch_size,
            epoch_start,
            mb_start: epoch_start,
            total_samples,
            partial_minibatch,
        })
    }

    pub fn mb_size(&self) -> usize {
        self.mb_size
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn epoch_size(&self) -> usize {
        self.epoch_size
    }

    pub fn epoch_start(&self) -> usize {
        self.epoch_start
    }

    /// One past the last sample of the epoch.
    pub fn epoch_end(&self) -> usize {
        self.epoch_start + self.epoch_size
    }

    /// Global position of the next minibatch.
    pub fn mb_start(&self) -> usize {
        self.mb_start
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    /// Samples of this epoch not delivered yet.
    pub fn remaining(&self) -> usize {
        self.epoch_end().saturating_sub(self.mb_start)
    }

    /// How many records a minibatch starting at `mb_start` consists of.
    ///
    /// A full minibatch when the epoch has room for one. Otherwise the short
    /// remainder, except at the `tail` of an epoch without partial
    /// minibatches, where the remainder is dropped and 0 means end of data.
    pub fn records_to_read(&self, mb_start: usize, tail: bool) -> usize {
        if self.total_samples == 0 {
            return 0;
        }
        let remaining = self.epoch_end().saturating_sub(mb_start);
        if remaining >= self.mb_size {
            self.mb_size
        } else if !tail || self.partial_minibatch {
            remaining
        } else {
            0
        }
    }

    /// Move past a delivered minibatch of `records` samples.
    pub fn advance(&mut self, records: usize) {
        self.mb_start += records;
    }

    /// Whether the cursor sits on the given boundary.
    pub fn data_end(&self, end: EndDataType) -> bool {
        match end {
            EndDataType::Null => false,
            EndDataType::Minibatch => {
                (self.mb_start - self.epoch_start) % self.mb_size == 0
                    || self.mb_start >= self.epoch_end()
            }
            EndDataType::Epoch => self.records_to_read(self.mb_start, true) == 0,
            EndDataType::Set => {
                self.total_samples == 0
                    || (self.mb_start > self.epoch_start
                        && self.mb_start % self.total_samples == 0)
            }
            EndDataType::Sentence => true,
        }
    }
}
