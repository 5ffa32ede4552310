// DataReader trait — the interface a training loop drives
//
// Implemented by the live reader (`UciReader`) and by the cache replay reader
// (`CacheReader`). The live reader picks one or the other per minibatch loop.

use std::collections::{BTreeMap, HashMap};

use uci_core::{Element, Error, Matrix, Result};

use crate::label_map::LabelId;

/// Pass as `requested_epoch_samples` to make an epoch one full dataset.
pub const REQUEST_DATA_SIZE: usize = usize::MAX;

/// Output buffers of one minibatch: stream name → `[dim, samples]` matrix.
pub type Minibatch<E> = HashMap<String, Matrix<E>>;

/// Boundaries `data_end` can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndDataType {
    /// No boundary; never reached.
    Null,
    /// The cursor sits on a minibatch boundary.
    Minibatch,
    /// The current epoch has been fully delivered.
    Epoch,
    /// The cursor sits at the physical end of the dataset.
    Set,
    /// End of a sequence. Every sample is its own sequence.
    Sentence,
}

/// Layout of a delivered minibatch: how many parallel sequences it holds and
/// how many time steps each one has. UCI samples are independent, so there is
/// always exactly one sequence and one time step per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MinibatchLayout {
    pub num_parallel_sequences: usize,
    pub num_time_steps: usize,
}

impl MinibatchLayout {
    pub fn for_samples(samples: usize) -> Self {
        Self {
            num_parallel_sequences: 1,
            num_time_steps: samples,
        }
    }
}

/// A source of minibatches for a training loop.
pub trait DataReader<E: Element> {
    /// Begin epoch `epoch` with minibatches of `mb_size` samples.
    /// `requested_epoch_samples` may be [`REQUEST_DATA_SIZE`].
    fn start_minibatch_loop(
        &mut self,
        mb_size: usize,
        epoch: usize,
        requested_epoch_samples: usize,
    ) -> Result<()>;

    /// Fill `outputs` with the next minibatch. `Ok(false)` means the epoch
    /// has no more data and `outputs` must not be interpreted.
    fn get_minibatch(&mut self, outputs: &mut Minibatch<E>) -> Result<bool>;

    /// Whether the cursor sits on the given boundary. Never mutates.
    fn data_end(&self, end: EndDataType) -> bool;

    /// ID → label view of the categorical label stream `section`.
    fn label_mapping(&self, section: &str) -> Result<&BTreeMap<LabelId, String>>;

    /// Install a fixed vocabulary for the label stream `section`.
    fn set_label_mapping(
        &mut self,
        section: &str,
        mapping: &BTreeMap<LabelId, String>,
    ) -> Result<()>;

    /// Layout of the most recently delivered minibatch.
    fn minibatch_layout(&self) -> MinibatchLayout;

    /// Always 1: samples are not interleaved.
    fn num_parallel_sequences(&self) -> usize {
        1
    }

    fn set_num_parallel_sequences(&mut self, n: usize) -> Result<()> {
        if n == 1 {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation(format!(
                "{n} parallel sequences requested, UCI data has exactly 1"
            )))
        }
    }

    /// The shuffle seed always derives from the epoch number.
    fn set_random_seed(&mut self, _seed: u64) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "the random seed is derived from the epoch number and cannot be set".to_string(),
        ))
    }

    /// Release all buffers. Idempotent.
    fn destroy(&mut self);
}
