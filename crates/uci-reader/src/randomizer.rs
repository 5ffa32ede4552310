// Randomizer — windowed, reproducible sample permutation
//
// Sample positions are global: position g belongs to sweep g / N and physical
// record g % N, where N is the dataset size. Each sweep is cut into windows
// of W consecutive physical records:
//
//   N = 10, W = 4:   [0 1 2 3] [4 5 6 7] [8 9]
//
// and records are shuffled inside a window only, so at most one window (plus
// whatever a straddling minibatch touches) has to be resident. The shuffle of
// window k in sweep s is seeded from (s, k) alone: re-reading a sweep, or
// resuming at any epoch, reproduces the same order without replaying
// anything before it.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::Randomize;

/// Identifies one randomization window. Without randomization every sweep
/// has the same order, so `sweep` is always 0 and windows are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub sweep: usize,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Randomizer {
    randomize: Randomize,
    total: usize,
    window: usize,
}

impl Randomizer {
    pub fn new(randomize: Randomize, total_samples: usize) -> Self {
        let window = match randomize {
            Randomize::None | Randomize::Auto => total_samples,
            Randomize::Window(w) => w.min(total_samples),
        };
        Self {
            randomize,
            total: total_samples,
            window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.randomize.is_enabled()
    }

    pub fn total_samples(&self) -> usize {
        self.total
    }

    /// Records per window (the last window of a sweep may be shorter).
    pub fn window_size(&self) -> usize {
        self.window
    }

    /// Records the order is shuffled within, 0 when source order is kept.
    pub fn shuffle_window(&self) -> usize {
        if self.is_enabled() {
            self.window
        } else {
            0
        }
    }

    /// Windows per sweep.
    pub fn window_count(&self) -> usize {
        if self.window == 0 {
            0
        } else {
            self.total.div_ceil(self.window)
        }
    }

    /// Window holding global position `sample`, and the offset inside it.
    ///
    /// # Panics
    /// Panics on an empty dataset.
    pub fn locate(&self, sample: usize) -> (WindowKey, usize) {
        assert!(self.total > 0, "Randomizer: empty dataset has no windows");
        let sweep = sample / self.total;
        let physical = sample % self.total;
        let index = physical / self.window;
        let key = WindowKey {
            sweep: if self.is_enabled() { sweep } else { 0 },
            index,
        };
        (key, physical - index * self.window)
    }

    /// Global position where the window containing `epoch_sample` starts.
    pub fn randomize_sweep(&self, epoch_sample: usize) -> usize {
        let sweep = epoch_sample / self.total;
        let (key, _) = self.locate(epoch_sample);
        sweep * self.total + key.index * self.window
    }

    /// Physical `(first record, record count)` of window `index`.
    pub fn window_span(&self, index: usize) -> (usize, usize) {
        let start = index * self.window;
        (start, self.window.min(self.total - start))
    }

    /// Slot order of a window: slot j holds physical record
    /// `window_start + permutation[j]`.
    pub fn permutation(&self, key: WindowKey) -> Vec<usize> {
        let (_, len) = self.window_span(key.index);
        let mut order: Vec<usize> = (0..len).collect();
        if self.is_enabled() {
            let mut rng = StdRng::seed_from_u64(window_seed(key));
            order.shuffle(&mut rng);
        }
        order
    }
}

/// Seed of a window's shuffle, derived from the sweep (epoch) number.
fn window_seed(key: WindowKey) -> u64 {
    (key.sweep as u64)
        .wrapping_add(1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (key.index as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}
