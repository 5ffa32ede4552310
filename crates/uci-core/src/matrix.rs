use crate::element::Element;
use crate::error::{Error, Result};

// Matrix — dense column-major output buffer
//
// A minibatch stream is delivered as a [dim, n] matrix with one column per
// sample. Column-major storage keeps each sample's values contiguous, so
// filling a minibatch is a sequence of slice copies:
//
//   rows = 3, cols = 2       data = [a0 a1 a2 | b0 b1 b2]
//                                    column 0   column 1
//
// Buffers are caller-owned and reused across calls; `resize` only reallocates
// when the new minibatch needs more room than any previous one.

/// Dense `[rows, cols]` matrix stored column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<E: Element> {
    rows: usize,
    cols: usize,
    data: Vec<E>,
}

impl<E: Element> Default for Matrix<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> Matrix<E> {
    /// An empty `[0, 0]` matrix, ready to be handed to a reader.
    pub fn new() -> Self {
        Self {
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }

    /// A zero-filled `[rows, cols]` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![E::zero(); rows * cols],
        }
    }

    /// Build from column-major data. Fails when `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<E>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ElementCountMismatch {
                rows,
                cols,
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`
    pub fn dims(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reshape to `[rows, cols]` and zero every element.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.resize(rows * cols, E::zero());
    }

    /// Bounds-checked element access.
    pub fn get(&self, row: usize, col: usize) -> Result<E> {
        self.check(row, col)?;
        Ok(self.data[col * self.rows + row])
    }

    /// Bounds-checked element write.
    pub fn set(&mut self, row: usize, col: usize, value: E) -> Result<()> {
        self.check(row, col)?;
        self.data[col * self.rows + row] = value;
        Ok(())
    }

    /// The values of one sample.
    ///
    /// # Panics
    /// Panics if `col >= self.cols()`.
    pub fn column(&self, col: usize) -> &[E] {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

    /// Mutable view of one sample's values.
    ///
    /// # Panics
    /// Panics if `col >= self.cols()`.
    pub fn column_mut(&mut self, col: usize) -> &mut [E] {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        let rows = self.rows;
        &mut self.data[col * rows..(col + 1) * rows]
    }

    /// Raw column-major storage.
    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    /// Copy shape and contents from `other`, reusing this buffer's allocation.
    pub fn copy_from(&mut self, other: &Matrix<E>) {
        self.rows = other.rows;
        self.cols = other.cols;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    fn check(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }
}
