//! Rectangular pixel windows

/// A rectangular sub-region of a raster in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    pub fn new(col_off: usize, row_off: usize, cols: usize, rows: usize) -> Self {
        Self {
            col_off,
            row_off,
            cols,
            rows,
        }
    }

    /// Window covering a whole `cols` x `rows` image.
    pub fn full(cols: usize, rows: usize) -> Self {
        Self::new(0, 0, cols, rows)
    }

    /// Full-width band of `rows` rows starting at `row_off`.
    pub fn rows(row_off: usize, rows: usize, cols: usize) -> Self {
        Self::new(0, row_off, cols, rows)
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Whether the window lies inside a `width` x `height` image.
    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.col_end() <= width && self.row_end() <= height
    }
}
