use image::RgbImage;

/// A dense 2D grid of cell values, the payload of every pipeline artifact.
///
/// Grids are replaced wholesale when a stage regenerates; nothing mutates a
/// published grid in place. There is no wrapping: edge policy (clamping,
/// window shrinking) belongs to the kernels that read the grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    pub width: usize,
    pub height: usize,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn new_with(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T> Grid<T> {
    /// Wrap an existing row-major buffer (e.g. a kernel read-back).
    ///
    /// Panics if the buffer length does not match the shape; the kernel
    /// backend validates shapes before this point.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(data.len(), width * height, "grid buffer length mismatch");
        Self {
            width,
            height,
            data,
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        self.data.iter().enumerate().map(move |(idx, val)| {
            let x = idx % self.width;
            let y = idx / self.width;
            (x, y, val)
        })
    }
}

impl Grid<f32> {
    /// Maximum cell value, used for the sea-level percentile.
    /// Returns 0.0 for an empty grid.
    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::MIN, f32::max).max(0.0)
    }
}

/// A stage's cached output: the typed grid plus its rendered image.
///
/// Both halves are produced together by one regeneration and swapped in
/// atomically, so readers never see a grid from one generation paired
/// with an image from another.
#[derive(Clone, Debug)]
pub struct Artifact<T> {
    pub grid: Grid<T>,
    pub image: RgbImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_roundtrip() {
        let mut grid = Grid::new_with(4, 3, 0u8);
        grid.set(3, 2, 7);
        assert_eq!(*grid.get(3, 2), 7);
        assert_eq!(*grid.get(0, 0), 0);
    }

    #[test]
    fn test_from_vec_row_major() {
        let grid = Grid::from_vec(3, 2, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(*grid.get(2, 0), 2);
        assert_eq!(*grid.get(0, 1), 3);
    }

    #[test]
    fn test_iter_coordinates() {
        let grid = Grid::from_vec(2, 2, vec![10, 11, 12, 13]);
        let cells: Vec<_> = grid.iter().map(|(x, y, v)| (x, y, *v)).collect();
        assert_eq!(cells, vec![(0, 0, 10), (1, 0, 11), (0, 1, 12), (1, 1, 13)]);
    }

    #[test]
    fn test_max_value() {
        let grid = Grid::from_vec(2, 2, vec![1.0f32, -3.0, 8.5, 2.0]);
        assert_eq!(grid.max_value(), 8.5);
    }
}
