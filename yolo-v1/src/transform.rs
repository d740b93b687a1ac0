//! Conversion from normalized predictions to image-space boxes.

use crate::common::*;

/// The number of entries per box: `(x, y, w, h, confidence)`.
pub const BOX_ENTRIES: usize = 5;

/// The fixed layout of the output grid over the input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
pub struct GridGeometry {
    /// The side length of the square input image in pixels.
    #[getset(get_copy = "pub")]
    image_size: usize,
    /// The side length of a grid cell in pixels.
    #[getset(get_copy = "pub")]
    cell_size: usize,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            image_size: 448,
            cell_size: 64,
        }
    }
}

impl GridGeometry {
    pub fn new(image_size: usize, cell_size: usize) -> Result<Self> {
        ensure!(
            cell_size > 0 && image_size > 0 && image_size % cell_size == 0,
            "image size {} must be a positive multiple of cell size {}",
            image_size,
            cell_size
        );
        Ok(Self {
            image_size,
            cell_size,
        })
    }

    /// The number of cells along each side of the grid.
    pub fn grid_size(&self) -> usize {
        self.image_size / self.cell_size
    }

    /// Computes the top-left pixel coordinates of each cell.
    ///
    /// The output has shape `[batch_size, 2, grid_size, grid_size]`. Channel 0
    /// holds the x offsets, which vary along the column axis, and channel 1
    /// holds the y offsets, which vary along the row axis.
    pub fn corner_offsets(&self, batch_size: i64, device: Device) -> Tensor {
        let grid_size = self.grid_size() as i64;
        let last_corner = ((self.grid_size() - 1) * self.cell_size) as f64;

        let steps = Tensor::linspace(0.0, last_corner, grid_size, (Kind::Float, device));
        let corner_x = steps
            .view([1, grid_size])
            .expand(&[grid_size, grid_size], false);
        let corner_y = steps
            .view([grid_size, 1])
            .expand(&[grid_size, grid_size], false);

        Tensor::stack(&[corner_x, corner_y], 0)
            .unsqueeze(0)
            .repeat(&[batch_size, 1, 1, 1])
    }

    /// Rewrites box coordinates of a raw `[batch, channels, grid, grid]`
    /// output in pixel units.
    ///
    /// For each box, the center is shifted by the cell corner and scaled by
    /// the cell size, and the size is scaled by the image size. The confidence
    /// and the trailing class channels are left untouched.
    pub fn transform_predictions(&self, output: &Tensor, num_boxes: usize) -> Result<Tensor> {
        let (batch_size, channels, height, width) = output.size4()?;
        let grid_size = self.grid_size() as i64;
        let num_boxes = num_boxes as i64;
        let num_box_channels = num_boxes * BOX_ENTRIES as i64;

        ensure!(
            height == grid_size && width == grid_size,
            "expect a {}x{} output grid, but get {}x{}",
            grid_size,
            grid_size,
            height,
            width
        );
        ensure!(
            channels >= num_box_channels,
            "expect at least {} channels for {} boxes, but get {}",
            num_box_channels,
            num_boxes,
            channels
        );

        let cell_size = self.cell_size as f64;
        let image_size = self.image_size as f64;

        let corners = self
            .corner_offsets(batch_size, output.device())
            .to_kind(output.kind());
        let corner_x = corners.i((.., 0..1, .., ..));
        let corner_y = corners.i((.., 1..2, .., ..));

        // [batch, boxes, entries, grid, grid]
        let boxes = output.narrow(1, 0, num_box_channels).reshape(&[
            batch_size,
            num_boxes,
            BOX_ENTRIES as i64,
            grid_size,
            grid_size,
        ]);

        let x = boxes.i((.., .., 0i64, .., ..)) * cell_size + &corner_x;
        let y = boxes.i((.., .., 1i64, .., ..)) * cell_size + &corner_y;
        let w = boxes.i((.., .., 2i64, .., ..)) * image_size;
        let h = boxes.i((.., .., 3i64, .., ..)) * image_size;
        let confidence = boxes.i((.., .., 4i64, .., ..));

        let boxes = Tensor::stack(&[x, y, w, h, confidence], 2).reshape(&[
            batch_size,
            num_box_channels,
            grid_size,
            grid_size,
        ]);
        let classes = output.narrow(1, num_box_channels, channels - num_box_channels);

        Ok(Tensor::cat(&[boxes, classes], 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn corner_offsets_test() {
        let geometry = GridGeometry::default();
        let corners = geometry.corner_offsets(2, Device::Cpu);
        assert_eq!(corners.size(), [2, 2, 7, 7]);

        for row in 0..7 {
            for col in 0..7 {
                let x = corners.double_value(&[1, 0, row, col]);
                let y = corners.double_value(&[1, 1, row, col]);
                assert_abs_diff_eq!(x, col as f64 * 64.0, epsilon = 1e-4);
                assert_abs_diff_eq!(y, row as f64 * 64.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn corner_offsets_are_static() {
        let geometry = GridGeometry::default();
        let lhs = geometry.corner_offsets(1, Device::Cpu);
        let rhs = geometry.corner_offsets(1, Device::Cpu);
        assert!(bool::from(lhs.eq_tensor(&rhs).all()));
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        assert!(GridGeometry::new(448, 0).is_err());
        assert!(GridGeometry::new(448, 60).is_err());
        assert_eq!(GridGeometry::new(448, 64).unwrap(), GridGeometry::default());
    }

    #[test]
    fn transform_single_cell() -> Result<()> {
        let geometry = GridGeometry::default();
        let output = Tensor::zeros(&[1, 11, 7, 7], tch::kind::FLOAT_CPU);

        // second box at row 2, column 5
        let values = [0.5, 0.25, 0.1, 0.2, 0.9];
        for (entry, &value) in values.iter().enumerate() {
            let _ = output
                .i((0i64, 5 + entry as i64, 2i64, 5i64))
                .fill_(value);
        }

        let pred = geometry.transform_predictions(&output, 2)?;
        assert_abs_diff_eq!(pred.double_value(&[0, 5, 2, 5]), 5.0 * 64.0 + 32.0, epsilon = 1e-3);
        assert_abs_diff_eq!(pred.double_value(&[0, 6, 2, 5]), 2.0 * 64.0 + 16.0, epsilon = 1e-3);
        assert_abs_diff_eq!(pred.double_value(&[0, 7, 2, 5]), 44.8, epsilon = 1e-3);
        assert_abs_diff_eq!(pred.double_value(&[0, 8, 2, 5]), 89.6, epsilon = 1e-3);
        assert_abs_diff_eq!(pred.double_value(&[0, 9, 2, 5]), 0.9, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn transform_rejects_bad_shapes() {
        let geometry = GridGeometry::default();
        let small_grid = Tensor::zeros(&[1, 11, 6, 6], tch::kind::FLOAT_CPU);
        assert!(geometry.transform_predictions(&small_grid, 2).is_err());

        let few_channels = Tensor::zeros(&[1, 9, 7, 7], tch::kind::FLOAT_CPU);
        assert!(geometry.transform_predictions(&few_channels, 2).is_err());

        let flat = Tensor::zeros(&[11, 49], tch::kind::FLOAT_CPU);
        assert!(geometry.transform_predictions(&flat, 2).is_err());
    }
}
