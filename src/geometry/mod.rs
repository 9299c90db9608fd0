use nalgebra::{Point2, Vector3};

/// Ordered 3-D points of a planar calibration pattern at constant depth.
///
/// The first [`WorldPointSet::line_point_count`] points are grid-line endpoints stored
/// in consecutive pairs; the rest are the centres of the interior dots.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldPointSet {
    points: Vec<Vector3<f64>>,
    line_point_count: usize,
}

impl WorldPointSet {
    /// Builds a `grid_size` x `grid_size` grid spanning `world_size` units, centred on the
    /// optical axis at distance `depth`.
    ///
    /// # Arguments
    ///
    /// * `grid_size` - Number of cells along each axis
    /// * `world_size` - Side length of the square pattern in world units
    /// * `depth` - Z coordinate shared by every point
    ///
    /// # Returns
    ///
    /// `(grid_size + 1) * 4` line endpoints followed by `(grid_size - 1)^2` dot centres.
    pub fn calibration_grid(grid_size: usize, world_size: f64, depth: f64) -> Self {
        let step = world_size / grid_size.max(1) as f64;
        let offset = -world_size / 2.0;
        let mut points = Vec::with_capacity((grid_size + 1) * 4 + grid_size.pow(2));

        for i in 0..=grid_size {
            let along = offset + i as f64 * step;
            // vertical line i
            points.push(Vector3::new(along, offset, depth));
            points.push(Vector3::new(along, -offset, depth));
            // horizontal line i
            points.push(Vector3::new(offset, along, depth));
            points.push(Vector3::new(-offset, along, depth));
        }
        let line_point_count = points.len();

        for i in 1..grid_size {
            for j in 1..grid_size {
                points.push(Vector3::new(
                    offset + i as f64 * step,
                    offset + j as f64 * step,
                    depth,
                ));
            }
        }

        Self {
            points,
            line_point_count,
        }
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn line_point_count(&self) -> usize {
        self.line_point_count
    }

    /// Endpoint pairs of the grid lines.
    pub fn line_segments(&self) -> impl Iterator<Item = (&Vector3<f64>, &Vector3<f64>)> {
        self.points[..self.line_point_count]
            .chunks_exact(2)
            .map(|pair| (&pair[0], &pair[1]))
    }

    pub fn dot_centers(&self) -> &[Vector3<f64>] {
        &self.points[self.line_point_count..]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Generate a grid of sample points that are evenly distributed across the image
///
/// # Arguments
///
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
/// * `n` - The approximate number of points to generate
///
/// # Returns
///
/// A vector of 2D points representing pixel coordinates
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Point2<f64>> {
    if width <= 0.0 || height <= 0.0 || n == 0 {
        return Vec::new();
    }

    let num_cells_x = ((n as f64 * (width / height)).sqrt().round() as usize).max(1);
    let num_cells_y = ((n as f64 * (height / width)).sqrt().round() as usize).max(1);

    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    let mut points = Vec::with_capacity(num_cells_x * num_cells_y);
    for i in 0..num_cells_y {
        for j in 0..num_cells_x {
            let x = (j as f64 + 0.5) * cell_width;
            let y = (i as f64 + 0.5) * cell_height;
            points.push(Point2::new(x, y));
        }
    }

    points
}
