use foundation::bounds::Aabb2;
use spatial::SpatialIndex;

use crate::projection::Projection;

pub const DEFAULT_CELL_SIZE_PX: f64 = 16.0;
pub const DEFAULT_CELL_LIMIT: usize = 3;

/// Density-limited viewport query.
///
/// The viewport is cut into square pixel cells and each cell contributes at
/// most `limit` hits, so dense areas cannot crowd out sparse ones and the
/// result never exceeds `cells × limit` entries.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewportSampler {
    pub cell_size_px: f64,
    pub limit: usize,
}

impl Default for ViewportSampler {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE_PX, DEFAULT_CELL_LIMIT)
    }
}

impl ViewportSampler {
    pub fn new(cell_size_px: f64, limit: usize) -> Self {
        Self {
            cell_size_px,
            limit,
        }
    }

    /// Geographic extents of the grid cells, row-major.
    pub fn partition<P: Projection + ?Sized>(&self, projection: &P) -> Vec<Aabb2> {
        let step = self.cell_size_px;
        if !(step.is_finite() && step > 0.0) {
            return Vec::new();
        }
        let [min, max] = projection.clip_extent();

        let mut cells = Vec::new();
        let mut y = min[1];
        while y < max[1] {
            let mut x = min[0];
            while x < max[0] {
                cells.push(Aabb2::from_corners(
                    projection.invert([x, y + step]),
                    projection.invert([x + step, y]),
                ));
                x += step;
            }
            y += step;
        }
        cells
    }

    pub fn sample<'a, T, P>(&self, projection: &P, index: &'a SpatialIndex<T>) -> Vec<&'a T>
    where
        P: Projection + ?Sized,
    {
        self.partition(projection)
            .iter()
            .flat_map(|cell| index.search(cell).into_iter().take(self.limit))
            .collect()
    }
}

/// Geographic extent of the whole viewport.
pub fn viewport_extent<P: Projection + ?Sized>(projection: &P) -> Aabb2 {
    let [min, max] = projection.clip_extent();
    Aabb2::from_corners(
        projection.invert([min[0], max[1]]),
        projection.invert([max[0], min[1]]),
    )
}

#[cfg(test)]
mod tests {
    use super::{ViewportSampler, viewport_extent};
    use crate::projection::{Mercator, Projection};
    use foundation::bounds::Aabb2;
    use spatial::SpatialIndex;

    fn view() -> Mercator {
        Mercator::centered([13.4, 52.5], 17.0, [160.0, 96.0])
    }

    #[test]
    fn partition_counts_partial_cells() {
        let p = Mercator::centered([13.4, 52.5], 17.0, [100.0, 40.0]);
        // ceil(100/16) × ceil(40/16) = 7 × 3.
        assert_eq!(ViewportSampler::default().partition(&p).len(), 21);
    }

    #[test]
    fn dense_data_is_capped_per_cell() {
        let p = view();
        let mut index = SpatialIndex::new();
        // 10 × 6 cells of 16px; drop 50 points in the middle of every cell.
        let mut batch = Vec::new();
        for row in 0..6 {
            for col in 0..10 {
                let ll = p.invert([col as f64 * 16.0 + 8.0, row as f64 * 16.0 + 8.0]);
                for i in 0..50 {
                    batch.push((Aabb2::point(ll), (row, col, i)));
                }
            }
        }
        index.load(batch);

        let sampler = ViewportSampler::default();
        let hits = sampler.sample(&p, &index);
        assert_eq!(hits.len(), 60 * 3);
        assert!(hits.len() <= sampler.partition(&p).len() * sampler.limit);
    }

    #[test]
    fn sparse_cells_are_not_starved() {
        let p = view();
        let mut index = SpatialIndex::new();
        let dense = p.invert([8.0, 8.0]);
        let lonely = p.invert([150.0, 90.0]);
        let mut batch: Vec<_> = (0..100).map(|i| (Aabb2::point(dense), i)).collect();
        batch.push((Aabb2::point(lonely), 1000));
        index.load(batch);

        let hits = ViewportSampler::default().sample(&p, &index);
        assert_eq!(hits.len(), 4);
        assert!(hits.contains(&&1000));
    }

    #[test]
    fn viewport_extent_spans_the_view() {
        let p = view();
        let e = viewport_extent(&p);
        assert!(e.contains_point([13.4, 52.5]));
        assert!(e.min[0] < e.max[0] && e.min[1] < e.max[1]);
        let corner = p.invert([0.0, 0.0]);
        assert!((e.min[0] - corner[0]).abs() < 1e-12);
        assert!((e.max[1] - corner[1]).abs() < 1e-12);
    }
}
