use std::num::NonZeroUsize;

use glam::Vec3;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kornia_3d::grid::{is_valid, Grid, GridView};
use kornia_lie::SE3;
use rayon::prelude::*;

/// A neighbor returned by a [`NearestNeighborSearch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// The row-major index of the point in the searched cloud.
    pub index: usize,
    /// The squared Euclidean distance to the query.
    pub distance_squared: f32,
}

/// A nearest neighbor index over a fixed point set.
pub trait NearestNeighborSearch: Send + Sync {
    /// Find up to `k` neighbors of `query`, closest first.
    ///
    /// `eps` allows approximate answers within a factor `1 + eps` of the true distance.
    fn search(&self, query: &[f32; 3], k: usize, eps: f32) -> Vec<Neighbor>;
}

/// An exact k-d tree over the valid points of a cloud.
pub struct KdTreeSearch {
    tree: Option<ImmutableKdTree<f32, u32, 3, 32>>,
    // position in the tree -> index in the original cloud
    indices: Vec<usize>,
}

impl KdTreeSearch {
    /// Index the valid points of `points`. Invalid points are never returned.
    pub fn new(points: &Grid<Vec3>) -> Self {
        let (indices, valid): (Vec<usize>, Vec<[f32; 3]>) = points
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, p)| is_valid(**p))
            .map(|(i, p)| (i, p.to_array()))
            .unzip();

        let tree = (!valid.is_empty()).then(|| ImmutableKdTree::new_from_slice(&valid));
        Self { tree, indices }
    }

    /// The number of indexed points.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether no point is indexed.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn neighbor(&self, item: u32, distance_squared: f32) -> Option<Neighbor> {
        self.indices.get(item as usize).map(|&index| Neighbor {
            index,
            distance_squared,
        })
    }
}

impl NearestNeighborSearch for KdTreeSearch {
    // the tree answers exactly, which satisfies any eps
    fn search(&self, query: &[f32; 3], k: usize, _eps: f32) -> Vec<Neighbor> {
        let (Some(tree), Some(k)) = (&self.tree, NonZeroUsize::new(k)) else {
            return Vec::new();
        };

        if k.get() == 1 {
            let nn = tree.nearest_one::<kiddo::SquaredEuclidean>(query);
            return self.neighbor(nn.item, nn.distance).into_iter().collect();
        }

        tree.nearest_n::<kiddo::SquaredEuclidean>(query, k)
            .into_iter()
            .filter_map(|nn| self.neighbor(nn.item, nn.distance))
            .collect()
    }
}

/// Associate every `downsample`-th valid observed point with its nearest model point.
///
/// # Arguments
///
/// * `search` - The index over the model cloud.
/// * `observed` - The observed cloud.
/// * `model_from_observed` - The pose used to move observed points into the model frame.
/// * `downsample` - The stride over the row-major observed cells. Zero acts like one.
///
/// # Returns
///
/// The correspondence map with the shape of `observed` and the number of associations.
pub fn find_correspondences<S: NearestNeighborSearch>(
    search: &S,
    observed: GridView<'_, Vec3>,
    model_from_observed: &SE3,
    downsample: usize,
) -> (Grid<Option<usize>>, usize) {
    let stride = downsample.max(1);
    let width = observed.width();

    let associations: Vec<Option<usize>> = (0..observed.len())
        .into_par_iter()
        .map(|i| {
            let p = *observed.get(i % width, i / width)?;
            if i % stride != 0 || !is_valid(p) {
                return None;
            }
            let query = model_from_observed.transform_point(p).to_array();
            search.search(&query, 1, 0.0).first().map(|nn| nn.index)
        })
        .collect();

    let count = associations.iter().filter(|a| a.is_some()).count();
    log::debug!("associated {} of {} observed points", count, observed.len());

    let grid = Grid::from_fn(width, observed.height(), |x, y| associations[y * width + x]);
    (grid, count)
}
