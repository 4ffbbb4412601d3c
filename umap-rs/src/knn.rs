use crate::dist::{DistanceType, Q};
use anyhow::{bail, Error};
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use noisy_float::checkers::NumChecker;
use noisy_float::NoisyFloat;
use num_traits::Bounded;
use rayon::prelude::*;
use vpsearch::{BestCandidate, MetricSpace, Tree};

type Metric = NoisyFloat<Q, NumChecker>;

/// One row of the input, remembered with its index
#[derive(Clone, Debug)]
pub struct Sample<'a> {
    data: ArrayView1<'a, Q>,
    pub idx: usize,
}

/// Rows are compared with the metric form of the distance (see [`DistanceType::metric`]), which
/// satisfies the triangle inequality the vantage-point tree prunes with.
impl MetricSpace for Sample<'_> {
    type UserData = DistanceType;
    type Distance = Metric;

    fn distance(&self, other: &Self, distance: &Self::UserData) -> Self::Distance {
        NoisyFloat::new(distance.metric(self.data, other.data))
    }
}

/// The `max_item_count` closest items seen so far, ordered by distance and then index
struct CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    max_item_count: usize,
    // distance of the current last item, or the maximum while the list is not full
    max_observed_distance: Item::Distance,
    distance_x_index: Vec<(Item::Distance, usize)>,
}

impl<Item, Impl> CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    fn new(max_item_count: usize) -> Self {
        CountBasedNeighborhood {
            max_item_count,
            max_observed_distance: <Item::Distance as Bounded>::max_value(),
            distance_x_index: Vec::with_capacity(max_item_count + 1),
        }
    }

    fn clear(&mut self) {
        self.max_observed_distance = <Item::Distance as Bounded>::max_value();
        self.distance_x_index.clear();
    }

    fn insert_index(&mut self, index: usize, distance: Item::Distance) {
        let val = (distance, index);
        let idx = self.distance_x_index.binary_search(&val).unwrap_or_else(|x| x);
        self.distance_x_index.insert(idx, val);
        if self.distance_x_index.len() >= self.max_item_count {
            self.distance_x_index.truncate(self.max_item_count);
            if let Some(&(d, _)) = self.distance_x_index.last() {
                self.max_observed_distance = d;
            }
        }
    }
}

impl<'a, Item, Impl> BestCandidate<Item, Impl> for &'a mut CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl> + Clone,
    Item::Distance: Ord,
{
    type Output = std::iter::Cloned<std::slice::Iter<'a, (Item::Distance, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Item, distance: Item::Distance, candidate_index: usize, _: &Item::UserData) {
        if self.max_item_count == 0 {
            return;
        }
        let full = self.distance_x_index.len() >= self.max_item_count;
        // equally distant candidates are kept in index order
        let closer = self
            .distance_x_index
            .last()
            .map_or(true, |&last| (distance, candidate_index) < last);
        if !full || closer {
            self.insert_index(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> Item::Distance {
        self.max_observed_distance
    }

    fn result(self, _: &Item::UserData) -> Self::Output {
        self.distance_x_index.as_slice().iter().cloned()
    }
}

/// The `k` nearest neighbours of every row of `x`, excluding the row itself, found with a
/// vantage-point tree. Neighbours are sorted by increasing distance, ties broken by index.
/// Returns `(indices, distances)`, both `rows x k`.
pub fn nearest_neighbors(
    x: ArrayView2<Q>,
    k: usize,
    distance: DistanceType,
) -> Result<(Array2<usize>, Array2<Q>), Error> {
    let n = x.nrows();
    if k >= n {
        bail!("{k} neighbors requested, but only {} other points available", n.saturating_sub(1));
    }
    if x.iter().any(|v| !v.is_finite()) {
        bail!("cannot search neighbors of non-finite points");
    }

    info!("building a vantage-point tree of {n} points for {k} neighbors");
    let samples: Vec<Sample> = x
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(idx, data)| Sample { data, idx })
        .collect();
    let vp = Tree::new_with_user_data_ref(&samples, &distance);

    let mut indices = Array2::from_elem((n, k), usize::MAX);
    let mut distances = Array2::from_elem((n, k), Q::INFINITY);
    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip_eq(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(k + 1),
            |neighborhood, (row, (mut indices, mut distances))| {
                neighborhood.clear();
                let query = &samples[row];
                let mut j = 0;
                for (metric, idx) in vp.find_nearest_custom(query, &distance, neighborhood) {
                    if idx != query.idx && j < k {
                        indices[j] = idx;
                        distances[j] = distance.metric_to_distance(metric.raw());
                        j += 1;
                    }
                }
            },
        );
    Ok((indices, distances))
}
