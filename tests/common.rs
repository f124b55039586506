#![allow(unused)]

use std::ops::RangeInclusive;

use ndarray::prelude::*;
use proptest::prelude::*;
use proptest_derive::Arbitrary;

const FLOAT_RANGE: RangeInclusive<f64> = -100.0..=100.0;
const COORD_RANGE: RangeInclusive<f64> = -10.0..=10.0;
const DIM_RANGE: RangeInclusive<usize> = 2..=8;
const POINTS_RANGE: RangeInclusive<usize> = 4..=9;
const EMBED_RANGE: RangeInclusive<usize> = 1..=3;

#[derive(Debug, Arbitrary)]
struct Layout {
    invert_rows: bool,
    invert_cols: bool,
    transpose: bool,
}

impl Layout {
    fn apply(&self, mut arr: Array2<f64>) -> Array2<f64> {
        if self.invert_rows {
            arr.invert_axis(Axis(0));
        }
        if self.invert_cols {
            arr.invert_axis(Axis(1));
        }
        if self.transpose {
            arr.reversed_axes()
        } else {
            arr
        }
    }
}

prop_compose! {
    pub fn square_arr()(dim in DIM_RANGE)
        (data in prop::collection::vec(FLOAT_RANGE, dim*dim), dim in Just(dim), layout in any::<Layout>()) -> Array2<f64> {
        layout.apply(Array2::from_shape_vec((dim, dim), data).unwrap())
    }
}

fn to_symm(arr: &mut Array2<f64>) {
    let n = arr.nrows();
    for i in 0..n {
        for j in 0..i {
            arr[(i, j)] = arr[(j, i)];
        }
    }
}

prop_compose! {
    pub fn symm_arr()(mut arr in square_arr()) -> Array2<f64> {
        to_symm(&mut arr);
        arr
    }
}

prop_compose! {
    /// `B Bᵗ` for a random square `B`, scaled down to keep entries moderate
    pub fn psd_arr()(arr in square_arr()) -> Array2<f64> {
        arr.dot(&arr.t()) / 100.
    }
}

prop_compose! {
    /// Coordinates of `n` points in `d` dimensions, one point per row
    pub fn point_cloud()(n in POINTS_RANGE, d in EMBED_RANGE)
        (data in prop::collection::vec(COORD_RANGE, n*d), n in Just(n), d in Just(d)) -> Array2<f64> {
        Array2::from_shape_vec((n, d), data).unwrap()
    }
}

/// Squared distances between the rows of `points`
pub fn edm_of(points: &Array2<f64>) -> Array2<f64> {
    let n = points.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        let diff = &points.row(i) - &points.row(j);
        diff.dot(&diff)
    })
}

prop_compose! {
    /// EDM of a random point cloud together with a symmetric mask that hides some off-diagonal
    /// entries. The pair (0, 1) always stays observed.
    pub fn masked_edm()(points in point_cloud())
        (hidden in prop::collection::vec(any::<bool>(), points.nrows() * points.nrows()), points in Just(points))
        -> (Array2<f64>, Array2<f64>) {
        let edm = edm_of(&points);
        let n = edm.nrows();
        let mut masked = edm.clone();
        for i in 0..n {
            for j in 0..i {
                if hidden[i * n + j] && (i, j) != (1, 0) {
                    masked[(i, j)] = 0.;
                    masked[(j, i)] = 0.;
                }
            }
        }
        (edm, masked)
    }
}
