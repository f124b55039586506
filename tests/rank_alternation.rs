use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use proptest::prelude::*;

use edm_completion::{mask::observed_count, structure::EdmProperties, EdmError, RankAlternation};

mod common;

#[test]
fn line_recovery() {
    // points 0, 1, 2 and 4 on a line, the distance between the outer two is missing
    let truth = common::edm_of(&array![[0.], [1.], [2.], [4.]]);
    let mut masked = truth.clone();
    masked[(0, 3)] = 0.;
    masked[(3, 0)] = 0.;

    let (edm, errors) = RankAlternation::new(3)
        .max_iter(5000)
        .complete(&masked, Some(truth.view()))
        .unwrap();
    assert_abs_diff_eq!(edm[(0, 3)], 16., epsilon = 1e-2);
    assert_abs_diff_eq!(edm[(3, 0)], 16., epsilon = 1e-2);
    assert_eq!(errors.len(), 5000);
    assert!(errors[4999] < errors[0]);
}

#[test]
fn nothing_observed() {
    let masked = Array2::<f64>::zeros((4, 4));
    assert!(matches!(
        RankAlternation::new(2).complete(&masked, None),
        Err(EdmError::NoObservations)
    ));
}

#[test]
fn complete_edm_is_fixed_point() {
    let truth = common::edm_of(&array![[0., 0.], [1., 0.], [0., 2.], [3., 1.], [-1., 1.]]);
    let (edm, errors) = RankAlternation::new(4)
        .max_iter(5)
        .complete(&truth, Some(truth.view()))
        .unwrap();
    assert_eq!(edm, truth);
    assert!(errors.iter().all(|&e| e == 0.));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]
    #[test]
    fn structural_invariants((_, masked) in common::masked_edm(), rank in 1usize..4, max_iter in 1usize..20) {
        let n = masked.nrows();
        prop_assume!(rank < n && observed_count(&masked) > 0);

        let (edm, _) = RankAlternation::new(rank)
            .max_iter(max_iter)
            .complete(&masked, None)
            .unwrap();

        assert!(edm.diag().iter().all(|&d| d == 0.));
        assert!(edm.iter().all(|&x| x >= 0.));
        assert!(edm.is_symmetric(0.));
        assert!(edm.is_edm(0.));
        // measurements of a symmetric input survive exactly
        for ((i, j), &m) in masked.indexed_iter() {
            if m > 0. {
                assert_eq!(edm[(i, j)], m);
            }
        }
    }
}
