//! Observation masks of partially measured EDMs
//!
//! An entry of a masked EDM is observed iff it is strictly positive. Zero marks a missing
//! measurement, including on the diagonal, where the distance is known anyway.

use ndarray::{Array2, ArrayBase, ArrayView2, Data, Ix2, NdFloat, Zip};
use num_traits::NumCast;

use crate::{check_shape, EdmError, Result};

/// Boolean mask of the observed entries, `true` where `edm > 0`
pub fn observation_mask<A, S>(edm: &ArrayBase<S, Ix2>) -> Array2<bool>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    edm.mapv(|x| x > A::zero())
}

/// Number of observed entries
pub fn observed_count<A, S>(edm: &ArrayBase<S, Ix2>) -> usize
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    edm.iter().filter(|&&x| x > A::zero()).count()
}

/// Mean of the observed entries
///
/// Fails with [`EdmError::NoObservations`] if nothing was observed.
pub fn observed_mean<A, S>(edm: &ArrayBase<S, Ix2>) -> Result<A>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    let (sum, count) = edm.fold((A::zero(), 0usize), |(sum, count), &x| {
        if x > A::zero() {
            (sum + x, count + 1)
        } else {
            (sum, count)
        }
    });
    if count == 0 {
        return Err(EdmError::NoObservations);
    }
    let count: A = NumCast::from(count).unwrap();
    Ok(sum / count)
}

/// Weight matrix used when fitting the observed entries.
///
/// Without caller weights this is the observation mask as `0`/`1`. Caller weights must match the
/// shape of `edm` and are zeroed wherever `edm` is unobserved, so a weight never applies to a
/// distance that was not measured.
pub fn mask_weights<A, S>(
    edm: &ArrayBase<S, Ix2>,
    weights: Option<ArrayView2<A>>,
) -> Result<Array2<A>>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    match weights {
        None => Ok(edm.mapv(|x| if x > A::zero() { A::one() } else { A::zero() })),
        Some(weights) => {
            check_shape(&weights, edm.dim())?;
            let mut masked = weights.to_owned();
            Zip::from(&mut masked).and(edm).for_each(|w, &x| {
                if x <= A::zero() {
                    *w = A::zero();
                }
            });
            Ok(masked)
        }
    }
}
