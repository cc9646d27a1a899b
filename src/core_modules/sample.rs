// THEORY:
// `Sample` is the numeric policy every accumulator is generic over. It answers
// two questions the reductions cannot answer on their own:
//
// 1.  **Identity sentinels**: what value does a fresh min slot hold so that any
//     real sample replaces it on first comparison? The type's largest value.
//     And a fresh max slot? The type's lowest value. This must hold for signed,
//     unsigned and floating point samples alike, so it comes from `Bounded`
//     rather than from literals.
// 2.  **Widening**: histograms and moments work in `f64`. Every sample type can
//     be widened losslessly except 64-bit integers beyond 2^53, which round.

use num_traits::{Bounded, ToPrimitive, Zero};
use std::fmt::Debug;

pub trait Sample:
    Copy + PartialOrd + Debug + Send + Sync + Bounded + ToPrimitive + Zero + 'static
{
    /// Initial value of a min-tracking slot.
    #[inline]
    fn min_sentinel() -> Self {
        Self::max_value()
    }

    /// Initial value of a max-tracking slot.
    #[inline]
    fn max_sentinel() -> Self {
        Self::min_value()
    }

    #[inline]
    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }

    /// Only floats can be NaN; a NaN never compares equal to itself.
    #[inline]
    fn is_nan(self) -> bool {
        self.partial_cmp(&self).is_none()
    }
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(impl Sample for $t {})*
    };
}

impl_sample!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);
