use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::ArrayView1;
use num_traits::Float;

static NEXT_OWNER: AtomicUsize = AtomicUsize::new(0);

/// Identity stamped into handles so a handle from one container is rejected by another.
pub(crate) fn next_owner_id() -> usize {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

pub trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default + Clone> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.reserve(len);
        self.extend(std::iter::repeat_n(T::default(), len));
    }
}

/// Index of the value closest to `target`. Ties resolve to the first occurrence.
/// NaN entries never win; `None` only for an empty (or all-NaN) view.
pub fn nearest_index<T: Float>(values: ArrayView1<T>, target: T) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    for (i, &v) in values.iter().enumerate() {
        let diff = (v - target).abs();
        if diff.is_nan() {
            continue;
        }
        match best {
            Some((_, d)) if diff >= d => {}
            _ => best = Some((i, diff)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nearest_index() {
        let x = array![0.0, 0.5, 1.0, 1.5, 2.0];
        assert_eq!(nearest_index(x.view(), 1.1), Some(2));
        assert_eq!(nearest_index(x.view(), -3.0), Some(0));
        assert_eq!(nearest_index(x.view(), 9.0), Some(4));
    }

    #[test]
    fn test_nearest_index_tie_takes_first() {
        let x = array![0.0, 1.0, 2.0];
        assert_eq!(nearest_index(x.view(), 0.5), Some(0));

        let dup = array![3.0, 1.0, 1.0];
        assert_eq!(nearest_index(dup.view(), 1.0), Some(1));
    }

    #[test]
    fn test_nearest_index_empty() {
        let x = ndarray::Array1::<f64>::zeros(0);
        assert_eq!(nearest_index(x.view(), 1.0), None);
    }

    #[test]
    fn test_zero_len() {
        let mut v = vec![1.0, 2.0];
        v.zero_len(4);
        assert_eq!(v, vec![0.0; 4]);
    }
}
