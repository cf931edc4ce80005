//! Per-layer fan-out.
//!
//! With the `parallel` feature, work is spread over the rayon global pool;
//! without it, the same closures run in order on the calling thread. Either
//! way results come back in index order and the first error wins.

/// Runs `f(i)` for every `i` in `0..count`, collecting the results in order.
pub(crate) fn try_map_range<T, E, F>(count: usize, f: F) -> Result<Vec<T>, E>
where
    T: Send,
    E: Send,
    F: Fn(usize) -> Result<T, E> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        (0..count).into_par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        (0..count).map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_keep_index_order() {
        let out: Result<Vec<usize>, ()> = try_map_range(100, |i| Ok(i * 2));
        assert_eq!(out.unwrap(), (0..100).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn errors_propagate() {
        let out: Result<Vec<usize>, usize> =
            try_map_range(10, |i| if i == 7 { Err(i) } else { Ok(i) });
        assert_eq!(out, Err(7));
    }
}
