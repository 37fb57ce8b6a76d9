//! Dense vector primitives for the CPU device. Reductions accumulate in `f64`
//! per tile and combine the tile results.

use crate::device::ElementwiseOp;
use crate::traits::Real;
use rayon::prelude::*;

pub(crate) fn fill<T: Real>(pool: &rayon::ThreadPool, tile: usize, value: T, y: &mut [T]) {
    pool.install(|| y.par_iter_mut().with_min_len(tile).for_each(|v| *v = value));
}

pub(crate) fn scale<T: Real>(pool: &rayon::ThreadPool, tile: usize, alpha: T, y: &mut [T]) {
    pool.install(|| y.par_iter_mut().with_min_len(tile).for_each(|v| *v = alpha * *v));
}

pub(crate) fn axpy<T: Real>(pool: &rayon::ThreadPool, tile: usize, alpha: T, x: &[T], y: &mut [T]) {
    pool.install(|| {
        y.par_iter_mut()
            .zip(x.par_iter())
            .with_min_len(tile)
            .for_each(|(yi, &xi)| *yi += alpha * xi)
    });
}

pub(crate) fn axpby<T: Real>(
    pool: &rayon::ThreadPool,
    tile: usize,
    alpha: T,
    x: &[T],
    beta: T,
    y: &mut [T],
) {
    pool.install(|| {
        y.par_iter_mut()
            .zip(x.par_iter())
            .with_min_len(tile)
            .for_each(|(yi, &xi)| {
                *yi = if beta == T::zero() {
                    alpha * xi
                } else {
                    alpha * xi + beta * *yi
                }
            })
    });
}

/// Sums `f(i)` over `0..len`, one `f64` partial per tile.
fn tiled_sum<F>(pool: &rayon::ThreadPool, tile: usize, len: usize, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync,
{
    pool.install(|| {
        (0..len.div_ceil(tile))
            .into_par_iter()
            .map(|t| {
                let end = ((t + 1) * tile).min(len);
                (t * tile..end).map(&f).sum::<f64>()
            })
            .sum()
    })
}

pub(crate) fn dot<T: Real>(pool: &rayon::ThreadPool, tile: usize, x: &[T], y: &[T]) -> T {
    T::cast_f64(tiled_sum(pool, tile, x.len(), |i| {
        x[i].into_f64() * y[i].into_f64()
    }))
}

pub(crate) fn nrm1<T: Real>(pool: &rayon::ThreadPool, tile: usize, x: &[T]) -> T {
    T::cast_f64(tiled_sum(pool, tile, x.len(), |i| x[i].into_f64().abs()))
}

pub(crate) fn nrm2<T: Real>(pool: &rayon::ThreadPool, tile: usize, x: &[T]) -> T {
    T::cast_f64(
        tiled_sum(pool, tile, x.len(), |i| {
            let v = x[i].into_f64();
            v * v
        })
        .sqrt(),
    )
}

pub(crate) fn reduce<T: Real>(pool: &rayon::ThreadPool, tile: usize, x: &[T]) -> T {
    T::cast_f64(tiled_sum(pool, tile, x.len(), |i| x[i].into_f64()))
}

pub(crate) fn elementwise<T: Real>(
    pool: &rayon::ThreadPool,
    tile: usize,
    op: ElementwiseOp,
    x: &[T],
    y: &[T],
    z: &mut [T],
) {
    pool.install(|| {
        z.par_iter_mut()
            .zip(x.par_iter().zip(y.par_iter()))
            .with_min_len(tile)
            .for_each(|(zi, (&xi, &yi))| *zi = op.apply(xi, yi))
    });
}
