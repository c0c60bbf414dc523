//! Parallel fan-out contract for bulk cell operations
//!
//! The interpreter proper is single-threaded; only the inner loops of
//! scalar-function application over simple arrays (and the inner/outer
//! product fast paths) may fork workers. A job runs in parallel iff the
//! result's element count exceeds the per-primitive threshold *and* the
//! host has configured more than one core. Workers write disjoint slices of
//! the result and are joined before control returns to the frame.

use apl_core::{Cell, ErrorKind};
use std::collections::HashMap;

/// Per-primitive thresholds, queryable and settable by the host
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Worker count; 1 disables fan-out entirely
    pub cores: usize,
    /// Default element-count threshold where no per-primitive entry exists
    pub default_threshold: usize,
    monadic: HashMap<char, usize>,
    dyadic: HashMap<char, usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            cores: 1,
            default_threshold: 16384,
            monadic: HashMap::new(),
            dyadic: HashMap::new(),
        }
    }
}

impl ParallelConfig {
    pub fn threshold_monadic(&self, prim: char) -> usize {
        self.monadic
            .get(&prim)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn threshold_dyadic(&self, prim: char) -> usize {
        self.dyadic
            .get(&prim)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn set_threshold_monadic(&mut self, prim: char, threshold: usize) {
        self.monadic.insert(prim, threshold);
    }

    pub fn set_threshold_dyadic(&mut self, prim: char, threshold: usize) {
        self.dyadic.insert(prim, threshold);
    }

    /// Should a job of this size fan out?
    pub fn parallel_for(&self, threshold: usize, len: usize) -> bool {
        self.cores > 1 && len > threshold
    }
}

/// Compute `len` result cells with `f`, fanning out across scoped workers
/// when the config says so. Element computations are independent and each
/// worker commits to a disjoint slice; the first error wins.
pub fn compute_cells<F>(
    cfg: &ParallelConfig,
    threshold: usize,
    len: usize,
    f: F,
) -> Result<Vec<Cell>, ErrorKind>
where
    F: Fn(usize) -> Result<Cell, ErrorKind> + Sync,
{
    if !cfg.parallel_for(threshold, len) {
        return (0..len).map(&f).collect();
    }

    let workers = cfg.cores.min(len);
    let chunk = len.div_ceil(workers);
    let mut out: Vec<Cell> = vec![Cell::Int(0); len];

    let result: Result<(), ErrorKind> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for (w, slice) in out.chunks_mut(chunk).enumerate() {
            let f = &f;
            handles.push(scope.spawn(move || -> Result<(), ErrorKind> {
                let base = w * chunk;
                for (i, cell) in slice.iter_mut().enumerate() {
                    *cell = f(base + i)?;
                }
                Ok(())
            }));
        }
        let mut first_err = None;
        for h in handles {
            if let Err(e) = h.join().map_err(|_| ErrorKind::Interrupt)? {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    result.map(|()| out)
}
