use crate::amg::AmgHierarchy;
use crate::common::{CancellationToken, Config, Error, SolveStrategy};
use crate::sparse::{CsrMatrix, CsrOps};
use crate::system::ReducedSystem;
use log::{debug, trace, warn};
use rayon::prelude::*;
use std::time::Instant;

/// Outcome of the conjugate gradient for one class column.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSolve {
    /// Dense class index, `0..K`.
    pub class: usize,
    pub iterations: usize,
    /// Final relative residual `||r|| / ||b||`.
    pub residual: f64,
    pub converged: bool,
}

/// Dense `K x num_unlabeled` matrix, entry `(c, v)` approximates the probability that a walker
/// starting at voxel `v` first reaches a seed of class `c`.
#[derive(Debug, Clone)]
pub struct ProbabilityMatrix {
    pub num_classes: usize,
    pub num_unlabeled: usize,
    /// Row-major, one row per class.
    pub data: Vec<f64>,
}

impl ProbabilityMatrix {
    pub fn from_rows(rows: Vec<Vec<f64>>, num_unlabeled: usize) -> Self {
        let num_classes = rows.len();
        let mut data = Vec::with_capacity(num_classes * num_unlabeled);
        for row in rows {
            assert_eq!(row.len(), num_unlabeled);
            data.extend(row);
        }
        Self {
            num_classes,
            num_unlabeled,
            data,
        }
    }

    #[inline]
    pub fn get(&self, class: usize, voxel: usize) -> f64 {
        self.data[class * self.num_unlabeled + voxel]
    }

    pub fn class_row(&self, class: usize) -> &[f64] {
        &self.data[class * self.num_unlabeled..(class + 1) * self.num_unlabeled]
    }

    /// Class with the highest probability at unknown `voxel`. Ties go to the lower class.
    pub fn argmax(&self, voxel: usize) -> usize {
        let mut best = 0;
        let mut best_value = f64::NEG_INFINITY;
        for class in 0..self.num_classes {
            let v = self.get(class, voxel);
            if v > best_value {
                best = class;
                best_value = v;
            }
        }
        best
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

/// Preconditioned conjugate gradient from a zero initial guess.
///
/// Stops when `||r|| <= tol * ||b||` or after `max_iterations`. Cancellation is checked before
/// every iteration.
pub fn pcg(
    a: &CsrMatrix,
    b: &[f64],
    preconditioner: &AmgHierarchy,
    tol: f64,
    max_iterations: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<f64>, usize, f64, bool), Error> {
    let n = b.len();
    let mut x = vec![0.0; n];
    let b_norm = dot(b, b).sqrt();
    if b_norm == 0.0 {
        return Ok((x, 0, 0.0, true));
    }
    let mut r = b.to_vec();
    let mut z = preconditioner.apply(&r);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    let mut ap = vec![0.0; n];
    let mut residual = 1.0;
    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        a.spmv_into(&p, &mut ap);
        let pap = dot(&p, &ap);
        if pap.is_nan() || pap <= 0.0 {
            warn!("conjugate gradient breakdown at iteration {iteration}, p'Ap = {pap}");
            return Ok((x, iteration, residual, false));
        }
        let alpha = rz / pap;
        x.iter_mut().zip(&p).for_each(|(x, p)| *x += alpha * p);
        r.iter_mut().zip(&ap).for_each(|(r, ap)| *r -= alpha * ap);
        residual = dot(&r, &r).sqrt() / b_norm;
        trace!("cg iteration {iteration}: relative residual {residual:e}");
        if residual <= tol {
            return Ok((x, iteration, residual, true));
        }
        z = preconditioner.apply(&r);
        let rz_next = dot(&r, &z);
        let beta = rz_next / rz;
        rz = rz_next;
        p.iter_mut().zip(&z).for_each(|(p, z)| *p = z + beta * *p);
    }
    Ok((x, max_iterations, residual, false))
}

/// Solves every class column of the reduced system with one shared preconditioner.
pub fn solve_linear_system(
    system: &ReducedSystem,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<(ProbabilityMatrix, Vec<ClassSolve>), Error> {
    let start = Instant::now();
    let amg = AmgHierarchy::new(&system.a, &config.amg);
    debug!(
        "amg setup: {} levels in {:?}",
        amg.num_levels(),
        start.elapsed()
    );

    let solve_class = |class: usize| -> Result<(Vec<f64>, ClassSolve), Error> {
        let (x, iterations, residual, converged) = pcg(
            &system.a,
            &system.rhs[class],
            &amg,
            config.tol,
            config.max_iterations,
            cancel,
        )?;
        Ok((
            x,
            ClassSolve {
                class,
                iterations,
                residual,
                converged,
            },
        ))
    };
    let classes = 0..system.rhs.len();
    let results: Vec<(Vec<f64>, ClassSolve)> = match config.solve_strategy {
        SolveStrategy::SingleThread => classes.map(solve_class).collect::<Result<_, _>>()?,
        SolveStrategy::PerClassParallel => classes
            .into_par_iter()
            .map(solve_class)
            .collect::<Result<_, _>>()?,
    };

    let (rows, stats): (Vec<Vec<f64>>, Vec<ClassSolve>) = results.into_iter().unzip();
    for s in stats.iter().filter(|s| !s.converged) {
        warn!(
            "class {} did not converge: {} iterations, relative residual {:e}",
            s.class, s.iterations, s.residual
        );
    }
    debug!("solved {} classes in {:?}", stats.len(), start.elapsed());
    Ok((
        ProbabilityMatrix::from_rows(rows, system.unlabeled.len()),
        stats,
    ))
}
