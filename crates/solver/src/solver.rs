//! Gauss-Newton solve loop over the linked sketch.
//!
//! Each iteration evaluates the residual vector `r` and Jacobian `J` from
//! the symbolic rows, forms the normal matrix `N = J·Jᵀ`, solves `N·y = r`
//! by Gaussian elimination with partial pivoting, and applies the correction
//! `Δ = Jᵀ·y` to the free parameters. Pivots below [`PIVOT_EPSILON`] mark
//! rank-deficient rows; those rows are skipped and the solve continues
//! best-effort rather than aborting. No line search, no damping.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::expr::EvalScope;
use crate::link::{relink, LinkedState};
use crate::sketch::Sketch;

/// Pivots smaller than this are treated as rank deficiency and skipped.
const PIVOT_EPSILON: f64 = 1e-10;

/// Configuration for [`solve_sketch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Absolute residual tolerance: converged when every `|r_i| <= tolerance`.
    pub tolerance: f64,
    /// Inclusive bound on correction steps. Zero tests convergence without
    /// stepping.
    pub max_steps: u32,
    /// Restore the pre-solve parameter snapshot when the solve fails.
    pub rollback_on_failure: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_steps: 32,
            rollback_on_failure: false,
        }
    }
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    /// Correction steps taken.
    pub iterations: u32,
    /// Largest residual magnitude at the final evaluation.
    pub max_residual: f64,
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("solver did not converge after {iterations} iterations (max residual: {max_residual})")]
    DidNotConverge { iterations: u32, max_residual: f64 },
}

/// Solve the sketch's constraints, mutating its parameters in place.
///
/// Relinks first if the sketch is dirty. A sketch with no live constraints
/// or no free parameters converges immediately. On failure the parameters
/// keep their final iterate unless `rollback_on_failure` is set.
pub fn solve_sketch(
    sketch: &mut Sketch,
    options: &SolveOptions,
) -> Result<SolveReport, SolveError> {
    relink(sketch);

    let m = sketch.linked.constraints.len();
    let n = sketch.linked.params.len();
    if m == 0 || n == 0 {
        return Ok(SolveReport {
            iterations: 0,
            max_residual: 0.0,
        });
    }

    snapshot_params(sketch);

    let mut rhs = vec![0.0; m];
    let mut iterations = 0u32;

    loop {
        let max_residual = evaluate_residuals(sketch);
        if max_residual <= options.tolerance {
            debug!(iterations, max_residual, "sketch converged");
            return Ok(SolveReport {
                iterations,
                max_residual,
            });
        }
        if iterations == options.max_steps {
            if options.rollback_on_failure {
                restore_params(sketch);
            }
            return Err(SolveError::DidNotConverge {
                iterations,
                max_residual,
            });
        }

        evaluate_jacobian(sketch);
        assemble_normal(sketch);
        gather_rhs(sketch, &mut rhs);
        {
            let linked = &mut sketch.linked;
            gaussian_eliminate(&mut linked.normal, &mut rhs, m);
            back_substitute(&linked.normal, &rhs, &mut linked.solution, m);
        }
        apply_corrections(sketch);

        iterations += 1;
        debug!(step = iterations, max_residual, "applied correction step");
    }
}

/// Evaluates every live constraint's residual into its row; returns the
/// largest magnitude.
fn evaluate_residuals(sketch: &mut Sketch) -> f64 {
    let Sketch {
        params,
        entities,
        constraints,
        linked,
        ..
    } = sketch;

    let mut max_residual = 0.0f64;
    for &handle in &linked.constraints {
        let cons = constraints
            .get_mut(handle)
            .expect("linked constraint missing from table");
        let scope = EvalScope::new(params, entities, &cons.entities, &cons.params);
        let err = cons.eq.eval(&scope);
        cons.row.err = err;
        max_residual = max_residual.max(err.abs());
    }
    max_residual
}

/// Evaluates every symbolic partial into the rows' value vectors.
fn evaluate_jacobian(sketch: &mut Sketch) {
    let Sketch {
        params,
        entities,
        constraints,
        linked,
        ..
    } = sketch;

    // Derivative trees are fully expanded at link time, so a free scope
    // (no slot arrays) resolves everything they contain.
    let scope = EvalScope::new(params, entities, &[], &[]);
    for &handle in &linked.constraints {
        let cons = constraints
            .get_mut(handle)
            .expect("linked constraint missing from table");
        for j in 0..cons.row.dervs.len() {
            let value = cons.row.dervs[j].eval(&scope);
            cons.row.dervs_y[j] = value;
        }
    }
}

/// Forms `N = J·Jᵀ` (column-major) from the evaluated rows. Exact zeros
/// short-circuit the inner product.
fn assemble_normal(sketch: &mut Sketch) {
    let Sketch {
        constraints, linked, ..
    } = sketch;

    let m = linked.constraints.len();
    let n = linked.params.len();
    let rows: Vec<&[f64]> = linked
        .constraints
        .iter()
        .map(|&handle| {
            constraints
                .get(handle)
                .map(|c| c.row.dervs_y.as_slice())
                .expect("linked constraint missing from table")
        })
        .collect();

    for r in 0..m {
        for c in 0..m {
            let mut sum = 0.0;
            for j in 0..n {
                let rv = rows[r][j];
                let cv = rows[c][j];
                if rv == 0.0 || cv == 0.0 {
                    continue;
                }
                sum += rv * cv;
            }
            linked.normal[r + c * m] = sum;
        }
    }
}

/// Copies the row residuals into the elimination's right-hand side. The
/// residual stored on each constraint stays pre-pivot.
fn gather_rhs(sketch: &Sketch, rhs: &mut [f64]) {
    for (i, &handle) in sketch.linked.constraints.iter().enumerate() {
        rhs[i] = sketch
            .constraints
            .get(handle)
            .expect("linked constraint missing from table")
            .row
            .err;
    }
}

/// Forward elimination with partial pivoting on the column-major `m×m`
/// matrix. Rows whose best pivot is below [`PIVOT_EPSILON`] are skipped.
fn gaussian_eliminate(normal: &mut [f64], rhs: &mut [f64], m: usize) {
    for k in 0..m {
        let mut pivot_row = k;
        let mut max_value = 0.0;
        for candidate in k..m {
            let value = normal[candidate + k * m].abs();
            if value > max_value {
                max_value = value;
                pivot_row = candidate;
            }
        }

        if max_value < PIVOT_EPSILON {
            warn!(row = k, pivot = max_value, "small pivot element, skipping row");
            continue;
        }

        if pivot_row != k {
            for col in 0..m {
                normal.swap(k + col * m, pivot_row + col * m);
            }
            rhs.swap(k, pivot_row);
        }

        let pivot = normal[k + k * m];
        for target in (k + 1)..m {
            let coeff = normal[target + k * m] / pivot;
            for col in 0..m {
                normal[target + col * m] -= normal[k + col * m] * coeff;
            }
            rhs[target] -= rhs[k] * coeff;
        }
    }
}

/// Back substitution over the eliminated system. Rank-deficient diagonal
/// entries leave their solution component at zero.
fn back_substitute(normal: &[f64], rhs: &[f64], solution: &mut [f64], m: usize) {
    solution.fill(0.0);
    for k in (0..m).rev() {
        let diag = normal[k + k * m];
        if diag.abs() < PIVOT_EPSILON {
            warn!(row = k, "back substitution skipped rank-deficient row");
            continue;
        }
        let mut value = rhs[k] / diag;
        for l in (k + 1)..m {
            value -= solution[l] * normal[k + l * m] / diag;
        }
        solution[k] = value;
    }
}

/// Applies `Δ = Jᵀ·y`: each free parameter moves by the solution-weighted
/// sum of its Jacobian column.
fn apply_corrections(sketch: &mut Sketch) {
    let Sketch {
        params,
        constraints,
        linked,
        ..
    } = sketch;

    for (j, &param_handle) in linked.params.iter().enumerate() {
        let mut delta = 0.0;
        for (i, &cons_handle) in linked.constraints.iter().enumerate() {
            let cons = constraints
                .get(cons_handle)
                .expect("linked constraint missing from table");
            delta += linked.solution[i] * cons.row.dervs_y[j];
        }
        if let Some(param) = params.get_mut(param_handle) {
            param.value -= delta;
        }
    }
}

/// Caches the free-parameter values for a possible rollback.
fn snapshot_params(sketch: &mut Sketch) {
    let Sketch { params, linked, .. } = sketch;
    let LinkedState {
        params: live,
        cached_params,
        ..
    } = linked;
    cached_params.clear();
    cached_params.extend(
        live.iter()
            .map(|&h| params.get(h).map_or(0.0, |p| p.value)),
    );
}

/// Restores the free parameters from the pre-solve snapshot.
fn restore_params(sketch: &mut Sketch) {
    let Sketch { params, linked, .. } = sketch;
    for (&handle, &value) in linked.params.iter().zip(linked.cached_params.iter()) {
        if let Some(param) = params.get_mut(handle) {
            param.value = value;
        }
    }
}
