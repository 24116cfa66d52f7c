use crate::solver::bounds::{BoundArrays, IND_BOTH, IND_FREE, IND_LOWER, IND_UPPER};
use crate::solver::workspace::ProblemDims;
use nalgebra::{DMatrix, DVector};
use num_traits::Float;

// Variable tags of the active-set exchange, kept in the integer arena.
pub const STATE_FREE: i32 = 0;
pub const STATE_AT_LOWER: i32 = 1;
pub const STATE_AT_UPPER: i32 = 2;

// Constraint-row activity tags.
pub const CONS_INACTIVE: i32 = 0;
pub const CONS_AT_LOWER: i32 = 1;
pub const CONS_AT_UPPER: i32 = 2;
pub const CONS_EQUALITY: i32 = 3;

/// Weight put on an active constraint row relative to the equation rows.
const CONS_WEIGHT: f64 = 1e6;
/// Levenberg-style damping applied on the single rank-deficiency retry.
/// Large enough that the damping rows stay visible to the rank test even
/// next to a weighted constraint row.
const REG_LAMBDA: f64 = 1e-6;
/// Relative threshold on the R diagonal below which a column is dead.
const RANK_TOL: f64 = 1e-12;
/// Sign tolerance of the release test on bound variables.
const KKT_TOL: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubproblemFailure {
    /// Dead column survived the regularization retry.
    RankDeficient,
    /// An enforced constraint row has no Jacobian direction to act through.
    SingularConstraints,
    /// The active-set exchange did not settle within its iteration cap.
    WorkingSetOverflow,
    /// Back-substitution on the triangular factor failed.
    StepSolveFailed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubproblemReport {
    pub active_set_iterations: usize,
    pub constraint_passes: usize,
    pub regularized: bool,
}

/// One bounded constrained linear least-squares trust step.
///
/// Minimizes || W (A p - b) || over the move-limit box, where the rows of A
/// are the constraint block of the stacked buffer over the equation block
/// (same ordering as the buffer itself) and W up-weights enforced constraint
/// rows. Free/bound exchange follows the bounded-variable least-squares
/// scheme; the dense factorization work is nalgebra's QR.
///
/// # Arguments
/// * `fj` - stacked Jacobian/value buffer, column-major (Ncons+Neq) x (Nvars+1)
/// * `bounds` - encoded bound arrays; constraint-row slots drive row activity
/// * `box_lower`, `box_upper` - per-variable move limits around the iterate
/// * `diag` - per-column scaling used by the damping retry
/// * `aug_mat`, `aug_rhs` - arena segments holding the weighted system
/// * `sub_sol`, `sub_dual` - arena segments for the solution and the dual
/// * `var_state`, `cons_state` - integer arena tags
/// * `wset` - receives the indices of the enforced constraint rows
/// * `pivots` - free-column index scratch
/// * `step_out` - receives the step, length Nvars
pub fn solve_trust_step(
    dims: ProblemDims,
    fj: &[f64],
    bounds: &BoundArrays,
    box_lower: &[f64],
    box_upper: &[f64],
    diag: &[f64],
    aug_mat: &mut [f64],
    aug_rhs: &mut [f64],
    sub_sol: &mut [f64],
    sub_dual: &mut [f64],
    var_state: &mut [i32],
    cons_state: &mut [i32],
    wset: &mut [i32],
    pivots: &mut [i32],
    step_out: &mut [f64],
) -> Result<SubproblemReport, SubproblemFailure> {
    let n = dims.nvars;
    let rows = dims.stacked_rows();
    let mut report = SubproblemReport::default();
    let mut regularized = false;

    // Equality rows are enforced from the start; inequalities join the
    // working set only when the trial step would violate them.
    for j in 0..dims.ncons {
        let (ind, bl, bu) = bounds.constraint_slot(j);
        cons_state[j] = if ind == IND_BOTH && bl == bu {
            CONS_EQUALITY
        } else {
            CONS_INACTIVE
        };
    }

    let mut pass = 0;
    loop {
        if pass > dims.ncons + 2 {
            return Err(SubproblemFailure::WorkingSetOverflow);
        }
        report.constraint_passes = pass + 1;
        report.regularized = regularized;

        assemble_weighted_system(
            dims,
            fj,
            bounds,
            cons_state,
            diag,
            regularized,
            aug_mat,
            aug_rhs,
        )?;

        match bounded_least_squares(
            n,
            rows + n,
            aug_mat,
            aug_rhs,
            box_lower,
            box_upper,
            var_state,
            pivots,
            sub_sol,
            sub_dual,
        ) {
            Ok(iters) => report.active_set_iterations += iters,
            Err(SubproblemFailure::RankDeficient) if !regularized => {
                // one damped retry before giving up on the factorization
                regularized = true;
                continue;
            }
            Err(failure) => return Err(failure),
        }

        let newly_active = activate_violated_rows(dims, fj, bounds, cons_state, sub_sol)?;
        if newly_active == 0 {
            break;
        }
        pass += 1;
    }

    // publish the enforced constraint rows into the working-set scratch
    wset.fill(-1);
    let mut slot = 0;
    for j in 0..dims.ncons {
        if cons_state[j] != CONS_INACTIVE && slot < wset.len() {
            wset[slot] = j as i32;
            slot += 1;
        }
    }

    step_out.copy_from_slice(sub_sol);
    Ok(report)
}

/// Fill the fixed-shape weighted system: constraint rows on top (zero rows
/// while inactive), equation rows below, damping rows at the bottom (zero
/// rows unless the retry switched them on). Keeping the shape fixed means
/// row activity changes only rewrite weights, never repack the arena.
fn assemble_weighted_system(
    dims: ProblemDims,
    fj: &[f64],
    bounds: &BoundArrays,
    cons_state: &[i32],
    diag: &[f64],
    regularized: bool,
    aug_mat: &mut [f64],
    aug_rhs: &mut [f64],
) -> Result<(), SubproblemFailure> {
    let n = dims.nvars;
    let rows = dims.stacked_rows();
    let cap = rows + n;
    aug_mat.fill(0.0);
    aug_rhs.fill(0.0);

    for j in 0..dims.ncons {
        let target = match cons_state[j] {
            CONS_AT_LOWER | CONS_EQUALITY => bounds.constraint_slot(j).1,
            CONS_AT_UPPER => bounds.constraint_slot(j).2,
            _ => continue,
        };
        let g = fj[n * rows + j]; // value column
        let mut row_norm = 0.0f64;
        for c in 0..n {
            let a = fj[c * rows + j];
            aug_mat[c * cap + j] = CONS_WEIGHT * a;
            row_norm = row_norm.max(a.abs());
        }
        if row_norm == 0.0 && (target - g).abs() > f64::epsilon().sqrt() {
            return Err(SubproblemFailure::SingularConstraints);
        }
        aug_rhs[j] = CONS_WEIGHT * (target - g);
    }

    for i in 0..dims.neq {
        let r = dims.ncons + i;
        for c in 0..n {
            aug_mat[c * cap + r] = fj[c * rows + r];
        }
        aug_rhs[r] = -fj[n * rows + r];
    }

    if regularized {
        let damp = REG_LAMBDA.sqrt();
        for c in 0..n {
            aug_mat[c * cap + rows + c] = damp * diag[c];
        }
    }
    Ok(())
}

/// Predict each inactive inequality row at the candidate step and pull the
/// violated ones into the working set. Returns how many rows joined.
fn activate_violated_rows(
    dims: ProblemDims,
    fj: &[f64],
    bounds: &BoundArrays,
    cons_state: &mut [i32],
    sol: &[f64],
) -> Result<usize, SubproblemFailure> {
    let n = dims.nvars;
    let rows = dims.stacked_rows();
    let mut newly_active = 0;
    for j in 0..dims.ncons {
        if cons_state[j] != CONS_INACTIVE {
            continue;
        }
        let (ind, bl, bu) = bounds.constraint_slot(j);
        if ind == IND_FREE {
            continue;
        }
        let g = fj[n * rows + j];
        let mut predicted = g;
        let mut row_norm = 0.0f64;
        for c in 0..n {
            let a = fj[c * rows + j];
            predicted += a * sol[c];
            row_norm = row_norm.max(a.abs());
        }
        let ctol = f64::epsilon().sqrt() * (1.0 + predicted.abs());
        let side = match ind {
            IND_LOWER if predicted < bl - ctol => CONS_AT_LOWER,
            IND_UPPER if predicted > bu + ctol => CONS_AT_UPPER,
            IND_BOTH if predicted < bl - ctol => CONS_AT_LOWER,
            IND_BOTH if predicted > bu + ctol => CONS_AT_UPPER,
            _ => continue,
        };
        if row_norm == 0.0 {
            return Err(SubproblemFailure::SingularConstraints);
        }
        cons_state[j] = side;
        newly_active += 1;
    }
    Ok(newly_active)
}

/// Bounded-variable least squares on the assembled system: free/bound
/// exchange with a QR solve of the free-column block each round. The free
/// index list lives in the pivot scratch of the integer arena.
/// Returns the number of exchange iterations spent.
fn bounded_least_squares(
    n: usize,
    cap: usize,
    aug_mat: &[f64],
    aug_rhs: &[f64],
    box_lower: &[f64],
    box_upper: &[f64],
    var_state: &mut [i32],
    pivots: &mut [i32],
    sol: &mut [f64],
    dual: &mut [f64],
) -> Result<usize, SubproblemFailure> {
    let a_full = DMatrix::from_column_slice(cap, n, aug_mat);
    let b_full = DVector::from_column_slice(aug_rhs);

    // pinned windows start (and stay) on their bound; everything else
    // starts at zero clamped into its window, so the walk below always
    // moves between feasible points
    for i in 0..n {
        if box_upper[i] - box_lower[i] <= 0.0 {
            var_state[i] = STATE_AT_LOWER;
            sol[i] = box_lower[i];
        } else {
            var_state[i] = STATE_FREE;
            sol[i] = 0.0f64.clamp(box_lower[i], box_upper[i]);
        }
    }

    let max_exchanges = 3 * n + 10;
    for exchange in 0..max_exchanges {
        let mut nfree = 0usize;
        for i in 0..n {
            if var_state[i] == STATE_FREE {
                pivots[nfree] = i as i32;
                nfree += 1;
            }
        }

        if nfree == 0 {
            update_dual(&a_full, &b_full, sol, dual);
            if release_worst(n, box_lower, box_upper, var_state, dual) == 0 {
                return Ok(exchange + 1);
            }
            continue;
        }

        // move fixed-variable contributions to the right-hand side
        let mut b_eff = b_full.clone();
        for i in 0..n {
            if var_state[i] != STATE_FREE && sol[i] != 0.0 {
                b_eff -= a_full.column(i) * sol[i];
            }
        }
        let mut a_free = DMatrix::zeros(cap, nfree);
        for k in 0..nfree {
            a_free.set_column(k, &a_full.column(pivots[k] as usize));
        }

        let z = solve_free_least_squares(&a_free, &b_eff)?;

        let mut all_inside = true;
        for k in 0..nfree {
            let i = pivots[k] as usize;
            if z[k] < box_lower[i] || z[k] > box_upper[i] {
                all_inside = false;
                break;
            }
        }

        if all_inside {
            for k in 0..nfree {
                sol[pivots[k] as usize] = z[k];
            }
            update_dual(&a_full, &b_full, sol, dual);
            if release_worst(n, box_lower, box_upper, var_state, dual) == 0 {
                return Ok(exchange + 1);
            }
            continue;
        }

        // walk from the current feasible point toward z up to the first
        // bound crossing, then fix the crossing variables there
        let mut alpha = 1.0f64;
        for k in 0..nfree {
            let i = pivots[k] as usize;
            let dz = z[k] - sol[i];
            if dz > 0.0 && z[k] > box_upper[i] {
                alpha = alpha.min((box_upper[i] - sol[i]) / dz);
            } else if dz < 0.0 && z[k] < box_lower[i] {
                alpha = alpha.min((box_lower[i] - sol[i]) / dz);
            }
        }
        alpha = alpha.clamp(0.0, 1.0);

        let mut fixed_any = false;
        for k in 0..nfree {
            let i = pivots[k] as usize;
            sol[i] += alpha * (z[k] - sol[i]);
            let snap = f64::epsilon().sqrt() * (1.0 + box_upper[i].abs().max(box_lower[i].abs()));
            if sol[i] >= box_upper[i] - snap && z[k] >= box_upper[i] {
                sol[i] = box_upper[i];
                var_state[i] = STATE_AT_UPPER;
                fixed_any = true;
            } else if sol[i] <= box_lower[i] + snap && z[k] <= box_lower[i] {
                sol[i] = box_lower[i];
                var_state[i] = STATE_AT_LOWER;
                fixed_any = true;
            }
        }
        if !fixed_any {
            // numerical stall: pin the most overshooting variable outright
            let mut pick: Option<(usize, bool, f64)> = None;
            for k in 0..nfree {
                let i = pivots[k] as usize;
                if z[k] > box_upper[i] {
                    let over = z[k] - box_upper[i];
                    if pick.map(|(_, _, o)| over > o).unwrap_or(true) {
                        pick = Some((i, true, over));
                    }
                } else if z[k] < box_lower[i] {
                    let over = box_lower[i] - z[k];
                    if pick.map(|(_, _, o)| over > o).unwrap_or(true) {
                        pick = Some((i, false, over));
                    }
                }
            }
            match pick {
                Some((i, true, _)) => {
                    sol[i] = box_upper[i];
                    var_state[i] = STATE_AT_UPPER;
                }
                Some((i, false, _)) => {
                    sol[i] = box_lower[i];
                    var_state[i] = STATE_AT_LOWER;
                }
                None => return Err(SubproblemFailure::StepSolveFailed),
            }
        }
    }
    Err(SubproblemFailure::WorkingSetOverflow)
}

/// QR solve of the dense free-column block; the factorization itself is
/// nalgebra's. A dead diagonal of R is the rank-deficiency signal the caller
/// reacts to.
fn solve_free_least_squares(
    a_free: &DMatrix<f64>,
    b_eff: &DVector<f64>,
) -> Result<DVector<f64>, SubproblemFailure> {
    let qr = a_free.clone().qr();
    let r = qr.r();
    let rmax = r.diagonal().iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
    if rmax == 0.0 {
        return Err(SubproblemFailure::RankDeficient);
    }
    for d in r.diagonal().iter() {
        if d.abs() <= RANK_TOL * rmax {
            return Err(SubproblemFailure::RankDeficient);
        }
    }
    let qtb = qr.q().transpose() * b_eff;
    r.solve_upper_triangular(&qtb)
        .ok_or(SubproblemFailure::StepSolveFailed)
}

/// dual = A^T (b - A p): positive entries pull the variable upward.
fn update_dual(a: &DMatrix<f64>, b: &DVector<f64>, sol: &[f64], dual: &mut [f64]) {
    let p = DVector::from_column_slice(sol);
    let residual = b - a * p;
    let w = a.transpose() * residual;
    dual.copy_from_slice(w.as_slice());
}

/// Release the bound variable whose dual most wants to move it back inside
/// the box. Pinned (zero-width) windows are never released. Returns how many
/// variables were released (0 or 1).
fn release_worst(
    n: usize,
    box_lower: &[f64],
    box_upper: &[f64],
    var_state: &mut [i32],
    dual: &[f64],
) -> usize {
    let mut worst: Option<(usize, f64)> = None;
    for i in 0..n {
        if box_upper[i] - box_lower[i] <= 0.0 {
            continue;
        }
        let violation = match var_state[i] {
            STATE_AT_LOWER if dual[i] > KKT_TOL => dual[i],
            STATE_AT_UPPER if dual[i] < -KKT_TOL => -dual[i],
            _ => continue,
        };
        if worst.map(|(_, v)| violation > v).unwrap_or(true) {
            worst = Some((i, violation));
        }
    }
    match worst {
        Some((i, _)) => {
            var_state[i] = STATE_FREE;
            1
        }
        None => 0,
    }
}
