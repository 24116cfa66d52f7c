use crate::Utils::logger::init_terminal_logger;
use crate::Utils::timer::SolveTimer;
use crate::solver::bounds::{BoundArrays, BoundSpec, IND_BOTH, IND_LOWER, IND_UPPER, encode_bounds};
use crate::solver::errors::SolverError;
use crate::solver::options::SolverOptions;
use crate::solver::problem::{Evaluation, ResidualProvider};
use crate::solver::status::{FailureCause, SolverStatus};
use crate::solver::subproblem::{SubproblemFailure, solve_trust_step};
use crate::solver::workspace::{
    COUNTER_FUNCTION_EVALS, COUNTER_ITERATIONS, COUNTER_JACOBIAN_EVALS, COUNTER_SUBPROBLEM_SOLVES,
    HISTORY_STRIDE, NT, ProblemDims, SolverArena,
};
use log::{error, info, warn};
use nalgebra::DVector;
use std::collections::HashMap;
use tabled::{builder::Builder, settings::Style};

// Ratio thresholds and radius schedule of the acceptance test.
const RATIO_ACCEPT: f64 = 1e-4;
const RATIO_POOR: f64 = 0.25;
const RATIO_GOOD: f64 = 0.75;
const SHRINK: f64 = 0.5;
const GROW: f64 = 2.0;
const DELTA_MAX: f64 = 1e16;
const STEPBOUND: f64 = 100.0;
const MAX_SHRINKS_PER_ITERATION: usize = 100;
/// Scaled-gradient optimality threshold of the local-minimum predicate.
const GTOL_MACHINE: f64 = 1.4901161193847656e-8; // sqrt(machine eps)
/// Merit weight of constraint violation against the residual sum of squares.
const PENALTY: f64 = 1e6;
/// Relative per-iteration reduction under which a boundary streak counts as a stall.
const STALL_RTOL: f64 = 1e-4;

/// Lifecycle of one engine. Terminal outcomes of a solve are carried by the
/// status code, not by the state: the engine returns to Ready and can run
/// another solve without reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Configuring,
    Ready,
    Iterating,
}

/// Bounded constrained nonlinear least-squares engine: owns the work
/// buffers, the encoded bound arrays and the flat option arrays, and drives
/// the trust-region Gauss-Newton iteration against a ResidualProvider.
pub struct SolverEngine {
    dims: Option<ProblemDims>,
    bounds: BoundArrays,
    /// Flat option arrays; the iteration reads its tolerances from these,
    /// not from a retained options struct.
    pub iopt: Vec<i32>,
    pub ropt: Vec<f64>,
    arena: Option<SolverArena>,
    state: EngineState,
    pub last_status: Option<SolverStatus>,
    /// Residual norm at the final iterate of the last solve.
    pub fnorm: f64,
    timer: SolveTimer,
    calc_statistics: HashMap<String, usize>,
}

impl SolverEngine {
    pub fn new() -> SolverEngine {
        SolverEngine {
            dims: None,
            bounds: BoundArrays::all_free(0, 0),
            iopt: Vec::new(),
            ropt: Vec::new(),
            arena: None,
            state: EngineState::Configuring,
            last_status: None,
            fnorm: f64::NAN,
            timer: SolveTimer::new(),
            calc_statistics: HashMap::new(),
        }
    }

    /// Fix the problem shape, bounds and options, size the work buffers and
    /// move to Ready. Nothing is mutated unless every input validates.
    pub fn initialize(
        &mut self,
        neq: usize,
        nvars: usize,
        ncons: usize,
        bounds: Option<Vec<BoundSpec>>,
        options: SolverOptions,
    ) -> Result<(), SolverError> {
        let dims = ProblemDims::new(neq, nvars, ncons)?;
        let encoded = match bounds {
            Some(specs) => encode_bounds(&specs, nvars, ncons)?,
            None => BoundArrays::all_free(nvars, ncons),
        };
        options.validate()?;
        let (iopt, ropt) = options.encode();

        self.dims = Some(dims);
        self.bounds = encoded;
        self.iopt = iopt;
        self.ropt = ropt;
        self.arena = Some(SolverArena::allocate(dims));
        self.state = EngineState::Ready;
        self.last_status = None;
        self.fnorm = f64::NAN;
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Work buffers, for callers that want to inspect (or deliberately
    /// stress) the sizing contract. The first two integer slots carry the
    /// lengths the sizer computed.
    pub fn workspace_mut(&mut self) -> Option<&mut SolverArena> {
        self.arena.as_mut()
    }

    /// Run the iteration from x0. Returns the final iterate and the
    /// published status code. Configuration and capability problems are
    /// raised as errors; numeric trouble comes back as a code in 9..=18.
    pub fn solve<P: ResidualProvider + ?Sized>(
        &mut self,
        x0: DVector<f64>,
        problem: &P,
    ) -> Result<(DVector<f64>, i32), SolverError> {
        let dims = match self.dims {
            Some(dims) => dims,
            None => {
                return Err(SolverError::configuration(
                    "solve() called before initialize()",
                ));
            }
        };
        if x0.len() != dims.nvars {
            return Err(SolverError::configuration(format!(
                "initial guess has length {}, expected Nvars = {}",
                x0.len(),
                dims.nvars
            )));
        }
        if problem.num_equations() != dims.neq
            || problem.num_variables() != dims.nvars
            || problem.num_constraints() != dims.ncons
        {
            return Err(SolverError::configuration(format!(
                "problem reports shape ({}, {}, {}), engine is configured for ({}, {}, {})",
                problem.num_equations(),
                problem.num_variables(),
                problem.num_constraints(),
                dims.neq,
                dims.nvars,
                dims.ncons
            )));
        }
        // the engine consumes the flat arrays, not a retained struct
        let options = SolverOptions::decode(&self.iopt, &self.ropt)?;
        if options.verbose {
            init_terminal_logger("info");
            info!(
                "solve started: Neq = {}, Nvars = {}, Ncons = {}",
                dims.neq, dims.nvars, dims.ncons
            );
        }

        let arena = match self.arena.as_mut() {
            Some(arena) => arena,
            None => {
                return Err(SolverError::configuration(
                    "engine has no work buffers, initialize() first",
                ));
            }
        };
        self.timer.start();
        self.state = EngineState::Iterating;
        let mut x = x0;
        let outcome = iterate(
            dims,
            &self.bounds,
            &options,
            arena,
            &mut self.timer,
            &mut x,
            problem,
        );
        self.state = EngineState::Ready;

        let (status, fnorm) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                self.last_status = None;
                return Err(e);
            }
        };
        self.last_status = Some(status);
        self.fnorm = fnorm;
        self.collect_statistics();
        if options.verbose {
            self.timer.log_phases();
            info!(
                "solve finished: status {} ({}), fnorm = {:.6e}",
                status.code(),
                status.describe(),
                fnorm
            );
            self.report_statistics();
        }
        Ok((x, status.code()))
    }

    fn collect_statistics(&mut self) {
        let arena = match self.arena.as_mut() {
            Some(arena) => arena,
            None => return,
        };
        let (_, int) = arena.views();
        self.calc_statistics.insert(
            "iterations".to_string(),
            int.counters[COUNTER_ITERATIONS] as usize,
        );
        self.calc_statistics.insert(
            "function evaluations".to_string(),
            int.counters[COUNTER_FUNCTION_EVALS] as usize,
        );
        self.calc_statistics.insert(
            "jacobian evaluations".to_string(),
            int.counters[COUNTER_JACOBIAN_EVALS] as usize,
        );
        self.calc_statistics.insert(
            "subproblem solves".to_string(),
            int.counters[COUNTER_SUBPROBLEM_SOLVES] as usize,
        );
    }

    fn report_statistics(&self) {
        let mut builder = Builder::default();
        builder.push_record(["metric", "value"]);
        let mut entries: Vec<_> = self.calc_statistics.iter().collect();
        entries.sort();
        for (key, value) in entries {
            builder.push_record([key.clone(), value.to_string()]);
        }
        for (key, value) in self.timer.phases() {
            builder.push_record([key, value]);
        }
        let mut table = builder.build();
        table.with(Style::modern_rounded());
        info!("\n \n CALC STATISTICS \n \n {}", table);
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
//                ITERATIONS
/////////////////////////////////////////////////////////////////////////////////////////////

/// The trust-region Gauss-Newton main loop. Termination predicates run in a
/// fixed priority order at the top of every outer iteration; numeric
/// failures short-circuit with a Failed status.
fn iterate<P: ResidualProvider + ?Sized>(
    dims: ProblemDims,
    bounds: &BoundArrays,
    options: &SolverOptions,
    arena: &mut SolverArena,
    timer: &mut SolveTimer,
    x: &mut DVector<f64>,
    problem: &P,
) -> Result<(SolverStatus, f64), SolverError> {
    if !arena.header_matches() {
        error!("workspace header does not match the owned buffers");
        return Ok((
            SolverStatus::Failed(FailureCause::WorkspaceExhausted),
            f64::NAN,
        ));
    }
    arena.reset();
    let (rv, iv) = arena.views();

    rv.x_best.copy_from_slice(x.as_slice());
    let mut best_merit = f64::INFINITY;
    let mut delta = 0.0f64;
    let mut first_iteration = true;
    let mut last_step_norm: Option<f64> = None;
    let mut history_pos = 0usize;
    let mut history_len = 0usize;
    let mut ratio_breakdowns = 0usize;
    let mut noise_strikes = 0usize;

    loop {
        // STEP 1: EVALUATE THE PROVIDER AT THE CURRENT ITERATE
        timer.fun_tic();
        let eval = problem.evaluate(x)?;
        timer.fun_tac();
        iv.counters[COUNTER_FUNCTION_EVALS] += 1;
        iv.counters[COUNTER_JACOBIAN_EVALS] += 1;
        eval.check_shapes(dims.neq, dims.nvars, dims.ncons)?;
        if let Some(failure) = check_finite(&eval) {
            return Ok(fail(x, rv.x_best, rv.f_best, best_merit, failure));
        }

        // STEP 2: ASSEMBLE THE STACKED BUFFER (constraints first, value column last)
        timer.assemble_tic();
        assemble_stacked_buffer(&eval, dims, rv.fj);
        column_scaling(&eval, dims, rv.diag);
        timer.assemble_tac();

        let fnorm = eval.residuals.norm();
        let viol = constraint_violation(bounds, eval.constraints.as_slice());
        let merit_sq = fnorm * fnorm + PENALTY * viol * viol;
        if merit_sq < best_merit {
            best_merit = merit_sq;
            rv.x_best.copy_from_slice(x.as_slice());
            rv.f_best.copy_from_slice(eval.residuals.as_slice());
        }
        let gnorm = scaled_projected_gradient_norm(&eval, bounds, x.as_slice(), fnorm, rv.gradient);

        // STEP 3: TERMINATION PREDICATES, IN PRIORITY ORDER
        if fnorm <= options.tolf && viol <= GTOL_MACHINE {
            return Ok((SolverStatus::Converged, fnorm));
        }
        if boundary_stall(rv.history, history_len) {
            return Ok((SolverStatus::StalledAtBound, fnorm));
        }
        if gnorm <= GTOL_MACHINE && viol <= GTOL_MACHINE {
            return Ok((SolverStatus::LocalMinimum, fnorm));
        }
        if noise_strikes >= NT {
            return Ok((SolverStatus::NoiseDetected, fnorm));
        }
        if let Some(step_norm) = last_step_norm {
            if step_norm <= options.told {
                return Ok((SolverStatus::SmallAbsoluteStep, fnorm));
            }
            if step_norm <= options.tolx * x.norm() {
                return Ok((SolverStatus::SmallRelativeStep, fnorm));
            }
        }
        if iv.counters[COUNTER_ITERATIONS] as usize >= options.max_iter {
            return Ok((SolverStatus::MaxIterationsReached, fnorm));
        }

        if first_iteration {
            delta = STEPBOUND * x.amax().max(1.0);
            first_iteration = false;
        }

        // STEP 4: TRIAL LOOP — shrink the trust box until a step is accepted
        let mut shrinks = 0usize;
        let accepted_step_norm;
        loop {
            bounds.move_limits(x.as_slice(), delta, rv.box_lower, rv.box_upper);

            timer.subproblem_tic();
            let sub_result = solve_trust_step(
                dims,
                rv.fj,
                bounds,
                rv.box_lower,
                rv.box_upper,
                rv.diag,
                rv.aug_mat,
                rv.aug_rhs,
                rv.sub_sol,
                rv.sub_dual,
                iv.var_state,
                iv.cons_state,
                iv.wset,
                iv.pivots,
                rv.step,
            );
            timer.subproblem_tac();
            iv.counters[COUNTER_SUBPROBLEM_SOLVES] += 1;
            if let Err(failure) = sub_result {
                let cause = map_subproblem_failure(failure);
                return Ok(fail(x, rv.x_best, rv.f_best, best_merit, cause));
            }

            let step_norm = norm2(rv.step);
            if step_norm <= f64::EPSILON * (1.0 + x.norm()) {
                // pinned at bounds (or a zero gradient): a trivial accepted
                // step; the step predicates fire on the next pass
                record_history(
                    rv.history,
                    &mut history_pos,
                    &mut history_len,
                    0.0,
                    1.0,
                    false,
                );
                accepted_step_norm = step_norm;
                break;
            }

            // STEP 5: EVALUATE THE TRIAL POINT
            for i in 0..dims.nvars {
                rv.x_trial[i] = x[i] + rv.step[i];
            }
            let x_trial = DVector::from_column_slice(rv.x_trial);
            timer.fun_tic();
            let eval_trial = problem.evaluate(&x_trial)?;
            timer.fun_tac();
            iv.counters[COUNTER_FUNCTION_EVALS] += 1;
            eval_trial.check_shapes(dims.neq, dims.nvars, dims.ncons)?;
            if let Some(failure) = check_finite(&eval_trial) {
                return Ok(fail(x, rv.x_best, rv.f_best, best_merit, failure));
            }

            // STEP 6: RATIO TEST against the linearized merit
            let p = DVector::from_column_slice(rv.step);
            let model_residual = &eval.residuals + &eval.jacobian * &p;
            for j in 0..dims.ncons {
                let mut predicted = eval.constraints[j];
                for c in 0..dims.nvars {
                    predicted += eval.constraint_jacobian[(j, c)] * p[c];
                }
                rv.cons_model[j] = predicted;
            }
            let model_viol = constraint_violation(bounds, rv.cons_model);
            let model_merit_sq =
                model_residual.norm_squared() + PENALTY * model_viol * model_viol;
            let fnorm_trial = eval_trial.residuals.norm();
            let viol_trial = constraint_violation(bounds, eval_trial.constraints.as_slice());
            let trial_merit_sq = fnorm_trial * fnorm_trial + PENALTY * viol_trial * viol_trial;

            let predicted_reduction = merit_sq - model_merit_sq;
            let actual_reduction = merit_sq - trial_merit_sq;

            if predicted_reduction <= 0.0 {
                ratio_breakdowns += 1;
                if ratio_breakdowns >= NT {
                    return Ok(fail(
                        x,
                        rv.x_best,
                        rv.f_best,
                        best_merit,
                        FailureCause::RatioTestBreakdown,
                    ));
                }
                shrinks += 1;
                delta *= SHRINK;
                if shrinks > MAX_SHRINKS_PER_ITERATION
                    || delta <= f64::EPSILON * (1.0 + x.amax())
                {
                    return Ok(fail(
                        x,
                        rv.x_best,
                        rv.f_best,
                        best_merit,
                        FailureCause::TrustRegionCollapse,
                    ));
                }
                continue;
            }
            ratio_breakdowns = 0;
            if predicted_reduction <= 4.0 * f64::EPSILON * merit_sq {
                noise_strikes += 1;
            } else {
                noise_strikes = 0;
            }
            let ratio = actual_reduction / predicted_reduction;

            if ratio >= RATIO_ACCEPT {
                // STEP 7: ACCEPT AND UPDATE THE TRUST RADIUS
                let hit_boundary = rv
                    .step
                    .iter()
                    .any(|&s| s.abs() >= delta * (1.0 - 1e-10));
                x.as_mut_slice().copy_from_slice(rv.x_trial);
                record_history(
                    rv.history,
                    &mut history_pos,
                    &mut history_len,
                    actual_reduction / (merit_sq + f64::MIN_POSITIVE),
                    ratio,
                    hit_boundary,
                );
                if ratio >= RATIO_GOOD {
                    delta = (delta * GROW).min(DELTA_MAX);
                } else if ratio <= RATIO_POOR {
                    delta *= SHRINK;
                }
                accepted_step_norm = step_norm;
                break;
            }

            shrinks += 1;
            delta *= SHRINK;
            if shrinks == 10 {
                warn!(
                    "trust radius shrank 10 times in one iteration, delta = {:.3e}",
                    delta
                );
            }
            if shrinks > MAX_SHRINKS_PER_ITERATION || delta <= f64::EPSILON * (1.0 + x.amax()) {
                return Ok(fail(
                    x,
                    rv.x_best,
                    rv.f_best,
                    best_merit,
                    FailureCause::TrustRegionCollapse,
                ));
            }
        }

        last_step_norm = Some(accepted_step_norm);
        iv.counters[COUNTER_ITERATIONS] += 1;
        let enforced_rows = iv.wset.iter().filter(|&&w| w >= 0).count();
        info!(
            "iteration = {}, fnorm = {:.6e}, step = {:.3e}, delta = {:.3e}, enforced rows = {}",
            iv.counters[COUNTER_ITERATIONS],
            fnorm,
            accepted_step_norm,
            delta,
            enforced_rows
        );
    }
}

/// On failure the engine hands back the best iterate it saw (and the
/// residual norm that goes with it), not the one the breakdown happened at.
fn fail(
    x: &mut DVector<f64>,
    x_best: &[f64],
    f_best: &[f64],
    best_merit: f64,
    cause: FailureCause,
) -> (SolverStatus, f64) {
    error!("solve failed: {}", cause);
    if best_merit.is_finite() {
        x.as_mut_slice().copy_from_slice(x_best);
        (SolverStatus::Failed(cause), norm2(f_best))
    } else {
        (SolverStatus::Failed(cause), f64::NAN)
    }
}

fn map_subproblem_failure(failure: SubproblemFailure) -> FailureCause {
    match failure {
        SubproblemFailure::RankDeficient => FailureCause::RankDeficientSubproblem,
        SubproblemFailure::SingularConstraints => FailureCause::SingularConstraintSet,
        SubproblemFailure::WorkingSetOverflow => FailureCause::WorkingSetOverflow,
        SubproblemFailure::StepSolveFailed => FailureCause::StepComputationFailed,
    }
}

/// Constraint rows above equation rows, current values in the extra last
/// column. The subproblem depends on this exact ordering.
fn assemble_stacked_buffer(eval: &Evaluation, dims: ProblemDims, fj: &mut [f64]) {
    let rows = dims.stacked_rows();
    let n = dims.nvars;
    for j in 0..dims.ncons {
        for c in 0..n {
            fj[c * rows + j] = eval.constraint_jacobian[(j, c)];
        }
        fj[n * rows + j] = eval.constraints[j];
    }
    for i in 0..dims.neq {
        let r = dims.ncons + i;
        for c in 0..n {
            fj[c * rows + r] = eval.jacobian[(i, c)];
        }
        fj[n * rows + r] = eval.residuals[i];
    }
}

/// Per-column scale over both blocks, floored at one so the damping rows of
/// the subproblem retry never vanish.
fn column_scaling(eval: &Evaluation, dims: ProblemDims, diag: &mut [f64]) {
    for c in 0..dims.nvars {
        let mut acc = 0.0f64;
        for j in 0..dims.ncons {
            acc += eval.constraint_jacobian[(j, c)].powi(2);
        }
        for i in 0..dims.neq {
            acc += eval.jacobian[(i, c)].powi(2);
        }
        diag[c] = acc.sqrt().max(1.0);
    }
}

fn check_finite(eval: &Evaluation) -> Option<FailureCause> {
    let values_finite = eval.residuals.iter().all(|v| v.is_finite())
        && eval.constraints.iter().all(|v| v.is_finite());
    if !values_finite {
        return Some(FailureCause::NonFiniteResidual);
    }
    let jac_finite = eval.jacobian.iter().all(|v| v.is_finite())
        && eval.constraint_jacobian.iter().all(|v| v.is_finite());
    if !jac_finite {
        return Some(FailureCause::NonFiniteJacobian);
    }
    None
}

/// Largest projected-gradient component scaled by its column norm and the
/// residual norm; the optimality measure behind the local-minimum predicate.
/// A component pushing into an active variable bound carries no descent
/// information and is masked before the max, so an iterate pinned against
/// its bounds still registers as stationary.
fn scaled_projected_gradient_norm(
    eval: &Evaluation,
    bounds: &BoundArrays,
    x: &[f64],
    fnorm: f64,
    gradient: &mut [f64],
) -> f64 {
    let g = eval.jacobian.transpose() * &eval.residuals;
    gradient.copy_from_slice(g.as_slice());
    let mut max_scaled = 0.0f64;
    for j in 0..eval.jacobian.ncols() {
        let tol = GTOL_MACHINE * (1.0 + x[j].abs());
        let at_lower = matches!(bounds.ind[j], IND_LOWER | IND_BOTH)
            && x[j] - bounds.bl[j] <= tol;
        let at_upper = matches!(bounds.ind[j], IND_UPPER | IND_BOTH)
            && bounds.bu[j] - x[j] <= tol;
        if (at_lower && gradient[j] > 0.0) || (at_upper && gradient[j] < 0.0) {
            continue;
        }
        let col_norm = eval.jacobian.column(j).norm();
        if col_norm > 0.0 && fnorm > 0.0 {
            max_scaled = max_scaled.max(gradient[j].abs() / (col_norm * fnorm));
        }
    }
    max_scaled
}

/// Euclidean distance of the constraint values from their bound windows.
fn constraint_violation(bounds: &BoundArrays, values: &[f64]) -> f64 {
    let mut acc = 0.0f64;
    for j in 0..bounds.ncons {
        let (ind, bl, bu) = bounds.constraint_slot(j);
        let v = values[j];
        let outside = match ind {
            IND_LOWER => (bl - v).max(0.0),
            IND_UPPER => (v - bu).max(0.0),
            IND_BOTH => (bl - v).max(0.0) + (v - bu).max(0.0),
            _ => 0.0,
        };
        acc += outside * outside;
    }
    acc.sqrt()
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|&s| s * s).sum::<f64>().sqrt()
}

/// Push one accepted iteration into the NT-deep ring:
/// (relative reduction, ratio, boundary flag).
fn record_history(
    history: &mut [f64],
    pos: &mut usize,
    len: &mut usize,
    rel_reduction: f64,
    ratio: f64,
    boundary: bool,
) {
    let slot = *pos * HISTORY_STRIDE;
    history[slot] = rel_reduction;
    history[slot + 1] = ratio;
    history[slot + 2] = if boundary { 1.0 } else { 0.0 };
    *pos = (*pos + 1) % NT;
    *len = (*len + 1).min(NT);
}

/// A full window of boundary-limited steps whose reductions all stayed tiny:
/// the trust region, not the model, is what limits progress.
fn boundary_stall(history: &[f64], len: usize) -> bool {
    if len < NT {
        return false;
    }
    (0..NT).all(|k| {
        let slot = k * HISTORY_STRIDE;
        history[slot + 2] > 0.5 && history[slot].abs() < STALL_RTOL
    })
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     TESTS
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Examples_and_utils::{ExponentialSumFit, QuarticValley, ShiftedRoot};
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, dmatrix, dvector};
    use std::cell::{Cell, RefCell};

    /// f(x) = x, pushed toward its lower bound; records every x it is asked
    /// to evaluate so tests can audit feasibility of the whole trajectory.
    struct RecordedLine {
        seen: RefCell<Vec<f64>>,
    }

    impl RecordedLine {
        fn new() -> RecordedLine {
            RecordedLine {
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ResidualProvider for RecordedLine {
        fn num_equations(&self) -> usize {
            1
        }
        fn num_variables(&self) -> usize {
            1
        }
        fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
            self.seen.borrow_mut().push(x[0]);
            let mut eval = Evaluation::zeros(1, 1, 0);
            eval.residuals[0] = x[0];
            eval.jacobian[(0, 0)] = 1.0;
            Ok(eval)
        }
    }

    /// Residuals [x1 - 3, x2^2 + 1]: the second component cannot reach zero,
    /// so the iteration bottoms out in a genuine local minimum.
    struct OffsetParabola;

    impl ResidualProvider for OffsetParabola {
        fn num_equations(&self) -> usize {
            2
        }
        fn num_variables(&self) -> usize {
            2
        }
        fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
            let mut eval = Evaluation::zeros(2, 2, 0);
            eval.residuals[0] = x[0] - 3.0;
            eval.residuals[1] = x[1] * x[1] + 1.0;
            eval.jacobian = dmatrix![1.0, 0.0; 0.0, 2.0 * x[1]];
            Ok(eval)
        }
    }

    /// Counts evaluate() calls without implementing anything else.
    struct CountingStub {
        calls: Cell<usize>,
    }

    impl ResidualProvider for CountingStub {
        fn num_equations(&self) -> usize {
            1
        }
        fn num_variables(&self) -> usize {
            1
        }
        fn evaluate(&self, _x: &DVector<f64>) -> Result<Evaluation, SolverError> {
            self.calls.set(self.calls.get() + 1);
            let mut eval = Evaluation::zeros(1, 1, 0);
            eval.jacobian[(0, 0)] = 1.0;
            Ok(eval)
        }
    }

    /// Problem type that never overrides the default evaluate().
    struct Unimplemented;

    impl ResidualProvider for Unimplemented {
        fn num_equations(&self) -> usize {
            1
        }
        fn num_variables(&self) -> usize {
            1
        }
    }

    fn engine_for(
        neq: usize,
        nvars: usize,
        ncons: usize,
        bounds: Option<Vec<BoundSpec>>,
        options: SolverOptions,
    ) -> SolverEngine {
        let mut engine = SolverEngine::new();
        engine
            .initialize(neq, nvars, ncons, bounds, options)
            .unwrap();
        engine
    }

    #[test]
    fn test_shifted_root_converges_to_three() {
        let mut engine = engine_for(1, 1, 0, None, SolverOptions::default());
        let (x, code) = engine.solve(dvector![0.0], &ShiftedRoot).unwrap();
        assert!(code == 2 || code == 4, "unexpected status {}", code);
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_engine_is_reusable_without_reconfiguration() {
        let mut engine = engine_for(1, 1, 0, None, SolverOptions::default());
        let (x1, code1) = engine.solve(dvector![0.0], &ShiftedRoot).unwrap();
        let (x2, code2) = engine.solve(dvector![50.0], &ShiftedRoot).unwrap();
        assert_eq!(code1, 2);
        assert_eq!(code2, 2);
        assert_relative_eq!(x1[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(x2[0], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_wrong_x0_length_raises_before_any_evaluation() {
        let mut engine = engine_for(1, 1, 0, None, SolverOptions::default());
        let counting = CountingStub {
            calls: Cell::new(0),
        };
        let err = engine.solve(dvector![0.0, 1.0], &counting).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(counting.calls.get(), 0);
    }

    #[test]
    fn test_solve_before_initialize_is_a_configuration_error() {
        let mut engine = SolverEngine::new();
        let err = engine.solve(dvector![0.0], &ShiftedRoot).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unimplemented_evaluate_reports_capability_error() {
        let mut engine = engine_for(1, 1, 0, None, SolverOptions::default());
        let err = engine.solve(dvector![0.0], &Unimplemented).unwrap_err();
        assert!(err.is_capability());
        // the engine stays usable with a corrected problem
        let (x, code) = engine.solve(dvector![0.0], &ShiftedRoot).unwrap();
        assert_eq!(code, 2);
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_iteration_cap_returns_code_8() {
        let options = SolverOptions {
            tolf: 1e-16,
            told: 1e-12,
            tolx: 1e-12,
            max_iter: 1,
            verbose: false,
        };
        let mut engine = engine_for(1, 1, 0, None, options);
        let (_, code) = engine.solve(dvector![1.0], &QuarticValley).unwrap();
        assert_eq!(code, 8);
    }

    #[test]
    fn test_quartic_unbounded() {
        let options = SolverOptions {
            tolf: 1e-16,
            told: 1e-8,
            tolx: 1e-8,
            max_iter: 100,
            verbose: false,
        };
        let mut engine = engine_for(1, 1, 0, None, options);
        let (x, code) = engine.solve(dvector![1.0], &QuarticValley).unwrap();
        assert!([2, 4, 6, 7].contains(&code), "unexpected status {}", code);
        assert_relative_eq!(x[0] / 100.0, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_quartic_with_upper_bound_stops_at_50() {
        let options = SolverOptions {
            tolf: 1e-16,
            told: 1e-8,
            tolx: 1e-8,
            max_iter: 100,
            verbose: false,
        };
        let bounds = vec![BoundSpec::Upper(50.0)];
        let mut engine = engine_for(1, 1, 0, Some(bounds), options);
        let (x, code) = engine.solve(dvector![1.0], &QuarticValley).unwrap();
        assert!([2, 4, 6, 7].contains(&code), "unexpected status {}", code);
        assert_relative_eq!(x[0] / 50.0, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_quartic_with_inactive_lower_bound() {
        let options = SolverOptions {
            tolf: 1e-16,
            told: 1e-8,
            tolx: 1e-8,
            max_iter: 100,
            verbose: false,
        };
        let bounds = vec![BoundSpec::Lower(-50.0)];
        let mut engine = engine_for(1, 1, 0, Some(bounds), options);
        let (x, code) = engine.solve(dvector![1.0], &QuarticValley).unwrap();
        assert!([2, 4, 6, 7].contains(&code), "unexpected status {}", code);
        assert_relative_eq!(x[0] / 100.0, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_lower_bound_is_never_crossed() {
        let bounds = vec![BoundSpec::Lower(1.0)];
        let mut engine = engine_for(1, 1, 0, Some(bounds), SolverOptions::default());
        let problem = RecordedLine::new();
        let (x, code) = engine.solve(dvector![5.0], &problem).unwrap();
        assert!(SolverStatus::from_code(code).unwrap().is_reliable());
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-5);
        for &seen in problem.seen.borrow().iter() {
            assert!(seen >= 1.0 - 1e-12, "iterate {} crossed the bound", seen);
        }
    }

    #[test]
    fn test_local_minimum_reports_code_4() {
        let mut engine = engine_for(2, 2, 0, None, SolverOptions::default());
        let (x, code) = engine.solve(dvector![0.0, 1.0], &OffsetParabola).unwrap();
        assert_eq!(code, 4);
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(x[1], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_workspace_header_mismatch_reports_code_14() {
        let mut engine = engine_for(1, 1, 0, None, SolverOptions::default());
        engine.workspace_mut().unwrap().views().1.header[0] += 1;
        let (_, code) = engine.solve(dvector![0.0], &ShiftedRoot).unwrap();
        assert_eq!(code, 14);
    }

    #[test]
    fn test_provider_shape_mismatch_is_a_configuration_error() {
        let mut engine = engine_for(2, 2, 0, None, SolverOptions::default());
        let err = engine.solve(dvector![0.0, 0.0], &ShiftedRoot).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_exponential_sum_fit_with_constraint() {
        let options = SolverOptions {
            tolf: 1e-5,
            told: 1e-5,
            tolx: 1e-5,
            max_iter: 100,
            verbose: false,
        };
        let bounds = vec![
            BoundSpec::Lower(0.0),
            BoundSpec::Both(-25.0, 0.0),
            BoundSpec::Lower(0.0),
            BoundSpec::Both(-25.0, 0.0),
            BoundSpec::Lower(0.05),
        ];
        let mut engine = engine_for(5, 4, 1, Some(bounds), options);
        let problem = ExponentialSumFit::new();
        let (x, code) = engine.solve(dvector![0.0, 0.0, 0.0, 0.0], &problem).unwrap();
        assert!(
            SolverStatus::from_code(code).unwrap().is_reliable(),
            "unexpected status {}",
            code
        );
        // bounds hold at the solution
        assert!(x[0] >= -1e-10);
        assert!(x[2] >= -1e-10);
        assert!(x[1] <= 1e-10 && x[1] >= -25.0);
        assert!(x[3] <= 1e-10 && x[3] >= -25.0);
        // the linear constraint holds
        assert!(x[1] - x[3] >= 0.05 - 1e-6);
        // and the data is actually fit
        assert!(engine.fnorm < 0.25, "poor fit, fnorm = {}", engine.fnorm);
    }

    #[test]
    fn test_boundary_stall_detector() {
        let mut history = vec![0.0; HISTORY_STRIDE * NT];
        let mut pos = 0;
        let mut len = 0;
        for _ in 0..NT {
            record_history(&mut history, &mut pos, &mut len, 1e-6, 0.9, true);
        }
        assert!(boundary_stall(&history, len));
        // one interior step in the window breaks the streak
        record_history(&mut history, &mut pos, &mut len, 1e-6, 0.9, false);
        assert!(!boundary_stall(&history, len));
    }

    #[test]
    fn test_boundary_stall_needs_a_full_window() {
        let mut history = vec![0.0; HISTORY_STRIDE * NT];
        let mut pos = 0;
        let mut len = 0;
        for _ in 0..NT - 1 {
            record_history(&mut history, &mut pos, &mut len, 1e-6, 0.9, true);
        }
        assert!(!boundary_stall(&history, len));
    }

    #[test]
    fn test_stacked_buffer_ordering_is_constraints_first() {
        let dims = ProblemDims::new(2, 2, 1).unwrap();
        let mut eval = Evaluation::zeros(2, 2, 1);
        eval.constraints[0] = 7.0;
        eval.constraint_jacobian = dmatrix![10.0, 20.0];
        eval.residuals = dvector![1.0, 2.0];
        eval.jacobian = dmatrix![3.0, 4.0; 5.0, 6.0];
        let mut fj = vec![0.0; dims.stacked_rows() * (dims.nvars + 1)];
        assemble_stacked_buffer(&eval, dims, &mut fj);
        let rows = dims.stacked_rows();
        let m = DMatrix::from_column_slice(rows, dims.nvars + 1, &fj);
        // constraint row on top
        assert_eq!(m[(0, 0)], 10.0);
        assert_eq!(m[(0, 1)], 20.0);
        assert_eq!(m[(0, 2)], 7.0);
        // equation rows below, values in the last column
        assert_eq!(m[(1, 0)], 3.0);
        assert_eq!(m[(2, 1)], 6.0);
        assert_eq!(m[(1, 2)], 1.0);
        assert_eq!(m[(2, 2)], 2.0);
    }

    #[test]
    fn test_non_finite_residual_reports_code_12() {
        struct NanProblem;
        impl ResidualProvider for NanProblem {
            fn num_equations(&self) -> usize {
                1
            }
            fn num_variables(&self) -> usize {
                1
            }
            fn evaluate(&self, _x: &DVector<f64>) -> Result<Evaluation, SolverError> {
                let mut eval = Evaluation::zeros(1, 1, 0);
                eval.residuals[0] = f64::NAN;
                eval.jacobian[(0, 0)] = 1.0;
                Ok(eval)
            }
        }
        let mut engine = engine_for(1, 1, 0, None, SolverOptions::default());
        let (_, code) = engine.solve(dvector![0.0], &NanProblem).unwrap();
        assert_eq!(code, 12);
    }

    #[test]
    fn test_wrong_shape_from_provider_is_a_capability_error() {
        struct WrongShape;
        impl ResidualProvider for WrongShape {
            fn num_equations(&self) -> usize {
                2
            }
            fn num_variables(&self) -> usize {
                1
            }
            fn evaluate(&self, _x: &DVector<f64>) -> Result<Evaluation, SolverError> {
                Ok(Evaluation::zeros(1, 1, 0))
            }
        }
        let mut engine = engine_for(2, 1, 0, None, SolverOptions::default());
        let err = engine.solve(dvector![0.0], &WrongShape).unwrap_err();
        assert!(err.is_capability());
    }
}
