use crate::solver::errors::SolverError;

/// Depth of the trust-region bookkeeping window: the boundary-stall and
/// noise detectors read the last NT accepted iterations, and the active-set
/// index scratch in the integer buffer is NT entries deep.
pub const NT: usize = 5;

/// Entries stored per accepted iteration in the history ring.
pub const HISTORY_STRIDE: usize = 3;

// Named slots of the counters segment of the integer buffer.
pub const COUNTER_ITERATIONS: usize = 0;
pub const COUNTER_FUNCTION_EVALS: usize = 1;
pub const COUNTER_JACOBIAN_EVALS: usize = 2;
pub const COUNTER_SUBPROBLEM_SOLVES: usize = 3;

/// Problem dimensions, fixed for the lifetime of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemDims {
    pub neq: usize,
    pub nvars: usize,
    pub ncons: usize,
}

impl ProblemDims {
    pub fn new(neq: usize, nvars: usize, ncons: usize) -> Result<ProblemDims, SolverError> {
        if nvars == 0 {
            return Err(SolverError::configuration(
                "Nvars must be positive, got 0",
            ));
        }
        Ok(ProblemDims { neq, nvars, ncons })
    }

    /// Rows of the stacked Jacobian buffer: constraint rows on top of
    /// equation rows.
    pub fn stacked_rows(&self) -> usize {
        self.ncons + self.neq
    }
}

// The single place where buffer arithmetic lives. Everything else addresses
// the arena through the named views produced from these tables, so a layout
// change here cannot go out of sync with the addressing. This is the tighter
// of the two historical sizing conventions; the engine pairs only with it
// and self-validates through the integer-buffer header.
fn real_segment_lengths(dims: ProblemDims) -> [usize; 15] {
    let rows = dims.stacked_rows();
    let n = dims.nvars;
    [
        rows * (n + 1),  // fj: stacked Jacobian plus the value column
        n,               // x_trial
        n,               // x_best
        n,               // step
        n,               // gradient
        n,               // diag: per-column scaling
        n,               // box_lower: move limits
        n,               // box_upper
        dims.neq,        // f_best: residuals at the best accepted iterate
        dims.ncons,      // cons_model: linearized constraint values at the step
        (rows + n) * n,  // aug_mat: weighted rows plus regularization rows
        rows + n,        // aug_rhs
        n,               // sub_sol
        n,               // sub_dual
        HISTORY_STRIDE * NT, // history ring
    ]
}

fn int_segment_lengths(dims: ProblemDims) -> [usize; 6] {
    [
        2,          // header: the two computed lengths
        dims.nvars, // var_state: free / at-lower / at-upper tags
        dims.ncons, // cons_state: constraint-row activity tags
        NT,         // wset: working-set index scratch
        dims.nvars, // pivots
        4,          // counters
    ]
}

/// Exact floating-point scratch length for these dimensions.
pub fn real_workspace_len(dims: ProblemDims) -> usize {
    real_segment_lengths(dims).iter().sum()
}

/// Exact integer scratch length for these dimensions.
pub fn int_workspace_len(dims: ProblemDims) -> usize {
    int_segment_lengths(dims).iter().sum()
}

/// Named views over the floating-point arena, all disjoint.
pub struct RealViews<'a> {
    pub fj: &'a mut [f64],
    pub x_trial: &'a mut [f64],
    pub x_best: &'a mut [f64],
    pub step: &'a mut [f64],
    pub gradient: &'a mut [f64],
    pub diag: &'a mut [f64],
    pub box_lower: &'a mut [f64],
    pub box_upper: &'a mut [f64],
    pub f_best: &'a mut [f64],
    pub cons_model: &'a mut [f64],
    pub aug_mat: &'a mut [f64],
    pub aug_rhs: &'a mut [f64],
    pub sub_sol: &'a mut [f64],
    pub sub_dual: &'a mut [f64],
    pub history: &'a mut [f64],
}

/// Named views over the integer arena.
pub struct IntViews<'a> {
    pub header: &'a mut [i32],
    pub var_state: &'a mut [i32],
    pub cons_state: &'a mut [i32],
    pub wset: &'a mut [i32],
    pub pivots: &'a mut [i32],
    pub counters: &'a mut [i32],
}

fn split<'a, T>(rest: &mut &'a mut [T], len: usize) -> &'a mut [T] {
    let taken = std::mem::take(rest);
    let (head, tail) = taken.split_at_mut(len);
    *rest = tail;
    head
}

/// The work buffers of one engine: allocated once per configuration, reused
/// across iterations and across solve() calls, never resized mid-solve.
#[derive(Debug, Clone)]
pub struct SolverArena {
    iwork: Vec<i32>,
    rwork: Vec<f64>,
    dims: ProblemDims,
}

impl SolverArena {
    /// Size both buffers and write the two header slots the iteration
    /// self-validates against.
    pub fn allocate(dims: ProblemDims) -> SolverArena {
        let lrw = real_workspace_len(dims);
        let liw = int_workspace_len(dims);
        let mut iwork = vec![0i32; liw];
        iwork[0] = lrw as i32;
        iwork[1] = liw as i32;
        SolverArena {
            iwork,
            rwork: vec![0.0; lrw],
            dims,
        }
    }

    pub fn dims(&self) -> ProblemDims {
        self.dims
    }

    /// The fail-fast check run before the first iteration of every solve:
    /// the header must agree with the buffers the engine actually owns.
    pub fn header_matches(&self) -> bool {
        self.iwork.len() >= 2
            && self.iwork[0] == self.rwork.len() as i32
            && self.iwork[1] == self.iwork.len() as i32
    }

    /// Zero all scratch while keeping the header slots intact.
    pub fn reset(&mut self) {
        let lrw = self.iwork[0];
        let liw = self.iwork[1];
        self.rwork.fill(0.0);
        self.iwork.fill(0);
        self.iwork[0] = lrw;
        self.iwork[1] = liw;
    }

    /// Split both buffers into their named, disjoint views.
    pub fn views(&mut self) -> (RealViews<'_>, IntViews<'_>) {
        let rlens = real_segment_lengths(self.dims);
        let mut rrest = self.rwork.as_mut_slice();
        let real = RealViews {
            fj: split(&mut rrest, rlens[0]),
            x_trial: split(&mut rrest, rlens[1]),
            x_best: split(&mut rrest, rlens[2]),
            step: split(&mut rrest, rlens[3]),
            gradient: split(&mut rrest, rlens[4]),
            diag: split(&mut rrest, rlens[5]),
            box_lower: split(&mut rrest, rlens[6]),
            box_upper: split(&mut rrest, rlens[7]),
            f_best: split(&mut rrest, rlens[8]),
            cons_model: split(&mut rrest, rlens[9]),
            aug_mat: split(&mut rrest, rlens[10]),
            aug_rhs: split(&mut rrest, rlens[11]),
            sub_sol: split(&mut rrest, rlens[12]),
            sub_dual: split(&mut rrest, rlens[13]),
            history: split(&mut rrest, rlens[14]),
        };
        debug_assert!(rrest.is_empty());

        let ilens = int_segment_lengths(self.dims);
        let mut irest = self.iwork.as_mut_slice();
        let int = IntViews {
            header: split(&mut irest, ilens[0]),
            var_state: split(&mut irest, ilens[1]),
            cons_state: split(&mut irest, ilens[2]),
            wset: split(&mut irest, ilens[3]),
            pivots: split(&mut irest, ilens[4]),
            counters: split(&mut irest, ilens[5]),
        };
        debug_assert!(irest.is_empty());

        (real, int)
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     TESTS
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_nvars_must_be_positive() {
        assert!(ProblemDims::new(1, 0, 0).unwrap_err().is_configuration());
        assert!(ProblemDims::new(0, 1, 0).is_ok());
    }

    #[test]
    fn test_header_slots_carry_the_computed_lengths() {
        let dims = ProblemDims::new(5, 4, 1).unwrap();
        let arena = SolverArena::allocate(dims);
        assert_eq!(arena.iwork[0] as usize, real_workspace_len(dims));
        assert_eq!(arena.iwork[1] as usize, int_workspace_len(dims));
        assert!(arena.header_matches());
    }

    #[test]
    fn test_header_mismatch_is_detected() {
        let dims = ProblemDims::new(2, 2, 0).unwrap();
        let mut arena = SolverArena::allocate(dims);
        arena.iwork[0] += 1;
        assert!(!arena.header_matches());
    }

    #[test]
    fn test_views_consume_the_arena_exactly() {
        let dims = ProblemDims::new(7, 3, 2).unwrap();
        let mut arena = SolverArena::allocate(dims);
        let (real, int) = arena.views();
        let rows = dims.stacked_rows();
        assert_eq!(real.fj.len(), rows * (dims.nvars + 1));
        assert_eq!(real.aug_mat.len(), (rows + dims.nvars) * dims.nvars);
        assert_eq!(real.history.len(), HISTORY_STRIDE * NT);
        assert_eq!(int.header.len(), 2);
        assert_eq!(int.var_state.len(), dims.nvars);
        assert_eq!(int.wset.len(), NT);
        assert_eq!(int.counters.len(), 4);
        // the debug_asserts in views() guarantee nothing is left over
    }

    #[test]
    fn test_sizing_is_monotone_in_every_dimension() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let neq = rng.random_range(0..20usize);
            let nvars = rng.random_range(1..20usize);
            let ncons = rng.random_range(0..20usize);
            let base = ProblemDims { neq, nvars, ncons };
            let grown = [
                ProblemDims { neq: neq + 1, ..base },
                ProblemDims { nvars: nvars + 1, ..base },
                ProblemDims { ncons: ncons + 1, ..base },
            ];
            for bigger in grown {
                assert!(real_workspace_len(bigger) >= real_workspace_len(base));
                assert!(int_workspace_len(bigger) >= int_workspace_len(base));
            }
        }
    }

    #[test]
    fn test_reset_preserves_header() {
        let dims = ProblemDims::new(3, 2, 1).unwrap();
        let mut arena = SolverArena::allocate(dims);
        {
            let (real, int) = arena.views();
            real.fj[0] = 42.0;
            int.counters[COUNTER_ITERATIONS] = 7;
        }
        arena.reset();
        assert!(arena.header_matches());
        let (real, int) = arena.views();
        assert_eq!(real.fj[0], 0.0);
        assert_eq!(int.counters[COUNTER_ITERATIONS], 0);
    }
}
