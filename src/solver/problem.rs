use crate::solver::errors::SolverError;
use nalgebra::{DMatrix, DVector};

/// Everything the engine needs from one evaluation of the problem at an
/// iterate x: residual values, residual Jacobian, constraint values and the
/// constraint Jacobian (zero rows when no linear constraints exist).
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub residuals: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub constraints: DVector<f64>,
    pub constraint_jacobian: DMatrix<f64>,
}

impl Evaluation {
    /// Zero-filled arrays of the right shapes; implementors fill these in.
    pub fn zeros(neq: usize, nvars: usize, ncons: usize) -> Evaluation {
        Evaluation {
            residuals: DVector::zeros(neq),
            jacobian: DMatrix::zeros(neq, nvars),
            constraints: DVector::zeros(ncons),
            constraint_jacobian: DMatrix::zeros(ncons, nvars),
        }
    }

    /// Shape check performed by the engine at every provider call. A wrong
    /// shape aborts the solve with a capability error instead of feeding the
    /// subproblem garbage.
    pub fn check_shapes(
        &self,
        neq: usize,
        nvars: usize,
        ncons: usize,
    ) -> Result<(), SolverError> {
        if self.residuals.len() != neq {
            return Err(SolverError::capability(format!(
                "evaluate() returned {} residuals, expected Neq = {}",
                self.residuals.len(),
                neq
            )));
        }
        if self.jacobian.nrows() != neq || self.jacobian.ncols() != nvars {
            return Err(SolverError::capability(format!(
                "evaluate() returned a {}x{} Jacobian, expected {}x{}",
                self.jacobian.nrows(),
                self.jacobian.ncols(),
                neq,
                nvars
            )));
        }
        if self.constraints.len() != ncons {
            return Err(SolverError::capability(format!(
                "evaluate() returned {} constraint values, expected Ncons = {}",
                self.constraints.len(),
                ncons
            )));
        }
        if self.constraint_jacobian.nrows() != ncons || self.constraint_jacobian.ncols() != nvars
        {
            return Err(SolverError::capability(format!(
                "evaluate() returned a {}x{} constraint Jacobian, expected {}x{}",
                self.constraint_jacobian.nrows(),
                self.constraint_jacobian.ncols(),
                ncons,
                nvars
            )));
        }
        Ok(())
    }
}

/// The capability the problem owner supplies: residuals and analytic
/// Jacobians at a candidate iterate. The engine calls evaluate() once per
/// trust-region trial, so it must be a pure function of x.
///
/// evaluate() has a default body that reports "not implemented" — a problem
/// type that forgets to override it fails loudly on the first call instead of
/// iterating on nonsense values.
pub trait ResidualProvider {
    fn num_equations(&self) -> usize;

    fn num_variables(&self) -> usize;

    fn num_constraints(&self) -> usize {
        0
    }

    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
        let _ = x;
        Err(SolverError::capability(
            "evaluate() is not implemented for this problem",
        ))
    }
}
