/// A collection of canonical bounded least-squares problems used by the
/// tests and benches.
use crate::solver::bounds::BoundSpec;
use crate::solver::engine::SolverEngine;
use crate::solver::errors::SolverError;
use crate::solver::options::SolverOptions;
use crate::solver::problem::{Evaluation, ResidualProvider};
use nalgebra::{DVector, dvector};
use strum_macros::EnumIter;

/// f(x) = x - 3: one exact Gauss-Newton step from anywhere.
pub struct ShiftedRoot;

impl ResidualProvider for ShiftedRoot {
    fn num_equations(&self) -> usize {
        1
    }
    fn num_variables(&self) -> usize {
        1
    }
    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
        let mut eval = Evaluation::zeros(1, 1, 0);
        eval.residuals[0] = x[0] - 3.0;
        eval.jacobian[(0, 0)] = 1.0;
        Ok(eval)
    }
}

/// f(x) = (x - 100)^4: a flat quartic valley that exercises slow,
/// monotone trust-region progress.
pub struct QuarticValley;

impl ResidualProvider for QuarticValley {
    fn num_equations(&self) -> usize {
        1
    }
    fn num_variables(&self) -> usize {
        1
    }
    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
        let mut eval = Evaluation::zeros(1, 1, 0);
        let d = x[0] - 100.0;
        eval.residuals[0] = d.powi(4);
        eval.jacobian[(0, 0)] = 4.0 * d.powi(3);
        Ok(eval)
    }
}

/// f(x) = x: minimizing pushes straight into the lower bound at 1.
pub struct BoundedLine;

impl ResidualProvider for BoundedLine {
    fn num_equations(&self) -> usize {
        1
    }
    fn num_variables(&self) -> usize {
        1
    }
    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
        let mut eval = Evaluation::zeros(1, 1, 0);
        eval.residuals[0] = x[0];
        eval.jacobian[(0, 0)] = 1.0;
        Ok(eval)
    }
}

/// Fit f(t) = a*exp(b*t) + c*exp(d*t) to five samples, with sign bounds on
/// all four parameters and the linear constraint 0.05 <= b - d keeping the
/// two decay rates apart.
pub struct ExponentialSumFit {
    pub tdata: Vec<f64>,
    pub fdata: Vec<f64>,
}

impl ExponentialSumFit {
    pub fn new() -> ExponentialSumFit {
        ExponentialSumFit {
            tdata: vec![0.05, 0.1, 0.4, 0.5, 1.0],
            fdata: vec![2.206, 1.994, 1.350, 1.216, 0.7358],
        }
    }
}

impl ResidualProvider for ExponentialSumFit {
    fn num_equations(&self) -> usize {
        self.tdata.len()
    }
    fn num_variables(&self) -> usize {
        4
    }
    fn num_constraints(&self) -> usize {
        1
    }
    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
        let (a, b, c, d) = (x[0], x[1], x[2], x[3]);
        let mut eval = Evaluation::zeros(self.tdata.len(), 4, 1);
        for (i, (&t, &f)) in self.tdata.iter().zip(self.fdata.iter()).enumerate() {
            eval.residuals[i] = a * (b * t).exp() + c * (d * t).exp() - f;
            eval.jacobian[(i, 0)] = (b * t).exp();
            eval.jacobian[(i, 1)] = a * t * (b * t).exp();
            eval.jacobian[(i, 2)] = (d * t).exp();
            eval.jacobian[(i, 3)] = c * t * (d * t).exp();
        }
        eval.constraints[0] = b - d;
        eval.constraint_jacobian[(0, 1)] = 1.0;
        eval.constraint_jacobian[(0, 3)] = -1.0;
        Ok(eval)
    }
}

/// The catalog itself: every variant knows its shape, bounds, starting
/// point and options, and can run itself end to end.
#[derive(Debug, PartialEq, Eq, EnumIter)]
pub enum LsqExample {
    ShiftedRoot,
    QuarticValley,
    BoundedLine,
    ExponentialSumFit,
}

impl LsqExample {
    pub fn dims(&self) -> (usize, usize, usize) {
        match self {
            LsqExample::ShiftedRoot => (1, 1, 0),
            LsqExample::QuarticValley => (1, 1, 0),
            LsqExample::BoundedLine => (1, 1, 0),
            LsqExample::ExponentialSumFit => (5, 4, 1),
        }
    }

    pub fn bounds(&self) -> Option<Vec<BoundSpec>> {
        match self {
            LsqExample::ShiftedRoot => None,
            LsqExample::QuarticValley => None,
            LsqExample::BoundedLine => Some(vec![BoundSpec::Lower(1.0)]),
            LsqExample::ExponentialSumFit => Some(vec![
                BoundSpec::Lower(0.0),
                BoundSpec::Both(-25.0, 0.0),
                BoundSpec::Lower(0.0),
                BoundSpec::Both(-25.0, 0.0),
                BoundSpec::Lower(0.05),
            ]),
        }
    }

    pub fn start(&self) -> DVector<f64> {
        match self {
            LsqExample::ShiftedRoot => dvector![0.0],
            LsqExample::QuarticValley => dvector![1.0],
            LsqExample::BoundedLine => dvector![5.0],
            LsqExample::ExponentialSumFit => dvector![0.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn options(&self) -> SolverOptions {
        match self {
            LsqExample::QuarticValley => SolverOptions {
                tolf: 1e-16,
                told: 1e-8,
                tolx: 1e-8,
                max_iter: 100,
                verbose: false,
            },
            _ => SolverOptions::default(),
        }
    }

    pub fn problem(&self) -> Box<dyn ResidualProvider> {
        match self {
            LsqExample::ShiftedRoot => Box::new(ShiftedRoot),
            LsqExample::QuarticValley => Box::new(QuarticValley),
            LsqExample::BoundedLine => Box::new(BoundedLine),
            LsqExample::ExponentialSumFit => Box::new(ExponentialSumFit::new()),
        }
    }

    /// Configure a fresh engine and solve the example end to end.
    pub fn run(&self) -> Result<(DVector<f64>, i32), SolverError> {
        let (neq, nvars, ncons) = self.dims();
        let mut engine = SolverEngine::new();
        engine.initialize(neq, nvars, ncons, self.bounds(), self.options())?;
        engine.solve(self.start(), self.problem().as_ref())
    }
}
