///  Example#1
/// ```
/// //solve f(x) = x - 3 = 0 in the least-squares sense
///    // first describe the problem: residuals and analytic Jacobian
/// use RustedLSQ::solver::engine::SolverEngine;
/// use RustedLSQ::solver::errors::SolverError;
/// use RustedLSQ::solver::options::SolverOptions;
/// use RustedLSQ::solver::problem::{Evaluation, ResidualProvider};
/// use nalgebra::{DVector, dvector};
///
/// struct Shifted;
/// impl ResidualProvider for Shifted {
///     fn num_equations(&self) -> usize { 1 }
///     fn num_variables(&self) -> usize { 1 }
///     fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, SolverError> {
///         let mut eval = Evaluation::zeros(1, 1, 0);
///         eval.residuals[0] = x[0] - 3.0;
///         eval.jacobian[(0, 0)] = 1.0;
///         Ok(eval)
///     }
/// }
///
/// // then configure the engine and solve
/// let mut engine = SolverEngine::new();
/// engine.initialize(1, 1, 0, None, SolverOptions::default()).unwrap();
/// let (x, igo) = engine.solve(dvector![0.0], &Shifted).unwrap();
/// assert_eq!(igo, 2);
/// assert!((x[0] - 3.0).abs() < 1e-5);
/// ```
/// Example#2
/// ```
/// // bounds pin the minimizer of f(x) = x at the lower bound
/// use RustedLSQ::solver::Examples_and_utils::LsqExample;
/// let (x, igo) = LsqExample::BoundedLine.run().unwrap();
/// assert!((x[0] - 1.0).abs() < 1e-5);
/// println!("x = {:?}, status = {}", x, igo);
/// ```
pub mod Examples_and_utils;
pub mod bounds;
pub mod engine;
pub mod errors;
pub mod options;
pub mod problem;
pub mod status;
pub mod subproblem;
pub mod workspace;
