use strum_macros::Display;

/// Distinct causes behind a Failed solve. Each maps to its own published
/// integer code in 9..=18 so that callers looking only at the integer can
/// still tell what broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailureCause {
    /// Subproblem rank collapse that the regularization retry did not cure.
    RankDeficientSubproblem,
    /// An active constraint row with no usable Jacobian direction.
    SingularConstraintSet,
    /// Trust radius shrank below machine resolution without an accepted step.
    TrustRegionCollapse,
    /// The provider returned NaN/Inf residual values.
    NonFiniteResidual,
    /// The provider returned NaN/Inf Jacobian entries.
    NonFiniteJacobian,
    /// The integer-buffer header disagrees with the buffers the engine owns.
    WorkspaceExhausted,
    /// The active-set exchange loop hit its iteration cap.
    WorkingSetOverflow,
    /// Triangular back-substitution broke down after factorization.
    StepComputationFailed,
    /// The model predicted no reduction over a whole bookkeeping window.
    RatioTestBreakdown,
    /// An internal invariant was violated at runtime.
    InternalInconsistency,
}

impl FailureCause {
    pub fn code(&self) -> i32 {
        match self {
            FailureCause::RankDeficientSubproblem => 9,
            FailureCause::SingularConstraintSet => 10,
            FailureCause::TrustRegionCollapse => 11,
            FailureCause::NonFiniteResidual => 12,
            FailureCause::NonFiniteJacobian => 13,
            FailureCause::WorkspaceExhausted => 14,
            FailureCause::WorkingSetOverflow => 15,
            FailureCause::StepComputationFailed => 16,
            FailureCause::RatioTestBreakdown => 17,
            FailureCause::InternalInconsistency => 18,
        }
    }
}

/// Why the iteration stopped. Codes 2..=8 carry a solution with the stated
/// confidence level; 9..=18 mean "no reliable solution".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SolverStatus {
    /// Residual norm fell below the residual tolerance.
    Converged,
    /// The step kept hitting the trust-region boundary with no reduction left.
    StalledAtBound,
    /// Scaled gradient optimality condition satisfied, residual not zero.
    LocalMinimum,
    /// Residual reductions dropped to machine-noise scale.
    NoiseDetected,
    /// Accepted step norm fell below the absolute step tolerance.
    SmallAbsoluteStep,
    /// Accepted step norm fell below the relative step tolerance.
    SmallRelativeStep,
    /// Iteration cap reached before any other predicate fired.
    MaxIterationsReached,
    Failed(FailureCause),
}

impl SolverStatus {
    /// Published integer code of the fixed numbering.
    pub fn code(&self) -> i32 {
        match self {
            SolverStatus::Converged => 2,
            SolverStatus::StalledAtBound => 3,
            SolverStatus::LocalMinimum => 4,
            SolverStatus::NoiseDetected => 5,
            SolverStatus::SmallAbsoluteStep => 6,
            SolverStatus::SmallRelativeStep => 7,
            SolverStatus::MaxIterationsReached => 8,
            SolverStatus::Failed(cause) => cause.code(),
        }
    }

    pub fn from_code(code: i32) -> Option<SolverStatus> {
        let status = match code {
            2 => SolverStatus::Converged,
            3 => SolverStatus::StalledAtBound,
            4 => SolverStatus::LocalMinimum,
            5 => SolverStatus::NoiseDetected,
            6 => SolverStatus::SmallAbsoluteStep,
            7 => SolverStatus::SmallRelativeStep,
            8 => SolverStatus::MaxIterationsReached,
            9 => SolverStatus::Failed(FailureCause::RankDeficientSubproblem),
            10 => SolverStatus::Failed(FailureCause::SingularConstraintSet),
            11 => SolverStatus::Failed(FailureCause::TrustRegionCollapse),
            12 => SolverStatus::Failed(FailureCause::NonFiniteResidual),
            13 => SolverStatus::Failed(FailureCause::NonFiniteJacobian),
            14 => SolverStatus::Failed(FailureCause::WorkspaceExhausted),
            15 => SolverStatus::Failed(FailureCause::WorkingSetOverflow),
            16 => SolverStatus::Failed(FailureCause::StepComputationFailed),
            17 => SolverStatus::Failed(FailureCause::RatioTestBreakdown),
            18 => SolverStatus::Failed(FailureCause::InternalInconsistency),
            _ => return None,
        };
        Some(status)
    }

    /// Whether the final iterate may be used as a solution.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, SolverStatus::Failed(_))
    }

    pub fn describe(&self) -> &'static str {
        match self {
            SolverStatus::Converged => "residual norm below tolerance",
            SolverStatus::StalledAtBound => "limited by the trust-region boundary",
            SolverStatus::LocalMinimum => "local minimum of the residual norm",
            SolverStatus::NoiseDetected => "residual reduction lost in numerical noise",
            SolverStatus::SmallAbsoluteStep => "step norm below absolute tolerance",
            SolverStatus::SmallRelativeStep => "step norm below relative tolerance",
            SolverStatus::MaxIterationsReached => "iteration cap reached",
            SolverStatus::Failed(FailureCause::RankDeficientSubproblem) => {
                "subproblem rank deficient, no recovery"
            }
            SolverStatus::Failed(FailureCause::SingularConstraintSet) => {
                "constraint set singular"
            }
            SolverStatus::Failed(FailureCause::TrustRegionCollapse) => "trust radius collapsed",
            SolverStatus::Failed(FailureCause::NonFiniteResidual) => "non-finite residual",
            SolverStatus::Failed(FailureCause::NonFiniteJacobian) => "non-finite Jacobian",
            SolverStatus::Failed(FailureCause::WorkspaceExhausted) => "work buffers too small",
            SolverStatus::Failed(FailureCause::WorkingSetOverflow) => "active set did not settle",
            SolverStatus::Failed(FailureCause::StepComputationFailed) => {
                "triangular solve failed"
            }
            SolverStatus::Failed(FailureCause::RatioTestBreakdown) => {
                "model predicted no reduction"
            }
            SolverStatus::Failed(FailureCause::InternalInconsistency) => {
                "internal invariant violated"
            }
        }
    }
}
