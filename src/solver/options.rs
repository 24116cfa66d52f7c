use crate::solver::errors::SolverError;

// Option ids. Floating-point options carry a 1-based location into the ropt
// array; integer options carry their value directly in the slot after the id.
// The gaps in the numbering are deliberate: they keep option lists written
// against the historical table recognizable.
pub const OPT_RESIDUAL_TOL: i32 = 2;
pub const OPT_ABS_STEP_TOL: i32 = 4;
pub const OPT_REL_STEP_TOL: i32 = 5;
pub const OPT_MAX_ITER: i32 = 6;
pub const OPT_VERBOSE: i32 = 17;
/// "No more options" sentinel terminating the iopt array.
pub const OPT_SENTINEL: i32 = 99;

/// Solver tolerances and limits. The typed struct is the caller surface; the
/// engine itself consumes the flat iopt/ropt arrays produced by encode().
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Residual-norm tolerance: iteration stops converged once ||f|| falls below it.
    pub tolf: f64,
    /// Absolute step tolerance.
    pub told: f64,
    /// Relative step tolerance.
    pub tolx: f64,
    /// Iteration cap.
    pub max_iter: usize,
    /// Emit per-iteration log lines and the final statistics table.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            tolf: 1e-5,
            told: 1e-5,
            tolx: 1e-5,
            max_iter: 100,
            verbose: false,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.tolf > 0.0) || !(self.told > 0.0) || !(self.tolx > 0.0) {
            return Err(SolverError::configuration(format!(
                "tolerances must be positive, got tolf={}, told={}, tolx={}",
                self.tolf, self.told, self.tolx
            )));
        }
        if self.max_iter == 0 {
            return Err(SolverError::configuration(
                "maxIter must be a positive integer",
            ));
        }
        Ok(())
    }

    /// Flatten into the {id, location, value} triples the engine consumes,
    /// terminated by the sentinel entry.
    pub fn encode(&self) -> (Vec<i32>, Vec<f64>) {
        let ropt = vec![self.tolf, self.told, self.tolx];
        let iopt = vec![
            OPT_RESIDUAL_TOL,
            1,
            OPT_ABS_STEP_TOL,
            2,
            OPT_REL_STEP_TOL,
            3,
            OPT_MAX_ITER,
            self.max_iter as i32,
            OPT_VERBOSE,
            if self.verbose { 1 } else { 0 },
            OPT_SENTINEL,
        ];
        (iopt, ropt)
    }

    /// Rebuild options from the flat arrays, starting from defaults and
    /// applying overrides until the sentinel. Unknown ids and out-of-range
    /// locations are configuration errors, never silently skipped.
    pub fn decode(iopt: &[i32], ropt: &[f64]) -> Result<SolverOptions, SolverError> {
        let mut options = SolverOptions::default();
        let mut k = 0;
        loop {
            let id = *iopt.get(k).ok_or_else(|| {
                SolverError::configuration("option array ended without the sentinel entry")
            })?;
            if id == OPT_SENTINEL {
                break;
            }
            let operand = *iopt.get(k + 1).ok_or_else(|| {
                SolverError::configuration(format!("option {} is missing its operand", id))
            })?;
            match id {
                OPT_RESIDUAL_TOL | OPT_ABS_STEP_TOL | OPT_REL_STEP_TOL => {
                    let loc = operand;
                    if loc < 1 || loc as usize > ropt.len() {
                        return Err(SolverError::configuration(format!(
                            "option {} points at ropt location {} outside 1..={}",
                            id,
                            loc,
                            ropt.len()
                        )));
                    }
                    let value = ropt[(loc - 1) as usize];
                    match id {
                        OPT_RESIDUAL_TOL => options.tolf = value,
                        OPT_ABS_STEP_TOL => options.told = value,
                        _ => options.tolx = value,
                    }
                }
                OPT_MAX_ITER => {
                    if operand <= 0 {
                        return Err(SolverError::configuration(format!(
                            "iteration cap option carries non-positive value {}",
                            operand
                        )));
                    }
                    options.max_iter = operand as usize;
                }
                OPT_VERBOSE => options.verbose = operand != 0,
                other => {
                    return Err(SolverError::configuration(format!(
                        "unknown option id {}",
                        other
                    )));
                }
            }
            k += 2;
        }
        options.validate()?;
        Ok(options)
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     TESTS
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SolverOptions::default();
        assert_eq!(options.tolf, 1e-5);
        assert_eq!(options.told, 1e-5);
        assert_eq!(options.tolx, 1e-5);
        assert_eq!(options.max_iter, 100);
        assert!(!options.verbose);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let options = SolverOptions {
            tolf: 1e-16,
            told: 1e-8,
            tolx: 1e-8,
            max_iter: 250,
            verbose: true,
        };
        let (iopt, ropt) = options.encode();
        assert_eq!(*iopt.last().unwrap(), OPT_SENTINEL);
        let decoded = SolverOptions::decode(&iopt, &ropt).unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn test_missing_sentinel_is_rejected() {
        let options = SolverOptions::default();
        let (mut iopt, ropt) = options.encode();
        iopt.pop();
        assert!(SolverOptions::decode(&iopt, &ropt).unwrap_err().is_configuration());
    }

    #[test]
    fn test_unknown_option_id_is_rejected() {
        let iopt = vec![42, 1, OPT_SENTINEL];
        let ropt = vec![1e-5];
        assert!(SolverOptions::decode(&iopt, &ropt).unwrap_err().is_configuration());
    }

    #[test]
    fn test_bad_location_is_rejected() {
        let iopt = vec![OPT_RESIDUAL_TOL, 7, OPT_SENTINEL];
        let ropt = vec![1e-5];
        assert!(SolverOptions::decode(&iopt, &ropt).unwrap_err().is_configuration());
    }

    #[test]
    fn test_non_positive_tolerance_is_rejected() {
        let options = SolverOptions {
            tolf: 0.0,
            ..SolverOptions::default()
        };
        assert!(options.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_zero_iteration_cap_is_rejected() {
        let options = SolverOptions {
            max_iter: 0,
            ..SolverOptions::default()
        };
        assert!(options.validate().unwrap_err().is_configuration());
    }
}
