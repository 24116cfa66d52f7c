use crate::solver::errors::SolverError;
use itertools::izip;

// Indicator convention of the bounded least-squares family: the tag travels
// next to the two bound values in flat parallel arrays.
pub const IND_LOWER: i32 = 1;
pub const IND_UPPER: i32 = 2;
pub const IND_BOTH: i32 = 3;
pub const IND_FREE: i32 = 4;

/// Simple bound attached to one variable or to one linear constraint row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundSpec {
    Free,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl BoundSpec {
    pub fn tag(&self) -> i32 {
        match self {
            BoundSpec::Lower(_) => IND_LOWER,
            BoundSpec::Upper(_) => IND_UPPER,
            BoundSpec::Both(_, _) => IND_BOTH,
            BoundSpec::Free => IND_FREE,
        }
    }

    /// Lower > upper is a configuration error, never a silent clamp.
    pub fn validate(&self, position: usize) -> Result<(), SolverError> {
        if let BoundSpec::Both(lower, upper) = self {
            if lower > upper {
                return Err(SolverError::configuration(format!(
                    "bound {}: lower {} exceeds upper {}",
                    position, lower, upper
                )));
            }
        }
        Ok(())
    }

    /// Convenience constructor from an optional pair, the surface callers
    /// usually hold their bounds in.
    pub fn from_pair(lower: Option<f64>, upper: Option<f64>) -> BoundSpec {
        match (lower, upper) {
            (Some(l), Some(u)) => BoundSpec::Both(l, u),
            (Some(l), None) => BoundSpec::Lower(l),
            (None, Some(u)) => BoundSpec::Upper(u),
            (None, None) => BoundSpec::Free,
        }
    }
}

/// Flat parallel arrays the engine consumes: one tag and up to two values per
/// variable, then per constraint row. Unused value slots carry 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArrays {
    pub ind: Vec<i32>,
    pub bl: Vec<f64>,
    pub bu: Vec<f64>,
    pub nvars: usize,
    pub ncons: usize,
}

/// Encode a bound list into the flat arrays. The list length must equal
/// Nvars + Ncons exactly: variable bounds first, constraint-row bounds after.
/// Partial lists are rejected, not defaulted.
pub fn encode_bounds(
    specs: &[BoundSpec],
    nvars: usize,
    ncons: usize,
) -> Result<BoundArrays, SolverError> {
    let expected = nvars + ncons;
    if specs.len() != expected {
        return Err(SolverError::configuration(format!(
            "bound list length {} != Nvars + Ncons = {}",
            specs.len(),
            expected
        )));
    }
    let mut ind = vec![IND_FREE; expected];
    let mut bl = vec![0.0; expected];
    let mut bu = vec![0.0; expected];
    for (k, spec) in specs.iter().enumerate() {
        spec.validate(k)?;
        ind[k] = spec.tag();
        match *spec {
            BoundSpec::Lower(l) => bl[k] = l,
            BoundSpec::Upper(u) => bu[k] = u,
            BoundSpec::Both(l, u) => {
                bl[k] = l;
                bu[k] = u;
            }
            BoundSpec::Free => {}
        }
    }
    Ok(BoundArrays {
        ind,
        bl,
        bu,
        nvars,
        ncons,
    })
}

/// Reconstruct one BoundSpec from its encoded slot.
pub fn decode_bound(ind: i32, bl: f64, bu: f64) -> Result<BoundSpec, SolverError> {
    match ind {
        IND_LOWER => Ok(BoundSpec::Lower(bl)),
        IND_UPPER => Ok(BoundSpec::Upper(bu)),
        IND_BOTH => Ok(BoundSpec::Both(bl, bu)),
        IND_FREE => Ok(BoundSpec::Free),
        other => Err(SolverError::configuration(format!(
            "unknown bound indicator {}",
            other
        ))),
    }
}

impl BoundArrays {
    /// All variables and constraint rows unconstrained.
    pub fn all_free(nvars: usize, ncons: usize) -> BoundArrays {
        let n = nvars + ncons;
        BoundArrays {
            ind: vec![IND_FREE; n],
            bl: vec![0.0; n],
            bu: vec![0.0; n],
            nvars,
            ncons,
        }
    }

    pub fn decode(&self) -> Result<Vec<BoundSpec>, SolverError> {
        izip!(&self.ind, &self.bl, &self.bu)
            .map(|(&ind, &bl, &bu)| decode_bound(ind, bl, bu))
            .collect()
    }

    /// Slot for constraint row j (rows live after the variable slots).
    pub fn constraint_slot(&self, j: usize) -> (i32, f64, f64) {
        let k = self.nvars + j;
        (self.ind[k], self.bl[k], self.bu[k])
    }

    /// Per-variable move limits for a step from x: the intersection of the
    /// bound box translated to the current iterate with the trust box of
    /// half-width trust. An iterate sitting outside its bounds gets a
    /// window that pushes it back inside.
    pub fn move_limits(&self, x: &[f64], trust: f64, lo: &mut [f64], hi: &mut [f64]) {
        for i in 0..self.nvars {
            let mut lo_i = -trust;
            let mut hi_i = trust;
            match self.ind[i] {
                IND_LOWER => lo_i = lo_i.max(self.bl[i] - x[i]),
                IND_UPPER => hi_i = hi_i.min(self.bu[i] - x[i]),
                IND_BOTH => {
                    lo_i = lo_i.max(self.bl[i] - x[i]);
                    hi_i = hi_i.min(self.bu[i] - x[i]);
                }
                _ => {}
            }
            if lo_i > hi_i {
                // infeasible iterate: collapse the window toward feasibility
                if lo_i > 0.0 {
                    hi_i = lo_i;
                } else {
                    lo_i = hi_i;
                }
            }
            lo[i] = lo_i;
            hi[i] = hi_i;
        }
    }
}
