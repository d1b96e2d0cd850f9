//! Dimension-role classification for binary contractions.

use crate::error::{ContractionError, ContractionResult};
use crate::types::{DimId, DimRole, DimVec};

/// Classified dimensions of one binary contraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimRoles {
    /// Role of every output dimension, parallel to the output id list.
    pub out_roles: Vec<DimRole>,
    /// Batch dimension ids in output order.
    pub c: DimVec,
    /// Left-only dimension ids in output order.
    pub m: DimVec,
    /// Right-only dimension ids in output order.
    pub n: DimVec,
    /// Contracted dimension ids in left-operand order.
    pub k: DimVec,
}

/// Assigns a role to every dimension of a binary contraction.
///
/// A dimension present in both inputs and the output is a batch (C)
/// dimension; present in the left input and the output an M dimension;
/// right input and output an N dimension; both inputs but not the
/// output a contracted (K) dimension. Any other occurrence pattern is
/// a compilation error.
pub fn classify(left: &[DimId], right: &[DimId], out: &[DimId]) -> ContractionResult<DimRoles> {
    let mut roles = DimRoles {
        out_roles: Vec::with_capacity(out.len()),
        c: DimVec::new(),
        m: DimVec::new(),
        n: DimVec::new(),
        k: DimVec::new(),
    };

    for &dim in out {
        let in_left = left.contains(&dim);
        let in_right = right.contains(&dim);
        let role = match (in_left, in_right) {
            (true, true) => DimRole::C,
            (true, false) => DimRole::M,
            (false, true) => DimRole::N,
            (false, false) => return Err(ContractionError::UnmappedOutputDim { dim }),
        };
        roles.out_roles.push(role);
        match role {
            DimRole::C => roles.c.push(dim),
            DimRole::M => roles.m.push(dim),
            DimRole::N => roles.n.push(dim),
            DimRole::K => unreachable!(),
        }
    }

    for &dim in left {
        if out.contains(&dim) {
            continue;
        }
        if right.contains(&dim) {
            roles.k.push(dim);
        } else {
            return Err(ContractionError::DanglingInputDim { dim });
        }
    }

    for &dim in right {
        if !out.contains(&dim) && !left.contains(&dim) {
            return Err(ContractionError::DanglingInputDim { dim });
        }
    }

    Ok(roles)
}
