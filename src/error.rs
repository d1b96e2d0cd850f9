//! Error types for contraction-tree compilation.

use crate::types::{DataType, DimId};

/// Errors that can occur while building, parsing or compiling a
/// contraction tree.
///
/// All variants are compile-phase errors: a tree that compiled
/// successfully evaluates without an error channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractionError {
    /// Invalid einsum or tree notation syntax.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Dimension appears in the output but in neither input.
    #[error("dimension {dim} appears in the output but in neither input")]
    UnmappedOutputDim { dim: DimId },

    /// Dimension appears in exactly one input and not in the output.
    #[error("dimension {dim} appears in one input only and not in the output")]
    DanglingInputDim { dim: DimId },

    /// No size registered for a referenced dimension id.
    #[error("no size registered for dimension {dim}")]
    MissingDimSize { dim: DimId },

    /// Operand data types cannot be combined.
    #[error("unsupported data type combination: left {left:?}, right {right:?}, out {out:?}")]
    UnsupportedDtypes {
        left: DataType,
        right: DataType,
        out: DataType,
    },

    /// A kernel type was requested in a position it cannot fill.
    #[error("kernel {kernel} cannot be used as the {position} kernel")]
    InvalidKernel {
        kernel: &'static str,
        position: &'static str,
    },

    /// Complex kernels require a leading batch dimension of size 2
    /// separating the real and imaginary planes.
    #[error("complex kernels require a leading batch dimension of size 2")]
    InvalidComplexDim,

    /// The operand stride pattern cannot be realized by the
    /// matrix-multiply primitive, even with packing.
    #[error("{operand} operand stride pattern not realizable by the primitive")]
    IncompatibleStrides { operand: &'static str },

    /// A custom stride override undercuts the dense extent of the
    /// dimensions inside it.
    #[error("stride override {stride} for dimension {dim} undercuts the dense extent {required}")]
    StrideUndercut {
        dim: DimId,
        stride: isize,
        required: isize,
    },

    /// Operation requires a compiled tree.
    #[error("operation requires a compiled tree")]
    NotCompiled,

    /// The tree was already compiled.
    #[error("the tree was already compiled")]
    AlreadyCompiled,

    /// The node has no external data to operate on.
    #[error("node has no external data binding")]
    NoDataProvided,

    /// Bound data does not match the node's tensor extent.
    #[error("bound data has {got} elements, node expects {expected}")]
    SizeMismatch { expected: usize, got: usize },

    /// Bound data does not match the node's data type.
    #[error("bound data is {got:?}, node is {expected:?}")]
    DtypeMismatch { expected: DataType, got: DataType },
}

impl ContractionError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// Result type for contraction-tree operations.
pub type ContractionResult<T> = core::result::Result<T, ContractionError>;
