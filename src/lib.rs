//! # einsum-loops
//!
//! Compiles binary einsum contraction trees into loop nests over
//! matrix-multiply and elementwise primitives.
//!
//! Every contraction node is decomposed into explicit loops classified
//! by dimension role (batch/M/N/K); the trailing contiguous loops are
//! absorbed into a single primitive call, operands are repacked when
//! their strides cannot feed the primitive directly, and intermediate
//! results live in a stack-discipline scratch arena sized to the
//! minimum concurrent footprint of the tree.
//!
//! ## Example
//!
//! ```
//! use einsum_loops::notation::parse_tree;
//! use einsum_loops::{ContractionConfig, DataType, EvalBindings, TensorMut, TensorRef};
//!
//! // km,nk->nm with m=2, n=3, k=4
//! let expr = parse_tree("[km,nk->nm]")?;
//! let (mut tree, leaves, root) = expr.build(&[&[4, 2], &[3, 4]], DataType::F32)?;
//! tree.compile(root, &ContractionConfig::default())?;
//!
//! let a = vec![1.0f32; 8];
//! let b = vec![1.0f32; 12];
//! let mut c = vec![0.0f32; 6];
//!
//! let mut bindings = EvalBindings::new();
//! bindings
//!     .bind(leaves[0], TensorRef::F32(&a))
//!     .bind(leaves[1], TensorRef::F32(&b))
//!     .bind_output(root, TensorMut::F32(&mut c));
//! tree.eval(&mut bindings);
//!
//! assert_eq!(c, vec![4.0; 6]);
//! # Ok::<(), einsum_loops::ContractionError>(())
//! ```

pub mod error;
pub mod kernels;
pub mod launch;
pub mod memory;
pub mod notation;
pub mod planner;
pub mod tree;
pub mod types;

pub use error::{ContractionError, ContractionResult};
pub use launch::ContractionConfig;
pub use tree::{ContractionTree, EvalBindings, NodeId};
pub use types::{DataType, MainKernel, TensorMut, TensorRef, TouchKernel};
