//! Ascii frontends: einsum subscripts and bracketed contraction
//! trees.
//!
//! Contraction order is never derived here; a multi-operand
//! expression must spell its tree out with brackets, e.g.
//! `"[[km,nk->nm],mn->nn]"`.

mod parser;

pub use parser::{parse_einsum, parse_tree};

use crate::error::{ContractionError, ContractionResult};
use crate::tree::{ContractionTree, NodeId};
use crate::types::{DataType, DimId, DimSizes, MainKernel, TouchKernel};

/// A parsed binary einsum expression like `"km,nk->nm"`.
///
/// Subscript characters map directly onto dimension ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EinsumExpr {
    pub left: Vec<DimId>,
    pub right: Vec<DimId>,
    pub out: Vec<DimId>,
}

/// A parsed contraction tree with explicit structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeExpr {
    /// Input tensor subscript.
    Leaf(Vec<DimId>),
    /// Contraction of two subtrees into the given output subscript.
    Contract {
        left: Box<TreeExpr>,
        right: Box<TreeExpr>,
        out: Vec<DimId>,
    },
}

impl TreeExpr {
    /// Number of input tensors, left to right.
    pub fn num_leaves(&self) -> usize {
        match self {
            TreeExpr::Leaf(_) => 1,
            TreeExpr::Contract { left, right, .. } => left.num_leaves() + right.num_leaves(),
        }
    }

    /// Builds a contraction tree from this expression.
    ///
    /// `shapes` supplies one shape per leaf, in left-to-right order;
    /// dimension sizes are collected from them. Every contraction uses
    /// zero-initialized multiply-add kernels; the root is externally
    /// backed. Returns the tree, the leaf ids in input order and the
    /// root id.
    pub fn build(
        &self,
        shapes: &[&[usize]],
        dtype: DataType,
    ) -> ContractionResult<(ContractionTree, Vec<NodeId>, NodeId)> {
        if shapes.len() != self.num_leaves() {
            return Err(ContractionError::SizeMismatch {
                expected: self.num_leaves(),
                got: shapes.len(),
            });
        }

        let mut sizes = DimSizes::new();
        let mut next_shape = 0usize;
        collect_sizes(self, shapes, &mut next_shape, &mut sizes)?;

        let mut tree = ContractionTree::new(sizes);
        let mut leaves = Vec::with_capacity(shapes.len());
        let root = build_node(self, &mut tree, &mut leaves, dtype, true)?;
        Ok((tree, leaves, root))
    }
}

fn collect_sizes(
    expr: &TreeExpr,
    shapes: &[&[usize]],
    next_shape: &mut usize,
    sizes: &mut DimSizes,
) -> ContractionResult<()> {
    match expr {
        TreeExpr::Leaf(dims) => {
            let shape = shapes[*next_shape];
            *next_shape += 1;
            if shape.len() != dims.len() {
                return Err(ContractionError::SizeMismatch {
                    expected: dims.len(),
                    got: shape.len(),
                });
            }
            for (&dim, &size) in dims.iter().zip(shape.iter()) {
                if let Some(&known) = sizes.get(&dim) {
                    if known != size {
                        return Err(ContractionError::parse(format!(
                            "dimension '{}' has conflicting sizes {} and {}",
                            dim_name(dim),
                            known,
                            size
                        )));
                    }
                } else {
                    sizes.insert(dim, size);
                }
            }
            Ok(())
        }
        TreeExpr::Contract { left, right, .. } => {
            collect_sizes(left, shapes, next_shape, sizes)?;
            collect_sizes(right, shapes, next_shape, sizes)
        }
    }
}

fn build_node(
    expr: &TreeExpr,
    tree: &mut ContractionTree,
    leaves: &mut Vec<NodeId>,
    dtype: DataType,
    is_root: bool,
) -> ContractionResult<NodeId> {
    match expr {
        TreeExpr::Leaf(dims) => {
            let id = tree.leaf(dims, dtype);
            leaves.push(id);
            Ok(id)
        }
        TreeExpr::Contract { left, right, out } => {
            let left_id = build_node(left, tree, leaves, dtype, false)?;
            let right_id = build_node(right, tree, leaves, dtype, false)?;
            let id = if is_root {
                tree.binary_extern(
                    out,
                    dtype,
                    TouchKernel::Zero,
                    MainKernel::Madd,
                    TouchKernel::None,
                    left_id,
                    right_id,
                )
            } else {
                tree.binary(
                    out,
                    dtype,
                    TouchKernel::Zero,
                    MainKernel::Madd,
                    TouchKernel::None,
                    left_id,
                    right_id,
                )
            };
            Ok(id)
        }
    }
}

pub(crate) fn dim_name(dim: DimId) -> char {
    char::from_u32(dim as u32).unwrap_or('?')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::ContractionConfig;
    use crate::types::{TensorMut, TensorRef};
    use crate::tree::EvalBindings;

    #[test]
    fn test_build_counts_leaves() {
        let expr = parse_tree("[[km,nk->nm],mn->nn]").unwrap();
        assert_eq!(expr.num_leaves(), 3);

        let err = expr.build(&[&[4, 2], &[3, 4]], DataType::F32).unwrap_err();
        assert_eq!(err, ContractionError::SizeMismatch { expected: 3, got: 2 });
    }

    #[test]
    fn test_conflicting_sizes_rejected() {
        let expr = parse_tree("[ij,jk->ik]").unwrap();
        let err = expr
            .build(&[&[2, 3], &[4, 5]], DataType::F32)
            .unwrap_err();
        assert!(matches!(err, ContractionError::Parse { .. }));
    }

    #[test]
    fn test_built_tree_evaluates() {
        let expr = parse_tree("[ij,jk->ik]").unwrap();
        let (mut tree, leaves, root) = expr.build(&[&[2, 3], &[3, 2]], DataType::F32).unwrap();
        tree.compile(root, &ContractionConfig::default()).unwrap();

        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0f32, 0.0, 0.0, 1.0, 1.0, 0.0];
        let mut c = [0.0f32; 4];
        let mut bindings = EvalBindings::new();
        bindings
            .bind(leaves[0], TensorRef::F32(&a))
            .bind(leaves[1], TensorRef::F32(&b))
            .bind_output(root, TensorMut::F32(&mut c));
        tree.eval(&mut bindings);

        // c = a @ b with b = [[1,0],[0,1],[1,0]]
        assert_eq!(c, [4.0, 2.0, 10.0, 5.0]);
    }
}
