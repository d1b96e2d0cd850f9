//! Nodes of a contraction tree.

use smallvec::SmallVec;

use crate::kernels::{CopyKernelFn, KernelSet};
use crate::memory::ScratchHandle;
use crate::planner::LoopPlan;
use crate::types::{DataType, DimVec, MainKernel, TouchKernel};

/// Handle of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// Externally backed input tensor.
    Leaf,
    /// Contraction of two children.
    Binary { left: NodeId, right: NodeId },
}

/// Permutation of external data into the node's internal layout,
/// executed before the node is consumed.
#[derive(Debug, Clone)]
pub(crate) struct PermutePlan {
    pub sizes: Vec<usize>,
    pub src_strides: Vec<isize>,
    pub dst_strides: Vec<isize>,
    pub copy: CopyKernelFn,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    /// Declared dimension ids, outermost first.
    pub dims_ext: DimVec,
    /// Internal dimension ids; may be a parent-imposed permutation of
    /// the declared ones for scratch-backed nodes and leaves.
    pub dims_int: DimVec,
    /// Leaf stride overrides for sliced or padded external data.
    pub custom_strides: Option<SmallVec<[isize; 8]>>,
    pub dtype: DataType,
    pub first_touch: TouchKernel,
    pub main: MainKernel,
    pub last_touch: TouchKernel,
    /// True if this node reads an auxiliary operand.
    pub has_aux: bool,
    /// True if the node's data lives in caller-owned memory.
    pub external: bool,

    pub compiled: bool,
    pub plan: Option<LoopPlan>,
    pub kernels: Option<KernelSet>,
    pub scratch: Option<ScratchHandle>,
    /// Internally owned buffer for locked or permuted external data.
    pub private: Option<Vec<u8>>,
    pub permute: Option<PermutePlan>,
    pub locked: bool,

    /// Number of parent edges referencing this node.
    pub parents: usize,
    /// Parent edges that have not yet released the scratch
    /// reservation.
    pub pending_release: usize,

    pub num_ops_node: u64,
    pub num_ops_children: u64,

    pub last_eval_epoch: u64,
    /// Resolved data pointer of the current evaluation.
    pub eval_ptr: *const u8,
    /// Expected element count of an external binding (leaf data or
    /// external output), fixed at compile time.
    pub bind_elems: usize,
}

impl Node {
    pub fn leaf(dims: DimVec, custom_strides: Option<SmallVec<[isize; 8]>>, dtype: DataType) -> Self {
        Self {
            kind: NodeKind::Leaf,
            dims_int: dims.clone(),
            dims_ext: dims,
            custom_strides,
            dtype,
            first_touch: TouchKernel::None,
            main: MainKernel::Madd,
            last_touch: TouchKernel::None,
            has_aux: false,
            external: true,
            compiled: false,
            plan: None,
            kernels: None,
            scratch: None,
            private: None,
            permute: None,
            locked: false,
            parents: 0,
            pending_release: 0,
            num_ops_node: 0,
            num_ops_children: 0,
            last_eval_epoch: 0,
            eval_ptr: core::ptr::null(),
            bind_elems: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn binary(
        dims: DimVec,
        dtype: DataType,
        first_touch: TouchKernel,
        main: MainKernel,
        last_touch: TouchKernel,
        left: NodeId,
        right: NodeId,
        external: bool,
    ) -> Self {
        Self {
            kind: NodeKind::Binary { left, right },
            dims_int: dims.clone(),
            dims_ext: dims,
            custom_strides: None,
            dtype,
            first_touch,
            main,
            last_touch,
            has_aux: false,
            external,
            compiled: false,
            plan: None,
            kernels: None,
            scratch: None,
            private: None,
            permute: None,
            locked: false,
            parents: 0,
            pending_release: 0,
            num_ops_node: 0,
            num_ops_children: 0,
            last_eval_epoch: 0,
            eval_ptr: core::ptr::null(),
            bind_elems: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    /// True if a parent may impose its preferred dimension ordering.
    pub fn relayoutable(&self) -> bool {
        match self.kind {
            NodeKind::Leaf => true,
            // an external output cannot be re-laid-out under the caller
            NodeKind::Binary { .. } => !self.external,
        }
    }
}
