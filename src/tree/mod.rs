//! Contraction trees: the recursive structure tying the planner, the
//! kernels and the scratch arena together.
//!
//! A tree owns its nodes in an arena indexed by [`NodeId`]; children
//! are referenced by handle and may be shared by several parents, with
//! a per-edge release count deciding when an intermediate's scratch
//! buffer returns to the arena. Compilation walks the tree bottom-up,
//! reserving scratch layer by layer so that sibling subtrees reuse the
//! same memory; evaluation walks it bottom-up again, running each
//! node's compiled loop nest.

mod node;

pub use node::NodeId;

use log::debug;
use smallvec::SmallVec;

use node::{Node, NodeKind, PermutePlan};

use crate::error::{ContractionError, ContractionResult};
use crate::kernels::{copy_kernel, select_kernels};
use crate::launch::{ContractionConfig, Operands, contract};
use crate::memory::{ScratchArena, ScratchMemory};
use crate::planner::{
    OperandLayout, plan_loops, plan_parallel, preferred_child_orderings,
};
use crate::types::{
    DataType, DimId, DimRole, DimSizes, DimVec, MainKernel, TensorMut, TensorRef, TouchKernel,
};

/// External data bound to a tree for one evaluation.
///
/// Leaves take inputs, auxiliary-accumulating nodes take an `aux`
/// operand, and externally backed nodes take an output buffer.
#[derive(Default)]
pub struct EvalBindings<'a> {
    inputs: std::collections::HashMap<usize, TensorRef<'a>>,
    aux: std::collections::HashMap<usize, TensorRef<'a>>,
    outputs: std::collections::HashMap<usize, TensorMut<'a>>,
}

impl<'a> EvalBindings<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds leaf input data.
    pub fn bind(&mut self, node: NodeId, data: TensorRef<'a>) -> &mut Self {
        self.inputs.insert(node.0, data);
        self
    }

    /// Binds the auxiliary operand of a contraction node.
    pub fn bind_aux(&mut self, node: NodeId, data: TensorRef<'a>) -> &mut Self {
        self.aux.insert(node.0, data);
        self
    }

    /// Binds the output buffer of an externally backed node.
    pub fn bind_output(&mut self, node: NodeId, data: TensorMut<'a>) -> &mut Self {
        self.outputs.insert(node.0, data);
        self
    }
}

#[derive(Debug)]
enum ScratchState {
    Planning(ScratchArena),
    Ready(ScratchMemory),
}

/// A binary einsum contraction tree.
///
/// Nodes are created with [`leaf`](Self::leaf) and
/// [`binary`](Self::binary), compiled once with
/// [`compile`](Self::compile) and evaluated any number of times with
/// [`eval`](Self::eval).
#[derive(Debug)]
pub struct ContractionTree {
    sizes: DimSizes,
    nodes: Vec<Node>,
    state: ScratchState,
    root: Option<NodeId>,
    compiled: bool,
    epoch: u64,
}

impl ContractionTree {
    /// Creates an empty tree over the shared dimension-size mapping.
    pub fn new(sizes: DimSizes) -> Self {
        Self {
            sizes,
            nodes: Vec::new(),
            state: ScratchState::Planning(ScratchArena::new()),
            root: None,
            compiled: false,
            epoch: 0,
        }
    }

    /// Size mapping shared by all nodes.
    pub fn dim_sizes(&self) -> &DimSizes {
        &self.sizes
    }

    /// Adds a leaf backed by external data with natural dense strides.
    pub fn leaf(&mut self, dims: &[DimId], dtype: DataType) -> NodeId {
        self.push(Node::leaf(DimVec::from_slice(dims), None, dtype))
    }

    /// Adds a leaf with caller-supplied element strides (sliced or
    /// padded external data).
    pub fn leaf_with_strides(
        &mut self,
        dims: &[DimId],
        strides: &[isize],
        dtype: DataType,
    ) -> NodeId {
        self.push(Node::leaf(
            DimVec::from_slice(dims),
            Some(SmallVec::from_slice(strides)),
            dtype,
        ))
    }

    /// Adds a contraction node whose result lives in tree-managed
    /// scratch memory.
    pub fn binary(
        &mut self,
        dims: &[DimId],
        dtype: DataType,
        first_touch: TouchKernel,
        main: MainKernel,
        last_touch: TouchKernel,
        left: NodeId,
        right: NodeId,
    ) -> NodeId {
        self.push(Node::binary(
            DimVec::from_slice(dims),
            dtype,
            first_touch,
            main,
            last_touch,
            left,
            right,
            false,
        ))
    }

    /// Adds a contraction node whose result is written to caller
    /// memory bound at evaluation time.
    #[allow(clippy::too_many_arguments)]
    pub fn binary_extern(
        &mut self,
        dims: &[DimId],
        dtype: DataType,
        first_touch: TouchKernel,
        main: MainKernel,
        last_touch: TouchKernel,
        left: NodeId,
        right: NodeId,
    ) -> NodeId {
        self.push(Node::binary(
            DimVec::from_slice(dims),
            dtype,
            first_touch,
            main,
            last_touch,
            left,
            right,
            true,
        ))
    }

    /// Declares that `node` reads an auxiliary operand (required by
    /// the Copy and Add touch kernels). Must precede compilation.
    pub fn with_aux(&mut self, node: NodeId) {
        self.nodes[node.0].has_aux = true;
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Compiles the tree rooted at `root`: plans every contraction,
    /// reserves scratch for the intermediates and performs the single
    /// backing allocation.
    ///
    /// The first failure propagates without rolling back reservations
    /// already made; use
    /// [`cancel_memory_reservation`](Self::cancel_memory_reservation)
    /// to return them explicitly.
    pub fn compile(&mut self, root: NodeId, config: &ContractionConfig) -> ContractionResult<()> {
        if self.compiled {
            return Err(ContractionError::AlreadyCompiled);
        }

        // one parent edge per referencing binary node
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if core::mem::replace(&mut visited[id.0], true) {
                continue;
            }
            if let NodeKind::Binary { left, right } = self.nodes[id.0].kind {
                self.nodes[left.0].parents += 1;
                self.nodes[right.0].parents += 1;
                stack.push(left);
                stack.push(right);
            }
        }

        let ScratchState::Planning(arena) = &mut self.state else {
            return Err(ContractionError::AlreadyCompiled);
        };
        compile_node(&mut self.nodes, arena, &self.sizes, config, root)?;

        let threads = config.num_threads.max(rayon::current_num_threads());
        let ScratchState::Planning(arena) =
            core::mem::replace(&mut self.state, ScratchState::Planning(ScratchArena::new()))
        else {
            unreachable!("state checked above");
        };
        self.state = ScratchState::Ready(arena.allocate(threads));

        self.root = Some(root);
        self.compiled = true;
        Ok(())
    }

    /// Releases one parent edge's claim on `node`'s scratch
    /// reservation; the reservation returns to the arena once every
    /// parent has released it. Supports abandoning a partially
    /// compiled tree.
    pub fn cancel_memory_reservation(&mut self, node: NodeId) {
        let n = &mut self.nodes[node.0];
        if let (Some(handle), ScratchState::Planning(arena)) = (n.scratch, &mut self.state) {
            if n.pending_release > 0 {
                n.pending_release -= 1;
                if n.pending_release == 0 {
                    arena.release(handle);
                    n.scratch = None;
                }
            }
        }
    }

    /// Configures intra-op parallelism of one node's loop nest,
    /// targeting `target_tasks` tasks. Does not recurse into children.
    pub fn threading_intra_op(
        &mut self,
        node: NodeId,
        target_tasks: usize,
    ) -> ContractionResult<()> {
        let n = &mut self.nodes[node.0];
        let Some(plan) = n.plan.as_mut() else {
            return Err(ContractionError::NotCompiled);
        };
        let sizes: Vec<usize> = plan.loops.iter().map(|l| l.size).collect();
        let (collapsed, tasks) = plan_parallel(&sizes, plan.parallel_eligible, target_tasks);
        plan.collapsed = collapsed;
        plan.num_tasks = tasks;
        debug!(
            "threading node {}: {} tasks over {} collapsed loops",
            node.0, tasks, collapsed
        );
        Ok(())
    }

    /// Copies caller data into an internally owned, privately
    /// laid-out buffer; the external binding is not read again until
    /// [`unlock_data`](Self::unlock_data).
    pub fn store_and_lock_data(&mut self, node: NodeId, data: TensorRef) -> ContractionResult<()> {
        if !self.compiled {
            return Err(ContractionError::NotCompiled);
        }
        let n = &mut self.nodes[node.0];
        if !n.is_leaf() {
            return Err(ContractionError::NoDataProvided);
        }
        if data.dtype() != n.dtype {
            return Err(ContractionError::DtypeMismatch {
                expected: n.dtype,
                got: data.dtype(),
            });
        }
        if data.len() != n.bind_elems {
            return Err(ContractionError::SizeMismatch {
                expected: n.bind_elems,
                got: data.len(),
            });
        }

        let elem = n.dtype.num_bytes();
        match &n.permute {
            Some(permute) => {
                let buf = n
                    .private
                    .get_or_insert_with(|| vec![0u8; permute.sizes.iter().product::<usize>() * elem]);
                unsafe {
                    (permute.copy)(
                        &permute.sizes,
                        &permute.src_strides,
                        &permute.dst_strides,
                        data.as_ptr(),
                        buf.as_mut_ptr(),
                    );
                }
            }
            None => {
                let bytes = n.bind_elems * elem;
                let buf = n.private.get_or_insert_with(|| vec![0u8; bytes]);
                unsafe {
                    core::ptr::copy_nonoverlapping(data.as_ptr(), buf.as_mut_ptr(), bytes);
                }
            }
        }
        n.locked = true;
        Ok(())
    }

    /// Re-enables reading the external binding of a locked leaf.
    pub fn unlock_data(&mut self, node: NodeId) -> ContractionResult<()> {
        let n = &mut self.nodes[node.0];
        if !n.is_leaf() {
            return Err(ContractionError::NoDataProvided);
        }
        n.locked = false;
        Ok(())
    }

    /// Number of scalar operations one evaluation of `node` performs,
    /// optionally including all nodes below it.
    pub fn num_ops(&self, node: NodeId, include_children: bool) -> u64 {
        let n = &self.nodes[node.0];
        let mut ops = n.num_ops_node;
        if include_children {
            ops += n.num_ops_children;
        }
        ops
    }

    /// Peak scratch bytes the compiled tree works with.
    pub fn scratch_bytes(&self) -> usize {
        match &self.state {
            ScratchState::Planning(arena) => arena.peak_bytes(),
            ScratchState::Ready(memory) => memory.peak_bytes(),
        }
    }

    /// Evaluates the tree: children first, then each node's compiled
    /// loop nest.
    ///
    /// # Panics
    ///
    /// Panics if the tree is not compiled or a binding is missing or
    /// inconsistent; evaluation has no error channel.
    pub fn eval(&mut self, bindings: &mut EvalBindings) {
        assert!(self.compiled, "eval() requires a compiled tree");
        let root = self.root.expect("compiled tree has a root");
        self.epoch += 1;
        let epoch = self.epoch;

        let ScratchState::Ready(memory) = &self.state else {
            unreachable!("compiled tree has allocated scratch");
        };
        eval_node(&mut self.nodes, memory, bindings, epoch, root);
    }
}

/// External-side layout of a leaf: declared order with overridden or
/// dense strides.
fn external_layout(node: &Node, sizes: &DimSizes) -> ContractionResult<OperandLayout> {
    match &node.custom_strides {
        Some(strides) => {
            OperandLayout::with_strides(node.dims_ext.clone(), strides.clone(), sizes)
        }
        None => OperandLayout::dense(node.dims_ext.clone(), sizes),
    }
}

/// Layout a parent plans against: the node's internal ordering, with
/// custom strides surviving only when no permutation intervenes.
fn internal_layout(node: &Node, sizes: &DimSizes) -> ContractionResult<OperandLayout> {
    if node.is_leaf() && node.permute.is_none() && node.custom_strides.is_some() {
        return external_layout(node, sizes);
    }
    OperandLayout::dense(node.dims_int.clone(), sizes)
}

fn compile_node(
    nodes: &mut Vec<Node>,
    arena: &mut ScratchArena,
    sizes: &DimSizes,
    config: &ContractionConfig,
    id: NodeId,
) -> ContractionResult<()> {
    if nodes[id.0].compiled {
        return Ok(());
    }

    let NodeKind::Binary { left, right } = nodes[id.0].kind else {
        return compile_leaf(&mut nodes[id.0], sizes);
    };

    // Scratch-backed children are free to adopt the ordering this
    // contraction prefers; external data keeps its declared layout.
    let out_layout = internal_layout(&nodes[id.0], sizes)?;
    let left_ids: DimVec = nodes[left.0].dims_int.clone();
    let right_ids: DimVec = nodes[right.0].dims_int.clone();
    let (pref_left, pref_right) =
        preferred_child_orderings(&left_ids, &right_ids, &out_layout, sizes)?;
    for (child, pref) in [(left, pref_left), (right, pref_right)] {
        let c = &mut nodes[child.0];
        if !c.compiled && c.relayoutable() {
            c.dims_int = pref;
        }
    }

    arena.enter_layer();
    compile_node(nodes, arena, sizes, config, left)?;
    compile_node(nodes, arena, sizes, config, right)?;
    arena.leave_layer();

    let left_layout = internal_layout(&nodes[left.0], sizes)?;
    let right_layout = internal_layout(&nodes[right.0], sizes)?;
    let aux_layout = if nodes[id.0].has_aux {
        Some(OperandLayout::dense(nodes[id.0].dims_ext.clone(), sizes)?)
    } else {
        None
    };

    let node = &nodes[id.0];
    let plan = plan_loops(
        &left_layout,
        &right_layout,
        &out_layout,
        aux_layout.as_ref(),
        sizes,
        node.dtype,
        node.main,
        node.first_touch,
        node.last_touch,
        config,
    )?;
    let kernels = select_kernels(
        plan.first_touch,
        plan.main,
        plan.last_touch,
        nodes[left.0].dtype,
        nodes[right.0].dtype,
        node.dtype,
    )?;

    arena.reserve_thread_bytes(plan.packing_bytes());

    let out_elems: usize = out_layout.span(sizes)?;
    let k_total: u64 = plan
        .loops
        .iter()
        .filter(|l| l.role == DimRole::K)
        .map(|l| l.size as u64)
        .product::<u64>()
        * plan.kernel.k as u64;

    let node = &mut nodes[id.0];
    node.num_ops_node = 2 * out_elems as u64 * k_total;
    node.bind_elems = out_elems;
    node.plan = Some(plan);
    node.kernels = Some(kernels);

    if !node.external {
        let bytes = out_elems * node.dtype.num_bytes();
        node.scratch = Some(arena.reserve(bytes));
        node.pending_release = node.parents.max(1);
    }

    for child in [left, right] {
        let c = &mut nodes[child.0];
        if let Some(handle) = c.scratch {
            if c.pending_release > 0 {
                c.pending_release -= 1;
                if c.pending_release == 0 {
                    arena.release(handle);
                }
            }
        }
        let child_ops = c.num_ops_node + c.num_ops_children;
        nodes[id.0].num_ops_children += child_ops;
    }

    nodes[id.0].compiled = true;
    Ok(())
}

fn compile_leaf(node: &mut Node, sizes: &DimSizes) -> ContractionResult<()> {
    let external = external_layout(node, sizes)?;
    node.bind_elems = external.span(sizes)?;

    // A parent-imposed ordering makes the leaf privately laid out: the
    // external data is permuted in before each evaluation (or once,
    // when locked).
    if node.dims_int != node.dims_ext {
        let internal = OperandLayout::dense(node.dims_int.clone(), sizes)?;
        let mut dim_sizes = Vec::with_capacity(internal.ids.len());
        let mut src_strides = Vec::with_capacity(internal.ids.len());
        for &dim in internal.ids.iter() {
            dim_sizes.push(sizes[&dim]);
            src_strides.push(external.stride_of(dim).expect("permutation of leaf dims"));
        }
        let elems: usize = dim_sizes.iter().product();
        node.private = Some(vec![0u8; elems * node.dtype.num_bytes()]);
        node.permute = Some(PermutePlan {
            sizes: dim_sizes,
            src_strides,
            dst_strides: internal.strides.iter().copied().collect(),
            copy: copy_kernel(node.dtype),
        });
        debug!(
            "leaf adopts parent ordering {:?} (declared {:?})",
            node.dims_int, node.dims_ext
        );
    }

    node.compiled = true;
    Ok(())
}

fn eval_node(
    nodes: &mut [Node],
    memory: &ScratchMemory,
    bindings: &mut EvalBindings,
    epoch: u64,
    id: NodeId,
) {
    if nodes[id.0].last_eval_epoch == epoch {
        return;
    }
    nodes[id.0].last_eval_epoch = epoch;

    match nodes[id.0].kind {
        NodeKind::Leaf => {
            let node = &mut nodes[id.0];
            if node.locked {
                node.eval_ptr = node.private.as_ref().expect("locked leaf has data").as_ptr();
                return;
            }
            let data = bindings
                .inputs
                .get(&id.0)
                .unwrap_or_else(|| panic!("no data bound for leaf node {}", id.0));
            assert_eq!(data.dtype(), node.dtype, "leaf {} dtype mismatch", id.0);
            assert_eq!(
                data.len(),
                node.bind_elems,
                "leaf {} binding has the wrong extent",
                id.0
            );
            match &node.permute {
                Some(permute) => {
                    let buf = node.private.as_mut().expect("permuted leaf has a buffer");
                    unsafe {
                        (permute.copy)(
                            &permute.sizes,
                            &permute.src_strides,
                            &permute.dst_strides,
                            data.as_ptr(),
                            buf.as_mut_ptr(),
                        );
                    }
                    node.eval_ptr = buf.as_ptr();
                }
                None => node.eval_ptr = data.as_ptr(),
            }
        }
        NodeKind::Binary { left, right } => {
            eval_node(nodes, memory, bindings, epoch, left);
            eval_node(nodes, memory, bindings, epoch, right);

            let node = &nodes[id.0];
            let out_ptr = if node.external {
                let out = bindings
                    .outputs
                    .get_mut(&id.0)
                    .unwrap_or_else(|| panic!("no output bound for node {}", id.0));
                assert_eq!(out.dtype(), node.dtype, "output {} dtype mismatch", id.0);
                assert_eq!(
                    out.len(),
                    node.bind_elems,
                    "output {} binding has the wrong extent",
                    id.0
                );
                out.as_mut_ptr()
            } else {
                memory.ptr(node.scratch.expect("internal node has scratch"))
            };

            let aux_ptr = if node.has_aux {
                let aux = bindings
                    .aux
                    .get(&id.0)
                    .unwrap_or_else(|| panic!("no auxiliary operand bound for node {}", id.0));
                assert_eq!(aux.dtype(), node.dtype, "aux {} dtype mismatch", id.0);
                assert_eq!(
                    aux.len(),
                    node.bind_elems,
                    "aux {} binding has the wrong extent",
                    id.0
                );
                aux.as_ptr()
            } else {
                core::ptr::null()
            };

            let node = &nodes[id.0];
            contract(
                node.plan.as_ref().expect("compiled node has a plan"),
                node.kernels.as_ref().expect("compiled node has kernels"),
                memory,
                Operands {
                    left: nodes[left.0].eval_ptr,
                    right: nodes[right.0].eval_ptr,
                    aux: aux_ptr,
                    out: out_ptr,
                },
            );
            nodes[id.0].eval_ptr = out_ptr;
        }
    }
}
