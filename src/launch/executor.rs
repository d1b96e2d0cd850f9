//! Execution of one compiled contraction: explicit loops wrapping the
//! primitive call, with first/last-touch gating and per-iteration
//! operand packing.

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::kernels::KernelSet;
use crate::memory::ScratchMemory;
use crate::planner::LoopPlan;
use crate::types::DimRole;

/// Raw operand pointers of one contraction.
#[derive(Clone, Copy)]
pub(crate) struct Operands {
    pub left: *const u8,
    pub right: *const u8,
    /// Null when the contraction has no auxiliary operand.
    pub aux: *const u8,
    pub out: *mut u8,
}

// Tasks write disjoint output regions: the collapsed loops are
// non-contracted, so no two tasks address the same output element.
unsafe impl Send for Operands {}
unsafe impl Sync for Operands {}

/// One explicit loop with byte strides.
#[derive(Clone, Copy)]
struct ByteLoop {
    size: usize,
    is_k: bool,
    left: isize,
    right: isize,
    aux: isize,
    out: isize,
}

struct ExecContext<'a> {
    loops: SmallVec<[ByteLoop; 8]>,
    plan: &'a LoopPlan,
    kernels: &'a KernelSet,
    memory: &'a ScratchMemory,
}

/// Runs a compiled contraction over the given operands.
pub(crate) fn contract(
    plan: &LoopPlan,
    kernels: &KernelSet,
    memory: &ScratchMemory,
    ops: Operands,
) {
    let elem = plan.kernel.dtype.num_bytes() as isize;
    let loops: SmallVec<[ByteLoop; 8]> = plan
        .loops
        .iter()
        .map(|l| ByteLoop {
            size: l.size,
            is_k: l.role == DimRole::K,
            left: l.stride_left * elem,
            right: l.stride_right * elem,
            aux: l.stride_out_aux * elem,
            out: l.stride_out * elem,
        })
        .collect();

    let ctx = ExecContext {
        loops,
        plan,
        kernels,
        memory,
    };

    if plan.num_tasks > 1 && plan.collapsed > 0 {
        (0..plan.num_tasks).into_par_iter().for_each(|task| {
            let task_ops = offset_for_task(&ctx, task, ops);
            unsafe {
                if ctx.plan.collapsed == ctx.loops.len() {
                    kernel_site(&ctx, task_ops, true, true);
                } else {
                    contract_iter(&ctx, ctx.plan.collapsed, task_ops, true, true);
                }
            }
        });
    } else {
        unsafe {
            contract_iter(&ctx, 0, ops, true, true);
        }
    }
}

/// Decodes a task id into indices of the collapsed leading loops and
/// offsets the operand pointers accordingly.
fn offset_for_task(ctx: &ExecContext, task: usize, ops: Operands) -> Operands {
    let mut rem = task;
    let mut offsets = [0isize; 4];
    for li in (0..ctx.plan.collapsed).rev() {
        let l = &ctx.loops[li];
        let it = (rem % l.size) as isize;
        rem /= l.size;
        offsets[0] += it * l.left;
        offsets[1] += it * l.right;
        offsets[2] += it * l.aux;
        offsets[3] += it * l.out;
    }
    unsafe {
        Operands {
            left: ops.left.offset(offsets[0]),
            right: ops.right.offset(offsets[1]),
            aux: if ops.aux.is_null() {
                ops.aux
            } else {
                ops.aux.offset(offsets[2])
            },
            out: ops.out.offset(offsets[3]),
        }
    }
}

/// Explicit-loop recursion. First/last-access flags are narrowed at
/// contracted loops so the touch kernels run exactly once per output
/// region.
unsafe fn contract_iter(
    ctx: &ExecContext,
    loop_idx: usize,
    ops: Operands,
    first_access: bool,
    last_access: bool,
) {
    let l = ctx.loops[loop_idx];
    for it in 0..l.size {
        let (first, last) = if l.is_k {
            (
                first_access && it == 0,
                last_access && it == l.size - 1,
            )
        } else {
            (first_access, last_access)
        };

        let it = it as isize;
        let iter_ops = unsafe {
            Operands {
                left: ops.left.offset(it * l.left),
                right: ops.right.offset(it * l.right),
                aux: if ops.aux.is_null() {
                    ops.aux
                } else {
                    ops.aux.offset(it * l.aux)
                },
                out: ops.out.offset(it * l.out),
            }
        };

        unsafe {
            if loop_idx + 1 < ctx.loops.len() {
                contract_iter(ctx, loop_idx + 1, iter_ops, first, last);
            } else {
                kernel_site(ctx, iter_ops, first, last);
            }
        }
    }
}

/// Innermost position: pack operands if required, then run the touch
/// and main kernels on the addressed block.
unsafe fn kernel_site(ctx: &ExecContext, ops: Operands, first_access: bool, last_access: bool) {
    let shape = &ctx.plan.kernel;
    let mut left = ops.left;
    let mut right = ops.right;

    if ctx.plan.pack_left.is_some() || ctx.plan.pack_right.is_some() {
        let thread = rayon::current_thread_index().unwrap_or(0);
        let scratch = ctx.memory.thread_ptr(thread);
        unsafe {
            if let Some(pack) = &ctx.plan.pack_left {
                let dst = scratch.add(pack.offset_bytes);
                (ctx.kernels.pack)(pack, left, dst);
                left = dst;
            }
            if let Some(pack) = &ctx.plan.pack_right {
                let dst = scratch.add(pack.offset_bytes);
                (ctx.kernels.pack)(pack, right, dst);
                right = dst;
            }
        }
    }

    let (a, b) = if ctx.plan.swapped {
        (right, left)
    } else {
        (left, right)
    };

    unsafe {
        if first_access && ctx.kernels.has_first_touch {
            (ctx.kernels.first_touch)(shape, ops.aux, ops.out);
        }
        (ctx.kernels.main)(shape, a, b, ops.out);
        if last_access && ctx.kernels.has_last_touch {
            (ctx.kernels.last_touch)(shape, ops.aux, ops.out);
        }
    }
}
