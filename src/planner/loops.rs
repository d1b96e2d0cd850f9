//! Loop planning: ordering, primitive absorption and kernel shapes.
//!
//! A binary contraction is executed as a nest of explicit loops around
//! one primitive call. The planner decides which dimensions the
//! primitive absorbs (the trailing contiguous ones), derives the
//! leading-dimension/transpose configuration of the matrix primitive,
//! and falls back to per-iteration operand packing when an operand's
//! stride pattern cannot feed the primitive directly.

use log::debug;
use smallvec::SmallVec;

use super::roles::{DimRoles, classify};
use crate::error::{ContractionError, ContractionResult};
use crate::launch::ContractionConfig;
use crate::types::{DataType, DimId, DimRole, DimSizes, DimVec, MainKernel, TouchKernel};

/// Physical layout of one operand: ordered dimension ids (outermost
/// first) and per-dimension element strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandLayout {
    pub ids: DimVec,
    pub strides: SmallVec<[isize; 8]>,
}

impl OperandLayout {
    /// Dense layout: natural row-major strides over the size mapping.
    pub fn dense(ids: DimVec, sizes: &DimSizes) -> ContractionResult<Self> {
        let mut strides: SmallVec<[isize; 8]> = SmallVec::from_elem(0, ids.len());
        let mut stride = 1isize;
        for di in (0..ids.len()).rev() {
            let dim = ids[di];
            let size = *sizes
                .get(&dim)
                .ok_or(ContractionError::MissingDimSize { dim })?;
            strides[di] = stride;
            stride *= size as isize;
        }
        Ok(Self { ids, strides })
    }

    /// Layout with caller-supplied strides (sliced or padded data).
    ///
    /// Strides must dominate the dense extent of the dimensions inside
    /// them; overlapping layouts are rejected.
    pub fn with_strides(
        ids: DimVec,
        strides: SmallVec<[isize; 8]>,
        sizes: &DimSizes,
    ) -> ContractionResult<Self> {
        assert_eq!(ids.len(), strides.len(), "one stride per dimension");
        let layout = Self { ids, strides };

        let mut order: Vec<usize> = (0..layout.ids.len()).collect();
        order.sort_by_key(|&i| layout.strides[i].unsigned_abs());
        let mut required = 1isize;
        for &i in &order {
            let dim = layout.ids[i];
            let size = *sizes
                .get(&dim)
                .ok_or(ContractionError::MissingDimSize { dim })?;
            let stride = layout.strides[i];
            if size > 1 && stride.abs() < required {
                return Err(ContractionError::StrideUndercut {
                    dim,
                    stride,
                    required,
                });
            }
            if size > 1 {
                required = stride.abs() * size as isize;
            }
        }
        Ok(layout)
    }

    /// Element stride of `dim`, if the operand has it.
    pub fn stride_of(&self, dim: DimId) -> Option<isize> {
        self.ids
            .iter()
            .position(|&d| d == dim)
            .map(|i| self.strides[i])
    }

    /// Number of elements spanned by the layout (1 past the largest
    /// reachable offset).
    pub fn span(&self, sizes: &DimSizes) -> ContractionResult<usize> {
        let mut last = 0isize;
        for (i, &dim) in self.ids.iter().enumerate() {
            let size = *sizes
                .get(&dim)
                .ok_or(ContractionError::MissingDimSize { dim })?;
            last += self.strides[i].abs() * (size as isize - 1);
        }
        Ok(last as usize + 1)
    }
}

/// Shape handed to the matrix primitive.
///
/// Strides are in elements; the complex plane offsets separate the
/// real and imaginary parts of interleaved complex operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelShape {
    pub dtype: DataType,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    /// Replicated innermost sub-block of the packed variants; 1 for
    /// plain kernels.
    pub r: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub trans_a: bool,
    pub trans_b: bool,
    pub stride_m_aux: usize,
    pub stride_n_aux: usize,
    pub cpx_left: isize,
    pub cpx_right: isize,
    pub cpx_out: isize,
    pub cpx_aux: isize,
}

impl KernelShape {
    fn new(dtype: DataType) -> Self {
        Self {
            dtype,
            m: 1,
            n: 1,
            k: 1,
            r: 1,
            lda: 1,
            ldb: 1,
            ldc: 1,
            trans_a: false,
            trans_b: false,
            stride_m_aux: 0,
            stride_n_aux: 0,
            cpx_left: 0,
            cpx_right: 0,
            cpx_out: 0,
            cpx_aux: 0,
        }
    }
}

/// One explicit loop wrapping the primitive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSpec {
    pub role: DimRole,
    pub size: usize,
    pub stride_left: isize,
    pub stride_right: isize,
    pub stride_out: isize,
    pub stride_out_aux: isize,
}

/// Per-iteration repacking of one operand into thread scratch.
///
/// Loops are ordered outermost first; each entry is
/// (size, source stride, destination stride) in elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackPlan {
    pub loops: SmallVec<[(usize, isize, isize); 4]>,
    /// Byte offset of this operand's slice inside the thread scratch.
    pub offset_bytes: usize,
    /// Bytes the packed block occupies.
    pub bytes: usize,
}

/// Compiled loop nest of one binary contraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPlan {
    /// Explicit loops, outermost first; never empty.
    pub loops: Vec<LoopSpec>,
    /// Leading loops eligible for parallel execution (prefix of
    /// non-contracted loops).
    pub parallel_eligible: usize,
    /// Leading loops collapsed into the parallel iteration space.
    pub collapsed: usize,
    /// Number of parallel tasks; 1 means sequential execution.
    pub num_tasks: usize,
    pub kernel: KernelShape,
    /// Main kernel after packed promotion.
    pub main: MainKernel,
    pub first_touch: TouchKernel,
    pub last_touch: TouchKernel,
    pub pack_left: Option<PackPlan>,
    pub pack_right: Option<PackPlan>,
    /// Left and right operands exchanged to satisfy the primitive's
    /// output ordering.
    pub swapped: bool,
}

impl LoopPlan {
    /// Total bytes of per-thread packing scratch this plan needs.
    pub fn packing_bytes(&self) -> usize {
        let left = self.pack_left.as_ref().map_or(0, |p| p.bytes);
        let right = self.pack_right.as_ref().map_or(0, |p| p.bytes);
        left.next_multiple_of(64) + right.next_multiple_of(64)
    }

    /// Number of primitive invocations one evaluation performs.
    pub fn num_primitive_calls(&self) -> usize {
        self.loops.iter().map(|l| l.size).product()
    }
}

/// Sorts a role group by descending size, ties by ascending id.
fn sort_group(dims: &mut DimVec, sizes: &DimSizes) {
    dims.sort_by(|&a, &b| {
        let sa = sizes.get(&a).copied().unwrap_or(1);
        let sb = sizes.get(&b).copied().unwrap_or(1);
        sb.cmp(&sa).then(a.cmp(&b))
    });
}

fn size_of(dim: DimId, sizes: &DimSizes) -> ContractionResult<usize> {
    sizes
        .get(&dim)
        .copied()
        .ok_or(ContractionError::MissingDimSize { dim })
}

/// True if the output's innermost dimension belongs to the right
/// operand only, in which case left and right must swap to give the
/// primitive an M-major output.
fn needs_swap(roles: &DimRoles, out: &OperandLayout) -> bool {
    let innermost = (0..out.ids.len()).min_by_key(|&i| out.strides[i].unsigned_abs());
    match innermost {
        Some(i) => roles.out_roles[i] == DimRole::N,
        None => false,
    }
}

/// Plans the loop nest of one binary contraction.
///
/// `left`/`right`/`out` describe the operands as laid out in memory;
/// `aux` optionally describes the auxiliary operand read by the
/// Copy/Add touch kernels (same dimension set as the output).
#[allow(clippy::too_many_arguments)]
pub fn plan_loops(
    left: &OperandLayout,
    right: &OperandLayout,
    out: &OperandLayout,
    aux: Option<&OperandLayout>,
    sizes: &DimSizes,
    dtype: DataType,
    main: MainKernel,
    first_touch: TouchKernel,
    last_touch: TouchKernel,
    config: &ContractionConfig,
) -> ContractionResult<LoopPlan> {
    let roles = classify(&left.ids, &right.ids, &out.ids)?;

    if needs_swap(&roles, out) {
        let mut plan = plan_ordered(
            right,
            left,
            out,
            aux,
            sizes,
            dtype,
            main,
            first_touch,
            last_touch,
            config,
        )?;
        plan.swapped = true;
        let (pl, pr) = (plan.pack_left.take(), plan.pack_right.take());
        plan.pack_left = pr;
        plan.pack_right = pl;
        for l in &mut plan.loops {
            core::mem::swap(&mut l.stride_left, &mut l.stride_right);
        }
        return Ok(plan);
    }

    plan_ordered(
        left,
        right,
        out,
        aux,
        sizes,
        dtype,
        main,
        first_touch,
        last_touch,
        config,
    )
}

/// Plans with the operand order already fixed (left carries the M
/// dimensions). Loop strides in the result refer to (left, right) as
/// passed here.
#[allow(clippy::too_many_arguments)]
fn plan_ordered(
    left: &OperandLayout,
    right: &OperandLayout,
    out: &OperandLayout,
    aux: Option<&OperandLayout>,
    sizes: &DimSizes,
    dtype: DataType,
    main: MainKernel,
    first_touch: TouchKernel,
    last_touch: TouchKernel,
    config: &ContractionConfig,
) -> ContractionResult<LoopPlan> {
    let roles = classify(&left.ids, &right.ids, &out.ids)?;
    let mut shape = KernelShape::new(dtype);

    let is_cpx =
        main.is_complex() || first_touch.is_complex() || last_touch.is_complex();

    // The complex dimension separates real and imaginary planes: the
    // outermost batch dimension, of size 2, consumed by the kernel.
    let mut c_dims = roles.c.clone();
    if is_cpx {
        let Some(&cpx_dim) = c_dims.first() else {
            return Err(ContractionError::InvalidComplexDim);
        };
        if size_of(cpx_dim, sizes)? != 2 {
            return Err(ContractionError::InvalidComplexDim);
        }
        shape.cpx_left = left.stride_of(cpx_dim).unwrap_or(0);
        shape.cpx_right = right.stride_of(cpx_dim).unwrap_or(0);
        shape.cpx_out = out.stride_of(cpx_dim).unwrap_or(0);
        shape.cpx_aux = aux.and_then(|a| a.stride_of(cpx_dim)).unwrap_or(0);
        c_dims.remove(0);
    }

    // A unit-stride batch dimension shared by all three tensors is the
    // replicated r sub-block of the packed kernel variants.
    let r_dim = c_dims.iter().copied().find(|&d| {
        left.stride_of(d) == Some(1)
            && right.stride_of(d) == Some(1)
            && out.stride_of(d) == Some(1)
            && sizes.get(&d).copied().unwrap_or(1) > 1
    });
    let main = match r_dim {
        Some(d) => {
            shape.r = size_of(d, sizes)?;
            c_dims.retain(|&mut c| c != d);
            main.packed()
        }
        None if main.is_packed() => {
            return Err(ContractionError::InvalidKernel {
                kernel: main.name(),
                position: "main (no unit-stride batch dimension to pack)",
            });
        }
        None => main,
    };
    let r = shape.r as isize;

    // Kernel dimension selection: the output-innermost M and N
    // dimensions and the largest K dimension.
    let m_kernel = roles
        .m
        .iter()
        .copied()
        .min_by_key(|&d| (out.stride_of(d).unwrap_or(0).unsigned_abs(), d));
    let n_kernel = roles
        .n
        .iter()
        .copied()
        .min_by_key(|&d| (out.stride_of(d).unwrap_or(0).unsigned_abs(), d));
    let k_kernel = roles
        .k
        .iter()
        .copied()
        .max_by_key(|&d| (sizes.get(&d).copied().unwrap_or(1), core::cmp::Reverse(d)));

    if let Some(d) = m_kernel {
        shape.m = size_of(d, sizes)?;
    }
    if let Some(d) = n_kernel {
        shape.n = size_of(d, sizes)?;
    }
    if let Some(d) = k_kernel {
        shape.k = size_of(d, sizes)?;
    }

    // Absorb further same-role dimensions while their strides continue
    // the absorbed block in every operand that carries the role.
    let mut m_rest: DimVec = roles.m.iter().copied().filter(|&d| Some(d) != m_kernel).collect();
    let mut n_rest: DimVec = roles.n.iter().copied().filter(|&d| Some(d) != n_kernel).collect();
    let mut k_rest: DimVec = roles.k.iter().copied().filter(|&d| Some(d) != k_kernel).collect();

    if let Some(mk) = m_kernel {
        shape.m = absorb(
            shape.m,
            config.target_m,
            &mut m_rest,
            sizes,
            &[(left, left.stride_of(mk)), (out, out.stride_of(mk))],
        )?;
    }
    if let Some(nk) = n_kernel {
        shape.n = absorb(
            shape.n,
            config.target_n,
            &mut n_rest,
            sizes,
            &[(right, right.stride_of(nk)), (out, out.stride_of(nk))],
        )?;
    }
    if let Some(kk) = k_kernel {
        shape.k = absorb(
            shape.k,
            config.target_k,
            &mut k_rest,
            sizes,
            &[(left, left.stride_of(kk)), (right, right.stride_of(kk))],
        )?;
    }

    // Kernel operand strides; a missing kernel dimension behaves like
    // size 1 with stride 0.
    let sl_m = m_kernel.and_then(|d| left.stride_of(d)).unwrap_or(0);
    let sl_k = k_kernel.and_then(|d| left.stride_of(d)).unwrap_or(0);
    let sr_n = n_kernel.and_then(|d| right.stride_of(d)).unwrap_or(0);
    let sr_k = k_kernel.and_then(|d| right.stride_of(d)).unwrap_or(0);
    let so_m = m_kernel.and_then(|d| out.stride_of(d)).unwrap_or(0);
    let so_n = n_kernel.and_then(|d| out.stride_of(d)).unwrap_or(0);
    let sa_m = m_kernel.and_then(|d| aux?.stride_of(d)).unwrap_or(0);
    let sa_n = n_kernel.and_then(|d| aux?.stride_of(d)).unwrap_or(0);

    // Leading dimension of the left operand, or a packing plan when
    // its layout cannot feed the primitive.
    let mut pack_left = None;
    if shape.m == 1 || sl_m == r || sl_m == 1 {
        shape.trans_a = false;
        shape.lda = sl_k.max(0) as usize;
        if sl_k < 0 {
            pack_left = Some(());
        }
    } else if shape.k == 1 || sl_k == 1 {
        shape.trans_a = true;
        shape.lda = sl_m.max(0) as usize;
        if sl_m < 0 {
            pack_left = Some(());
        }
    } else {
        pack_left = Some(());
    }
    let pack_left = pack_left
        .map(|()| {
            shape.trans_a = false;
            shape.lda = shape.m * shape.r;
            pack_block(
                &[
                    (shape.k, sl_k, (shape.m * shape.r) as isize),
                    (shape.m, sl_m, r),
                    (shape.r, 1, 1),
                ],
                0,
                dtype,
            )
        })
        .map(|plan| {
            debug!("packing left operand: {} bytes per iteration", plan.bytes);
            plan
        });

    // Leading dimension of the right operand, with the same fallback.
    let mut pack_right = None;
    if shape.k == 1 || sr_k == r || sr_k == 1 {
        shape.trans_b = false;
        shape.ldb = sr_n.max(0) as usize;
        if sr_n < 0 {
            pack_right = Some(());
        }
    } else if shape.n == 1 || sr_n == 1 {
        shape.trans_b = true;
        shape.ldb = sr_k.max(0) as usize;
        if sr_k < 0 {
            pack_right = Some(());
        }
    } else {
        pack_right = Some(());
    }
    let pack_right = pack_right
        .map(|()| {
            shape.trans_b = false;
            shape.ldb = shape.k * shape.r;
            pack_block(
                &[
                    (shape.n, sr_n, (shape.k * shape.r) as isize),
                    (shape.k, sr_k, r),
                    (shape.r, 1, 1),
                ],
                pack_left.as_ref().map_or(0, |p| p.bytes.next_multiple_of(64)),
                dtype,
            )
        })
        .map(|plan| {
            debug!("packing right operand: {} bytes per iteration", plan.bytes);
            plan
        });

    // The output cannot be packed: its stride pattern must match.
    if !(shape.m == 1 || so_m == r) || so_n < 0 {
        return Err(ContractionError::IncompatibleStrides { operand: "output" });
    }
    shape.ldc = so_n as usize;

    if !(shape.m == 1 || sa_m <= r) || sa_m < 0 || sa_n < 0 {
        return Err(ContractionError::IncompatibleStrides {
            operand: "auxiliary output",
        });
    }
    shape.stride_m_aux = sa_m as usize;
    shape.stride_n_aux = sa_n as usize;

    // Size-1 kernel dimensions leave their leading dimension
    // unconstrained; fix them up for the primitive.
    if shape.k == 1 && !shape.trans_a {
        shape.lda = shape.m * shape.r;
    }
    if shape.m == 1 && shape.trans_a {
        shape.lda = shape.k * shape.r;
    }
    if shape.n == 1 && !shape.trans_b {
        shape.ldb = shape.k * shape.r;
    }
    if shape.k == 1 && shape.trans_b {
        shape.ldb = shape.n * shape.r;
    }
    if shape.n == 1 {
        shape.ldc = shape.m * shape.r;
        shape.stride_n_aux = shape.m * shape.r;
    }
    if shape.m == 1 {
        shape.stride_m_aux = shape.r;
    }

    // Remaining dimensions become explicit loops: batch, then M, N and
    // contracted groups, each ordered by descending size (ties by id).
    sort_group(&mut c_dims, sizes);
    sort_group(&mut m_rest, sizes);
    sort_group(&mut n_rest, sizes);
    sort_group(&mut k_rest, sizes);

    let mut loops = Vec::new();
    let groups: [(&DimVec, DimRole); 4] = [
        (&c_dims, DimRole::C),
        (&m_rest, DimRole::M),
        (&n_rest, DimRole::N),
        (&k_rest, DimRole::K),
    ];
    for (dims, role) in groups {
        for &dim in dims.iter() {
            loops.push(LoopSpec {
                role,
                size: size_of(dim, sizes)?,
                stride_left: left.stride_of(dim).unwrap_or(0),
                stride_right: right.stride_of(dim).unwrap_or(0),
                stride_out: out.stride_of(dim).unwrap_or(0),
                stride_out_aux: aux.and_then(|a| a.stride_of(dim)).unwrap_or(0),
            });
        }
    }

    // The first/last-touch machinery hangs off the loop nest, so keep
    // at least one explicit loop.
    if loops.is_empty() {
        loops.push(LoopSpec {
            role: DimRole::C,
            size: 1,
            stride_left: 0,
            stride_right: 0,
            stride_out: 0,
            stride_out_aux: 0,
        });
    }

    let parallel_eligible = loops
        .iter()
        .take_while(|l| l.role != DimRole::K)
        .count();

    debug!(
        "planned contraction: {} explicit loops, kernel m={} n={} k={} r={} lda={} ldb={} ldc={} trans=({},{})",
        loops.len(),
        shape.m,
        shape.n,
        shape.k,
        shape.r,
        shape.lda,
        shape.ldb,
        shape.ldc,
        shape.trans_a,
        shape.trans_b,
    );

    Ok(LoopPlan {
        loops,
        parallel_eligible,
        collapsed: 0,
        num_tasks: 1,
        kernel: shape,
        main,
        first_touch,
        last_touch,
        pack_left,
        pack_right,
        swapped: false,
    })
}

/// Grows `extent` by absorbing dimensions from `rest` whose stride in
/// every constraining operand equals the base stride times the extent
/// absorbed so far. Stops at `target`.
fn absorb(
    mut extent: usize,
    target: usize,
    rest: &mut DimVec,
    sizes: &DimSizes,
    constraints: &[(&OperandLayout, Option<isize>)],
) -> ContractionResult<usize> {
    loop {
        if extent >= target {
            return Ok(extent);
        }
        let candidate = rest.iter().copied().find(|&d| {
            constraints.iter().all(|&(layout, base)| match base {
                Some(base) => layout.stride_of(d) == Some(base * extent as isize),
                None => false,
            })
        });
        match candidate {
            Some(d) => {
                extent *= size_of(d, sizes)?;
                rest.retain(|&mut x| x != d);
            }
            None => return Ok(extent),
        }
    }
}

/// Builds the packing plan for one operand block.
fn pack_block(loops: &[(usize, isize, isize); 3], offset_bytes: usize, dtype: DataType) -> PackPlan {
    let elems: usize = loops.iter().map(|&(size, _, _)| size).product();
    PackPlan {
        loops: loops.iter().copied().collect(),
        offset_bytes,
        bytes: elems * dtype.num_bytes(),
    }
}

/// Operand orderings a contraction would like its children to have.
///
/// Scratch-backed children are free to adopt any layout; the preferred
/// one puts the kernel dimensions innermost so the primitive absorbs
/// them without packing: `[C.., M.., K.., k, m, (r)]` for the left
/// operand and `[C.., N.., K.., n, k, (r)]` for the right.
pub fn preferred_child_orderings(
    left_ids: &[DimId],
    right_ids: &[DimId],
    out: &OperandLayout,
    sizes: &DimSizes,
) -> ContractionResult<(DimVec, DimVec)> {
    let roles = classify(left_ids, right_ids, &out.ids)?;
    if needs_swap(&roles, out) {
        let (r_pref, l_pref) = ordered_prefs(&classify(right_ids, left_ids, &out.ids)?, out, sizes)?;
        return Ok((l_pref, r_pref));
    }
    ordered_prefs(&roles, out, sizes)
}

fn ordered_prefs(
    roles: &DimRoles,
    out: &OperandLayout,
    sizes: &DimSizes,
) -> ContractionResult<(DimVec, DimVec)> {
    let r_dim = roles
        .c
        .iter()
        .copied()
        .find(|&d| out.stride_of(d) == Some(1) && sizes.get(&d).copied().unwrap_or(1) > 1);
    let m_kernel = roles
        .m
        .iter()
        .copied()
        .min_by_key(|&d| (out.stride_of(d).unwrap_or(0).unsigned_abs(), d));
    let n_kernel = roles
        .n
        .iter()
        .copied()
        .min_by_key(|&d| (out.stride_of(d).unwrap_or(0).unsigned_abs(), d));
    let k_kernel = roles
        .k
        .iter()
        .copied()
        .max_by_key(|&d| (sizes.get(&d).copied().unwrap_or(1), core::cmp::Reverse(d)));

    let mut c_sorted: DimVec = roles.c.iter().copied().filter(|&d| Some(d) != r_dim).collect();
    let mut m_sorted: DimVec = roles.m.iter().copied().filter(|&d| Some(d) != m_kernel).collect();
    let mut n_sorted: DimVec = roles.n.iter().copied().filter(|&d| Some(d) != n_kernel).collect();
    let mut k_sorted: DimVec = roles.k.iter().copied().filter(|&d| Some(d) != k_kernel).collect();
    sort_group(&mut c_sorted, sizes);
    sort_group(&mut m_sorted, sizes);
    sort_group(&mut n_sorted, sizes);
    sort_group(&mut k_sorted, sizes);

    let mut left: DimVec = DimVec::new();
    left.extend(c_sorted.iter().copied());
    left.extend(m_sorted.iter().copied());
    left.extend(k_sorted.iter().copied());
    left.extend(k_kernel);
    left.extend(m_kernel);
    left.extend(r_dim);

    let mut right: DimVec = DimVec::new();
    right.extend(c_sorted.iter().copied());
    right.extend(n_sorted.iter().copied());
    right.extend(k_sorted.iter().copied());
    right.extend(n_kernel);
    right.extend(k_kernel);
    right.extend(r_dim);

    Ok((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn sizes(pairs: &[(DimId, usize)]) -> DimSizes {
        pairs.iter().copied().collect()
    }

    fn dense(ids: &[DimId], sizes: &DimSizes) -> OperandLayout {
        OperandLayout::dense(ids.iter().copied().collect(), sizes).unwrap()
    }

    // km,nk->nm with m=2, n=3, k=4
    #[test]
    fn test_matmul_fully_absorbed() {
        let sizes = sizes(&[(b'm' as i64, 2), (b'n' as i64, 3), (b'k' as i64, 4)]);
        let (m, n, k) = (b'm' as i64, b'n' as i64, b'k' as i64);
        let left = dense(&[k, m], &sizes);
        let right = dense(&[n, k], &sizes);
        let out = dense(&[n, m], &sizes);

        let plan = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F32,
            MainKernel::Madd,
            TouchKernel::Zero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap();

        assert_eq!(plan.kernel.m, 2);
        assert_eq!(plan.kernel.n, 3);
        assert_eq!(plan.kernel.k, 4);
        assert_eq!(plan.kernel.lda, 2);
        assert_eq!(plan.kernel.ldb, 4);
        assert_eq!(plan.kernel.ldc, 2);
        assert!(!plan.kernel.trans_a);
        assert!(!plan.kernel.trans_b);
        assert!(!plan.swapped);
        // only the dummy loop remains
        assert_eq!(plan.loops.len(), 1);
        assert_eq!(plan.loops[0].size, 1);
        assert_eq!(plan.num_primitive_calls(), 1);
    }

    // mk,nk->mn: the output is N-major, so the operands swap.
    #[test]
    fn test_operand_swap() {
        let sizes = sizes(&[(1, 8), (2, 5), (3, 6)]);
        let left = dense(&[1, 3], &sizes); // m k
        let right = dense(&[2, 3], &sizes); // n k
        let out = dense(&[1, 2], &sizes); // m n

        let plan = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F32,
            MainKernel::Madd,
            TouchKernel::Zero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap();

        assert!(plan.swapped);
        // after the swap the kernel M extent is the old N dimension
        assert_eq!(plan.kernel.m, 5);
        assert_eq!(plan.kernel.n, 8);
        assert_eq!(plan.kernel.k, 6);
        assert!(plan.kernel.trans_a);
    }

    // Batched contraction: the batch dimension stays an explicit loop.
    #[test]
    fn test_batch_loop_remains_explicit() {
        let sizes = sizes(&[(0, 7), (1, 4), (2, 5), (3, 6)]);
        let left = dense(&[0, 3, 1], &sizes); // c k m
        let right = dense(&[0, 2, 3], &sizes); // c n k
        let out = dense(&[0, 2, 1], &sizes); // c n m

        let plan = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F64,
            MainKernel::Madd,
            TouchKernel::Zero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap();

        assert_eq!(plan.loops.len(), 1);
        assert_eq!(plan.loops[0].role, DimRole::C);
        assert_eq!(plan.loops[0].size, 7);
        assert_eq!(plan.parallel_eligible, 1);
        assert_eq!(plan.num_primitive_calls(), 7);
    }

    // Two M dimensions contiguous in both left and out fuse into the
    // kernel M extent.
    #[test]
    fn test_absorption_of_contiguous_dims() {
        let sizes = sizes(&[(1, 4), (2, 8), (3, 5), (4, 6)]);
        // left: k m1 m0, out: n m1 m0 (m0 innermost, m1 contiguous above)
        let left = dense(&[4, 2, 1], &sizes);
        let right = dense(&[3, 4], &sizes);
        let out = dense(&[3, 2, 1], &sizes);

        let plan = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F32,
            MainKernel::Madd,
            TouchKernel::Zero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap();

        assert_eq!(plan.kernel.m, 4 * 8);
        assert_eq!(plan.kernel.k, 6);
        assert_eq!(plan.loops.len(), 1); // dummy only
    }

    // A left operand that is neither M- nor K-contiguous needs packing.
    #[test]
    fn test_strided_left_operand_packs() {
        let sizes = sizes(&[(1, 4), (2, 5), (3, 6)]);
        let (m, n, k) = (1, 2, 3);
        // k-major left with an elementwise hole: strides (2, 12)
        let left = OperandLayout::with_strides(
            smallvec![k, m],
            smallvec![2, 12],
            &sizes,
        )
        .unwrap();
        let right = dense(&[n, k], &sizes);
        let out = dense(&[n, m], &sizes);

        let plan = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F32,
            MainKernel::Madd,
            TouchKernel::Zero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap();

        let pack = plan.pack_left.expect("left operand must be packed");
        assert_eq!(pack.loops.as_slice(), &[(6, 2, 4), (4, 12, 1), (1, 1, 1)]);
        assert_eq!(pack.bytes, 6 * 4 * 4);
        assert_eq!(plan.kernel.lda, 4);
        assert!(plan.pack_right.is_none());
    }

    // A unit-stride batch dimension in all operands promotes the main
    // kernel to the packed variant.
    #[test]
    fn test_packed_promotion() {
        let sizes = sizes(&[(0, 4), (1, 2), (2, 3), (3, 5)]);
        let (r, m, n, k) = (0, 1, 2, 3);
        let left = dense(&[k, m, r], &sizes);
        let right = dense(&[n, k, r], &sizes);
        let out = dense(&[n, m, r], &sizes);

        let plan = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F32,
            MainKernel::Madd,
            TouchKernel::Zero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap();

        assert_eq!(plan.main, MainKernel::PackedMadd);
        assert_eq!(plan.kernel.r, 4);
        assert_eq!(plan.kernel.lda, 2 * 4);
        assert_eq!(plan.kernel.ldb, 5 * 4);
        assert_eq!(plan.kernel.ldc, 2 * 4);
    }

    #[test]
    fn test_complex_requires_size_two_plane_dim() {
        let sizes = sizes(&[(0, 3), (1, 2), (2, 3), (3, 4)]);
        let left = dense(&[0, 3, 1], &sizes);
        let right = dense(&[0, 2, 3], &sizes);
        let out = dense(&[0, 2, 1], &sizes);

        let err = plan_loops(
            &left,
            &right,
            &out,
            None,
            &sizes,
            DataType::F32,
            MainKernel::CpxMadd,
            TouchKernel::CpxZero,
            TouchKernel::None,
            &ContractionConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, ContractionError::InvalidComplexDim);
    }

    #[test]
    fn test_stride_undercut_rejected() {
        let sizes = sizes(&[(1, 4), (2, 5)]);
        let err = OperandLayout::with_strides(smallvec![1, 2], smallvec![2, 1], &sizes).unwrap_err();
        assert!(matches!(err, ContractionError::StrideUndercut { dim: 1, .. }));
    }

    #[test]
    fn test_preferred_orderings_put_kernel_dims_innermost() {
        let sizes = sizes(&[(0, 7), (1, 4), (2, 5), (3, 6), (4, 3)]);
        // left: c m k0 k1, right: c n k0 k1, out: c n m
        let out = dense(&[0, 2, 1], &sizes);
        let (left, right) =
            preferred_child_orderings(&[0, 1, 3, 4], &[0, 2, 3, 4], &out, &sizes).unwrap();

        // kernel k is the largest contracted dimension (id 3, size 6)
        assert_eq!(left.as_slice(), &[0, 4, 3, 1]);
        assert_eq!(right.as_slice(), &[0, 4, 2, 3]);
    }
}
