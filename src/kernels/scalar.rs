//! Scalar reference implementations of the primitive kernels.
//!
//! These are the portable fallbacks a hardware-accelerated backend
//! would replace; the loop engine treats them as opaque callables.

use crate::planner::{KernelShape, PackPlan};
use crate::types::DataType;

use super::CopyKernelFn;

/// Scalar element the reference kernels operate on.
pub(crate) trait Element:
    Copy
    + Default
    + PartialOrd
    + core::ops::Add<Output = Self>
    + core::ops::Sub<Output = Self>
    + core::ops::Mul<Output = Self>
{
}

impl Element for f32 {}
impl Element for f64 {}

/// Multiply-(add|subtract) block: `c (+|-)= a * b` over the kernel
/// shape, honoring transpose flags and the replicated `r` sub-block.
unsafe fn gemm_block<T: Element, const SUB: bool>(
    s: &KernelShape,
    a: *const T,
    b: *const T,
    c: *mut T,
) {
    unsafe {
        for n in 0..s.n {
            for m in 0..s.m {
                let ci = n * s.ldc + m * s.r;
                for k in 0..s.k {
                    let ai = if s.trans_a {
                        m * s.lda + k * s.r
                    } else {
                        k * s.lda + m * s.r
                    };
                    let bi = if s.trans_b {
                        k * s.ldb + n * s.r
                    } else {
                        n * s.ldb + k * s.r
                    };
                    for rr in 0..s.r {
                        let prod = *a.add(ai + rr) * *b.add(bi + rr);
                        let cur = *c.add(ci + rr);
                        *c.add(ci + rr) = if SUB { cur - prod } else { cur + prod };
                    }
                }
            }
        }
    }
}

/// Real multiply-add primitive (plain and packed variants).
pub(crate) unsafe fn madd<T: Element>(s: &KernelShape, a: *const u8, b: *const u8, c: *mut u8) {
    unsafe {
        gemm_block::<T, false>(s, a.cast(), b.cast(), c.cast());
    }
}

/// Complex multiply-add: the fixed four-product expansion
/// `(ac - bd, ad + bc)` over interleaved real/imaginary planes,
/// realized as four invocations of the real primitive with pointer
/// offsets.
pub(crate) unsafe fn cpx_madd<T: Element>(s: &KernelShape, a: *const u8, b: *const u8, c: *mut u8) {
    unsafe {
        let ar: *const T = a.cast();
        let br: *const T = b.cast();
        let cr: *mut T = c.cast();
        let ai = ar.offset(s.cpx_left);
        let bi = br.offset(s.cpx_right);
        let ci = cr.offset(s.cpx_out);

        gemm_block::<T, false>(s, ar, br, cr);
        gemm_block::<T, true>(s, ai, bi, cr);
        gemm_block::<T, false>(s, ar, bi, ci);
        gemm_block::<T, false>(s, ai, br, ci);
    }
}

/// No-op touch kernel backing the explicit `None` variant.
pub(crate) unsafe fn touch_noop(_s: &KernelShape, _aux: *const u8, _out: *mut u8) {}

unsafe fn touch_block<T: Element>(
    s: &KernelShape,
    aux: *const T,
    out: *mut T,
    op: impl Fn(T, T) -> T,
) {
    unsafe {
        for n in 0..s.n {
            for m in 0..s.m {
                for rr in 0..s.r {
                    let oi = n * s.ldc + m * s.r + rr;
                    let xi = n * s.stride_n_aux + m * s.stride_m_aux + rr;
                    let x = if aux.is_null() {
                        T::default()
                    } else {
                        *aux.add(xi)
                    };
                    *out.add(oi) = op(*out.add(oi), x);
                }
            }
        }
    }
}

/// Zero-initializes the output block.
pub(crate) unsafe fn touch_zero<T: Element>(s: &KernelShape, _aux: *const u8, out: *mut u8) {
    unsafe {
        touch_block::<T>(s, core::ptr::null(), out.cast(), |_, _| T::default());
    }
}

/// Copies the auxiliary operand into the output block.
pub(crate) unsafe fn touch_copy<T: Element>(s: &KernelShape, aux: *const u8, out: *mut u8) {
    unsafe {
        touch_block::<T>(s, aux.cast(), out.cast(), |_, x| x);
    }
}

/// Adds the auxiliary operand to the output block.
pub(crate) unsafe fn touch_add<T: Element>(s: &KernelShape, aux: *const u8, out: *mut u8) {
    unsafe {
        touch_block::<T>(s, aux.cast(), out.cast(), |c, x| c + x);
    }
}

/// Rectified linear unit over the output block.
pub(crate) unsafe fn touch_relu<T: Element>(s: &KernelShape, _aux: *const u8, out: *mut u8) {
    unsafe {
        touch_block::<T>(s, core::ptr::null(), out.cast(), |c, _| {
            if c < T::default() { T::default() } else { c }
        });
    }
}

unsafe fn touch_planes<T: Element>(
    s: &KernelShape,
    aux: *const u8,
    out: *mut u8,
    touch: unsafe fn(&KernelShape, *const u8, *mut u8),
) {
    unsafe {
        touch(s, aux, out);
        let aux_im = if aux.is_null() {
            aux
        } else {
            aux.offset(s.cpx_aux * size_of::<T>() as isize)
        };
        let out_im = out.offset(s.cpx_out * size_of::<T>() as isize);
        touch(s, aux_im, out_im);
    }
}

pub(crate) unsafe fn touch_cpx_zero<T: Element>(s: &KernelShape, aux: *const u8, out: *mut u8) {
    unsafe {
        touch_planes::<T>(s, aux, out, touch_zero::<T>);
    }
}

pub(crate) unsafe fn touch_cpx_copy<T: Element>(s: &KernelShape, aux: *const u8, out: *mut u8) {
    unsafe {
        touch_planes::<T>(s, aux, out, touch_copy::<T>);
    }
}

pub(crate) unsafe fn touch_cpx_add<T: Element>(s: &KernelShape, aux: *const u8, out: *mut u8) {
    unsafe {
        touch_planes::<T>(s, aux, out, touch_add::<T>);
    }
}

/// Packs one operand block into contiguous scratch.
pub(crate) unsafe fn pack<T: Element>(plan: &PackPlan, src: *const u8, dst: *mut u8) {
    unsafe {
        let src: *const T = src.cast();
        let dst: *mut T = dst.cast();
        let [(s0, src0, dst0), (s1, src1, dst1), (s2, src2, dst2)] =
            [plan.loops[0], plan.loops[1], plan.loops[2]];
        for i0 in 0..s0 as isize {
            for i1 in 0..s1 as isize {
                for i2 in 0..s2 as isize {
                    let so = i0 * src0 + i1 * src1 + i2 * src2;
                    let do_ = i0 * dst0 + i1 * dst1 + i2 * dst2;
                    *dst.offset(do_) = *src.offset(so);
                }
            }
        }
    }
}

unsafe fn copy_strided_rec<T: Element>(
    sizes: &[usize],
    src_strides: &[isize],
    dst_strides: &[isize],
    src: *const T,
    dst: *mut T,
) {
    unsafe {
        match sizes {
            [] => *dst = *src,
            [size, rest @ ..] => {
                for i in 0..*size as isize {
                    copy_strided_rec(
                        rest,
                        &src_strides[1..],
                        &dst_strides[1..],
                        src.offset(i * src_strides[0]),
                        dst.offset(i * dst_strides[0]),
                    );
                }
            }
        }
    }
}

unsafe fn copy_strided<T: Element>(
    sizes: &[usize],
    src_strides: &[isize],
    dst_strides: &[isize],
    src: *const u8,
    dst: *mut u8,
) {
    unsafe {
        copy_strided_rec::<T>(sizes, src_strides, dst_strides, src.cast(), dst.cast());
    }
}

/// Strided tensor-copy primitive for the given element type, used to
/// permute external data into a private layout.
pub fn copy_kernel(dtype: DataType) -> CopyKernelFn {
    match dtype {
        DataType::F32 => copy_strided::<f32>,
        DataType::F64 => copy_strided::<f64>,
    }
}
