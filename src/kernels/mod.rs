//! Kernel dispatch: mapping kernel types and data types onto concrete
//! primitive functions.
//!
//! The loop engine only ever sees opaque callables over raw bytes plus
//! a [`KernelShape`]; the scalar module provides the reference
//! implementations. Optional first/last-touch kernels resolve to an
//! explicit no-op function instead of a nullable pointer.

mod scalar;

pub use scalar::copy_kernel;

use crate::error::{ContractionError, ContractionResult};
use crate::planner::{KernelShape, PackPlan};
use crate::types::{DataType, MainKernel, TouchKernel};

/// Main contraction primitive: (shape, left, right, out).
pub type MainKernelFn = unsafe fn(&KernelShape, *const u8, *const u8, *mut u8);

/// First/last-touch primitive: (shape, aux, out).
pub type TouchKernelFn = unsafe fn(&KernelShape, *const u8, *mut u8);

/// Operand packing primitive: (plan, src, dst).
pub type PackKernelFn = unsafe fn(&PackPlan, *const u8, *mut u8);

/// Strided copy primitive used for tensor permutation:
/// (sizes, src strides, dst strides, src, dst).
pub type CopyKernelFn = unsafe fn(&[usize], &[isize], &[isize], *const u8, *mut u8);

/// Resolved kernel functions of one compiled contraction.
#[derive(Debug, Clone, Copy)]
pub struct KernelSet {
    pub first_touch: TouchKernelFn,
    pub main: MainKernelFn,
    pub last_touch: TouchKernelFn,
    pub pack: PackKernelFn,
    pub has_first_touch: bool,
    pub has_last_touch: bool,
}

/// Selects the kernel functions for a contraction.
///
/// Homogeneous FP32 or FP64 operand triples select the matching scalar
/// kernels; anything else fails compilation rather than silently
/// truncating precision. Touch kernels must match their position and
/// the main kernel's complex-ness.
pub fn select_kernels(
    first_touch: TouchKernel,
    main: MainKernel,
    last_touch: TouchKernel,
    dtype_left: DataType,
    dtype_right: DataType,
    dtype_out: DataType,
) -> ContractionResult<KernelSet> {
    if dtype_left != dtype_right || dtype_left != dtype_out {
        return Err(ContractionError::UnsupportedDtypes {
            left: dtype_left,
            right: dtype_right,
            out: dtype_out,
        });
    }

    for touch in [first_touch, last_touch] {
        if touch != TouchKernel::None && touch.is_complex() != main.is_complex() {
            return Err(ContractionError::InvalidKernel {
                kernel: touch.name(),
                position: if main.is_complex() {
                    "touch of a complex contraction"
                } else {
                    "touch of a real contraction"
                },
            });
        }
    }

    match dtype_out {
        DataType::F32 => build::<f32>(first_touch, main, last_touch),
        DataType::F64 => build::<f64>(first_touch, main, last_touch),
    }
}

fn build<T: scalar::Element>(
    first_touch: TouchKernel,
    main: MainKernel,
    last_touch: TouchKernel,
) -> ContractionResult<KernelSet> {
    let main_fn: MainKernelFn = match main {
        MainKernel::Madd | MainKernel::PackedMadd => scalar::madd::<T>,
        MainKernel::CpxMadd | MainKernel::CpxPackedMadd => scalar::cpx_madd::<T>,
    };

    let first_fn: TouchKernelFn = match first_touch {
        TouchKernel::None => scalar::touch_noop,
        TouchKernel::Zero => scalar::touch_zero::<T>,
        TouchKernel::Copy => scalar::touch_copy::<T>,
        TouchKernel::CpxZero => scalar::touch_cpx_zero::<T>,
        TouchKernel::CpxCopy => scalar::touch_cpx_copy::<T>,
        other => {
            return Err(ContractionError::InvalidKernel {
                kernel: other.name(),
                position: "first-touch",
            });
        }
    };

    let last_fn: TouchKernelFn = match last_touch {
        TouchKernel::None => scalar::touch_noop,
        TouchKernel::Relu => scalar::touch_relu::<T>,
        TouchKernel::Add => scalar::touch_add::<T>,
        TouchKernel::CpxAdd => scalar::touch_cpx_add::<T>,
        other => {
            return Err(ContractionError::InvalidKernel {
                kernel: other.name(),
                position: "last-touch",
            });
        }
    };

    Ok(KernelSet {
        first_touch: first_fn,
        main: main_fn,
        last_touch: last_fn,
        pack: scalar::pack::<T>,
        has_first_touch: first_touch != TouchKernel::None,
        has_last_touch: last_touch != TouchKernel::None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_dtypes_rejected() {
        let err = select_kernels(
            TouchKernel::Zero,
            MainKernel::Madd,
            TouchKernel::None,
            DataType::F32,
            DataType::F64,
            DataType::F32,
        )
        .unwrap_err();
        assert!(matches!(err, ContractionError::UnsupportedDtypes { .. }));
    }

    #[test]
    fn test_touch_position_enforced() {
        // Relu is a last-touch operation
        let err = select_kernels(
            TouchKernel::Relu,
            MainKernel::Madd,
            TouchKernel::None,
            DataType::F32,
            DataType::F32,
            DataType::F32,
        )
        .unwrap_err();
        assert!(matches!(err, ContractionError::InvalidKernel { .. }));
    }

    #[test]
    fn test_complex_touch_requires_complex_main() {
        let err = select_kernels(
            TouchKernel::CpxZero,
            MainKernel::Madd,
            TouchKernel::None,
            DataType::F32,
            DataType::F32,
            DataType::F32,
        )
        .unwrap_err();
        assert!(matches!(err, ContractionError::InvalidKernel { .. }));
    }

    #[test]
    fn test_noop_touches() {
        let set = select_kernels(
            TouchKernel::None,
            MainKernel::Madd,
            TouchKernel::None,
            DataType::F64,
            DataType::F64,
            DataType::F64,
        )
        .unwrap();
        assert!(!set.has_first_touch);
        assert!(!set.has_last_touch);
    }
}
