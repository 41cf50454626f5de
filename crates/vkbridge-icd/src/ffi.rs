//! Helpers shared by the `vk*` entry points: the panic guard, error
//! reporting and raw-pointer marshalling.

use std::ffi::{c_char, CStr};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ash::vk;
use tracing::error;
use vkbridge_core::CoreError;
use vkbridge_d3d11::{LayoutError, NativeError, RecordError, ReplayError, ShaderError};

// ── Panic guard ─────────────────────────────────────────────

/// Run an entry point body, converting a panic into `default`.
pub fn guard<R>(default: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("panic at the Vulkan ABI boundary: {}", message);
            default
        }
    }
}

/// [`guard`] for entry points returning `VkResult`, with the body written
/// against `Result` so it can use `?`.
pub fn guard_result(f: impl FnOnce() -> Result<(), vk::Result>) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || match f() {
        Ok(()) => vk::Result::SUCCESS,
        Err(code) => code,
    })
}

// ── Error reporting ─────────────────────────────────────────

pub trait ToVkResult: fmt::Display {
    fn to_vk_result(&self) -> vk::Result;
}

macro_rules! to_vk_result {
    ($($ty:ty),*) => {
        $(impl ToVkResult for $ty {
            fn to_vk_result(&self) -> vk::Result {
                <$ty>::to_vk_result(self)
            }
        })*
    };
}

to_vk_result!(NativeError, LayoutError, ShaderError, RecordError, ReplayError);

impl ToVkResult for CoreError {
    fn to_vk_result(&self) -> vk::Result {
        match self {
            CoreError::HandleNotFound(_) => vk::Result::ERROR_UNKNOWN,
            _ => vk::Result::ERROR_INITIALIZATION_FAILED,
        }
    }
}

/// `map_err` adapter: log the failure under `call` and return its code.
pub fn fail<E: ToVkResult>(call: &'static str) -> impl FnOnce(E) -> vk::Result {
    move |e| {
        error!("{} failed: {}", call, e);
        e.to_vk_result()
    }
}

// ── Marshalling ─────────────────────────────────────────────

/// View a `(pointer, count)` pair as a slice. Null or zero-length is empty.
///
/// # Safety
/// A non-null `ptr` must point to `count` valid elements that outlive the
/// returned slice.
pub unsafe fn slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

/// Mutable counterpart of [`slice`].
///
/// # Safety
/// As for [`slice`], and no other reference to the elements may exist.
pub unsafe fn slice_mut<'a, T>(ptr: *mut T, count: u32) -> &'a mut [T] {
    if ptr.is_null() || count == 0 {
        &mut []
    } else {
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts_mut(ptr, count as usize) }
    }
}

/// # Safety
/// `ptr` must be null or point to a valid `T`.
pub unsafe fn reference<'a, T>(ptr: *const T) -> Result<&'a T, vk::Result> {
    // SAFETY: guaranteed by the caller.
    unsafe { ptr.as_ref() }.ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
}

/// # Safety
/// `ptr` must be null or valid for a write of `T`.
pub unsafe fn write<T>(ptr: *mut T, value: T) -> Result<(), vk::Result> {
    if ptr.is_null() {
        return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
    }
    // SAFETY: non-null and valid per the caller.
    unsafe { ptr.write(value) };
    Ok(())
}

/// # Safety
/// Every non-null pointer in the array must be a NUL-terminated string.
pub unsafe fn read_string_array(ptrs: *const *const c_char, count: u32) -> Vec<String> {
    // SAFETY: guaranteed by the caller.
    unsafe { slice(ptrs, count) }
        .iter()
        .filter(|p| !p.is_null())
        // SAFETY: non-null entries are NUL-terminated per the caller.
        .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        .collect()
}

/// The two-call enumeration idiom: report the count when `p_items` is null,
/// otherwise copy up to `*p_count` items and return `INCOMPLETE` on
/// truncation.
///
/// # Safety
/// `p_count` must be valid; a non-null `p_items` must have room for
/// `*p_count` elements.
pub unsafe fn enumerate<T: Copy>(items: &[T], p_count: *mut u32, p_items: *mut T) -> vk::Result {
    if p_count.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    if p_items.is_null() {
        // SAFETY: checked non-null above.
        unsafe { *p_count = items.len() as u32 };
        return vk::Result::SUCCESS;
    }
    // SAFETY: checked non-null above.
    let capacity = unsafe { *p_count } as usize;
    let n = capacity.min(items.len());
    // SAFETY: the caller provides room for `capacity >= n` elements.
    unsafe {
        std::ptr::copy_nonoverlapping(items.as_ptr(), p_items, n);
        *p_count = n as u32;
    }
    if n < items.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

/// Copy `s` into a fixed-size, NUL-terminated Vulkan name field.
pub fn copy_name(dst: &mut [c_char], s: &str) {
    let n = s.len().min(dst.len().saturating_sub(1));
    for (d, b) in dst.iter_mut().zip(s.bytes().take(n)) {
        *d = b as c_char;
    }
    if let Some(end) = dst.get_mut(n) {
        *end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_converts_panics() {
        let r = guard(vk::Result::ERROR_UNKNOWN, || -> vk::Result { panic!("boom") });
        assert_eq!(r, vk::Result::ERROR_UNKNOWN);
        assert_eq!(guard_result(|| Err(vk::Result::TIMEOUT)), vk::Result::TIMEOUT);
        assert_eq!(guard_result(|| Ok(())), vk::Result::SUCCESS);
    }

    #[test]
    fn enumerate_reports_truncation() {
        let items = [1u32, 2, 3];
        let mut count = 0u32;
        assert_eq!(
            unsafe { enumerate(&items, &mut count, std::ptr::null_mut()) },
            vk::Result::SUCCESS
        );
        assert_eq!(count, 3);

        let mut out = [0u32; 2];
        count = 2;
        assert_eq!(
            unsafe { enumerate(&items, &mut count, out.as_mut_ptr()) },
            vk::Result::INCOMPLETE
        );
        assert_eq!(out, [1, 2]);
        assert_eq!(count, 2);
    }

    #[test]
    fn names_are_truncated_and_terminated() {
        let mut buf = [1 as c_char; 4];
        copy_name(&mut buf, "vkbridge");
        assert_eq!(buf, [b'v' as c_char, b'k' as c_char, b'b' as c_char, 0]);
    }
}
