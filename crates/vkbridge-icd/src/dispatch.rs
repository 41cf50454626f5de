//! Dispatchable handles.
//!
//! The Vulkan loader requires that dispatchable handles (VkInstance,
//! VkPhysicalDevice, VkDevice, VkQueue, VkCommandBuffer) start with a
//! pointer-sized slot it owns. The ICD fills it with the loader magic; the
//! loader overwrites it with its dispatch table after the handle is returned.

use ash::vk::Handle;

/// The ICD loader magic value. The loader expects this in new dispatchable handles.
pub const ICD_LOADER_MAGIC: usize = 0x01CDC0DE;

#[repr(C)]
pub struct DispatchableHandle {
    /// Owned by the loader once the handle has been returned.
    pub loader_data: usize,
    /// Key into the matching map of `handle_store`.
    pub local_id: u64,
}

impl DispatchableHandle {
    pub fn new(local_id: u64) -> *mut Self {
        Box::into_raw(Box::new(Self {
            loader_data: ICD_LOADER_MAGIC,
            local_id,
        }))
    }

    /// Allocate a handle for `local_id` and return it as a typed Vulkan handle.
    pub fn wrap<H: Handle>(local_id: u64) -> H {
        H::from_raw(Self::new(local_id) as u64)
    }

    /// The `local_id` behind a typed handle, or `None` for `VK_NULL_HANDLE`.
    ///
    /// # Safety
    /// A non-null handle must have been created by [`wrap`](Self::wrap) and
    /// not yet released.
    pub unsafe fn id_of<H: Handle>(handle: H) -> Option<u64> {
        let ptr = handle.as_raw() as *const Self;
        if ptr.is_null() {
            None
        } else {
            // SAFETY: guaranteed by the caller.
            Some(unsafe { (*ptr).local_id })
        }
    }

    /// Free the allocation behind a typed handle.
    ///
    /// # Safety
    /// The handle must have been created by [`wrap`](Self::wrap) and is
    /// invalid afterwards.
    pub unsafe fn release<H: Handle>(handle: H) {
        let ptr = handle.as_raw() as *mut Self;
        if !ptr.is_null() {
            // SAFETY: guaranteed by the caller.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn wrapped_handles_carry_magic_and_id() {
        let device: vk::Device = DispatchableHandle::wrap(42);
        let ptr = device.as_raw() as *const DispatchableHandle;
        unsafe {
            assert_eq!((*ptr).loader_data, ICD_LOADER_MAGIC);
            assert_eq!(DispatchableHandle::id_of(device), Some(42));
            DispatchableHandle::release(device);
        }
        assert_eq!(unsafe { DispatchableHandle::id_of(vk::Device::null()) }, None);
    }
}
