//! Vulkan instance and enumeration functions.
//!
//! Each instance exposes exactly one physical device: the native backend
//! named in the configuration, at its configured feature level.

use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};
use vkbridge_core::BridgeConfig;

use crate::dispatch::DispatchableHandle;
use crate::ffi::{self, guard, guard_result};
use crate::handle_store::{self, InstanceState, PhysicalDeviceState};

#[no_mangle]
pub unsafe extern "C" fn vkCreateInstance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    guard_result(|| {
        vkbridge_common::logging::init_logging();
        let ci = unsafe { ffi::reference(p_create_info) }?;

        let enabled_extensions =
            unsafe { ffi::read_string_array(ci.pp_enabled_extension_names, ci.enabled_extension_count) };
        if let Some(name) = enabled_extensions.first() {
            debug!("instance extension {} is not supported", name);
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        let enabled_layers = unsafe { ffi::read_string_array(ci.pp_enabled_layer_names, ci.enabled_layer_count) };
        if !enabled_layers.is_empty() {
            return Err(vk::Result::ERROR_LAYER_NOT_PRESENT);
        }

        let app_name = unsafe { ci.p_application_info.as_ref() }
            .filter(|ai| !ai.p_application_name.is_null())
            .map(|ai| unsafe { CStr::from_ptr(ai.p_application_name) }.to_string_lossy().into_owned());

        let config = BridgeConfig::from_environment();
        info!(
            app = app_name.as_deref().unwrap_or("<unnamed>"),
            backend = %config.device.backend,
            feature_level = config.device.feature_level.as_str(),
            "creating instance"
        );

        let pd_id = handle_store::store_physical_device(Arc::new(PhysicalDeviceState { config: config.clone() }));
        let physical_device: vk::PhysicalDevice = DispatchableHandle::wrap(pd_id);
        let id = handle_store::store_instance(Arc::new(InstanceState {
            config,
            physical_device,
        }));
        unsafe { ffi::write(p_instance, DispatchableHandle::wrap(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyInstance(instance: vk::Instance, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    guard((), || {
        let Some(id) = (unsafe { DispatchableHandle::id_of(instance) }) else {
            return;
        };
        if let Some(state) = handle_store::remove_instance(id) {
            if let Some(pd_id) = unsafe { DispatchableHandle::id_of(state.physical_device) } {
                handle_store::remove_physical_device(pd_id);
            }
            unsafe { DispatchableHandle::release(state.physical_device) };
        }
        unsafe { DispatchableHandle::release(instance) };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkEnumeratePhysicalDevices(
    instance: vk::Instance,
    p_physical_device_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || {
        let state = match unsafe { handle_store::instance(instance) } {
            Ok(state) => state,
            Err(code) => return code,
        };
        unsafe { ffi::enumerate(&[state.physical_device], p_physical_device_count, p_physical_devices) }
    })
}

/// Every layer-name query names a layer this ICD does not have.
unsafe fn layer_absent(p_layer_name: *const c_char) -> bool {
    !p_layer_name.is_null()
}

#[no_mangle]
pub unsafe extern "C" fn vkEnumerateInstanceExtensionProperties(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if unsafe { layer_absent(p_layer_name) } {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    unsafe { ffi::enumerate(&[], p_property_count, p_properties) }
}

#[no_mangle]
pub unsafe extern "C" fn vkEnumerateInstanceLayerProperties(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    unsafe { ffi::enumerate(&[], p_property_count, p_properties) }
}

#[no_mangle]
pub unsafe extern "C" fn vkEnumerateDeviceExtensionProperties(
    _physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if unsafe { layer_absent(p_layer_name) } {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    unsafe { ffi::enumerate(&[], p_property_count, p_properties) }
}

#[no_mangle]
pub unsafe extern "C" fn vkEnumerateDeviceLayerProperties(
    _physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    unsafe { ffi::enumerate(&[], p_property_count, p_properties) }
}
