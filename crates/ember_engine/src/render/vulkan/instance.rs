//! Vulkan instance and debug messenger
//!
//! The instance owns the driver connection and is created first and destroyed
//! last. Required extensions are the union of the windowing layer's surface
//! extensions and the debug extension when validation is enabled; both the
//! extension set and the validation layer are verified against what the host
//! actually offers before creation.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use std::ffi::{CStr, CString};

use crate::render::vulkan::{VulkanError, VulkanResult};
use crate::render::window::Window;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, optionally with validation layers
    pub fn new(
        window: &Window,
        app_name: &str,
        app_version: (u32, u32, u32),
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}"))
        })?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("app name contains NUL".to_string()))?;
        let engine_name_cstr = CString::new("EmberEngine").expect("static name");
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(
                0,
                app_version.0,
                app_version.1,
                app_version.2,
            ))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions from the windowing layer, plus debug utils when
        // validation is on.
        let required_extensions = window.get_required_instance_extensions().map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}"))
        })?;

        let mut cstr_extensions: Vec<CString> = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()).expect("extension name contains NUL"))
            .collect();
        if enable_validation {
            cstr_extensions.push(CString::from(DebugUtils::name()));
        }

        Self::check_extension_support(&entry, &cstr_extensions)?;
        if enable_validation {
            Self::check_layer_support(&entry)?;
        }

        let extension_ptrs: Vec<*const i8> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let layer_names = if enable_validation {
            vec![CString::new(VALIDATION_LAYER).expect("static name")]
        } else {
            vec![]
        };
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        log::debug!(
            "Vulkan instance created ({} extensions, validation: {})",
            extension_ptrs.len(),
            enable_validation
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Verify that every required extension is offered by the host
    fn check_extension_support(entry: &Entry, required: &[CString]) -> VulkanResult<()> {
        let available = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::Api)?;

        for required_ext in required {
            let found = available.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == required_ext.as_c_str()
            });
            if !found {
                return Err(VulkanError::MissingExtension {
                    name: required_ext.to_string_lossy().into_owned(),
                });
            }
        }
        Ok(())
    }

    /// Verify the validation layer is installed
    fn check_layer_support(entry: &Entry) -> VulkanResult<()> {
        let available = entry
            .enumerate_instance_layer_properties()
            .map_err(VulkanError::Api)?;

        let found = available.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_string_lossy() == VALIDATION_LAYER
        });

        if found {
            Ok(())
        } else {
            Err(VulkanError::ValidationLayerUnavailable {
                name: VALIDATION_LAYER.to_string(),
            })
        }
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Get a reference to the instance handle
    pub fn handle(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils, &self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes driver diagnostics into the engine log
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}
