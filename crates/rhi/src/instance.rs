//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and the debug
//! messenger.
//!
//! When validation is enabled every message of warning severity or above is
//! logged through `tracing`. Errors are also counted in a [`ValidationSink`]
//! so the frame loop can escalate them with [`Instance::check_validation`].
//!
//! # Example
//!
//! ```no_run
//! use deferred_rhi::instance::Instance;
//!
//! let surface_extensions = Vec::new(); // from the window
//! let instance = Instance::new(cfg!(debug_assertions), &surface_extensions)
//!     .expect("Failed to create Vulkan instance");
//! let vk_instance = instance.handle();
//! ```

use std::ffi::{CStr, c_char, c_void};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Collects validation errors reported by the debug messenger.
#[derive(Default)]
pub struct ValidationSink {
    errors: AtomicU32,
    last_error: Mutex<String>,
}

impl ValidationSink {
    fn record_error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = message.to_string();
        }
    }

    /// Number of errors reported since the last [`take`](Self::take).
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns and resets the error count together with the last message.
    pub fn take(&self) -> (u32, String) {
        let count = self.errors.swap(0, Ordering::Relaxed);
        let last = self
            .last_error
            .lock()
            .map(|mut last| std::mem::take(&mut *last))
            .unwrap_or_default();
        (count, last)
    }
}

/// Vulkan instance wrapper with optional validation layer support.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// Boxed so the pointer handed to the messenger stays put.
    validation: Box<ValidationSink>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// `surface_extensions` are the window system extensions the presentation
    /// surface needs; `VK_KHR_surface` is always among them.
    ///
    /// Validation is silently skipped if the layer is not installed.
    pub fn new(enable_validation: bool, surface_extensions: &[*const c_char]) -> RhiResult<Self> {
        // SAFETY: loading the system Vulkan library has no preconditions.
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Deferred Renderer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"deferred")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = surface_extensions.to_vec();
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: create_info and everything it points to outlive the call.
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!("Vulkan instance created (API version 1.3)");

        let validation = Box::new(ValidationSink::default());

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils, &validation)?;
            info!("Validation layers enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            validation,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether validation layers (and therefore debug utils) are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Fails with [`RhiError::ValidationFailed`] if the validation layer
    /// reported errors since the previous check.
    pub fn check_validation(&self) -> RhiResult<()> {
        let (count, last) = self.validation.take();
        if count > 0 {
            return Err(RhiError::ValidationFailed { count, last });
        }
        Ok(())
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        // SAFETY: entry is a loaded Vulkan library.
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });

        Ok(found)
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
        sink: &ValidationSink,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(sink as *const ValidationSink as *mut c_void);

        // SAFETY: the sink is boxed inside Instance and outlives the messenger,
        // which is destroyed first in Drop.
        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger created");

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // SAFETY: all child objects have been dropped by their owners; the
        // messenger goes before the instance.
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Routes validation messages to `tracing` and counts errors.
///
/// # Safety
///
/// Called by the Vulkan loader. `user_data` is either null or points at the
/// [`ValidationSink`] owned by the [`Instance`] that registered the messenger.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: non-null callback data is valid for the duration of the call.
    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        // SAFETY: p_message is a null-terminated string owned by the loader.
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "[{}] {}", type_str, message);
        if !user_data.is_null() {
            // SAFETY: see function docs.
            let sink = unsafe { &*(user_data as *const ValidationSink) };
            sink.record_error(&message);
        }
    } else {
        warn!(target: "vulkan", "[{}] {}", type_str, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_take_resets_count() {
        let sink = ValidationSink::default();
        sink.record_error("first");
        sink.record_error("second");
        assert_eq!(sink.error_count(), 2);

        let (count, last) = sink.take();
        assert_eq!(count, 2);
        assert_eq!(last, "second");
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn test_instance_creation_without_validation() {
        let result = Instance::new(false, &[ash::khr::surface::NAME.as_ptr()]);
        match result {
            Ok(instance) => {
                assert!(!instance.has_validation());
                assert!(instance.check_validation().is_ok());
            }
            Err(RhiError::LoadingError(_)) | Err(RhiError::VulkanError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
