use crate::compositor::{HmdInfo, NullCompositorBridge, SessionError};
use openxr::{ApplicationInfo, Entry, ExtensionSet, FormFactor, Instance, ViewConfigurationType};

/// Thin probe over an installed OpenXR runtime: enough to discover real
/// HMD geometry for the null bridge.
pub struct OpenXrProbe {
    instance: Instance,
    system_id: openxr::SystemId,
}

impl OpenXrProbe {
    pub fn initialize() -> Result<Self, SessionError> {
        let entry = Entry::load()
            .map_err(|err| SessionError::Unavailable(format!("failed to load OpenXR loader: {err}")))?;
        let app_info = ApplicationInfo {
            application_name: "Parallax",
            application_version: 1,
            engine_name: "Parallax",
            engine_version: 1,
        };

        let enabled_extensions = ExtensionSet::default();

        let instance = entry
            .create_instance(&app_info, &enabled_extensions, &[])
            .map_err(|err| {
                SessionError::Unavailable(format!("failed to create OpenXR instance: {err}"))
            })?;

        let system_id = instance
            .system(FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|err| {
                SessionError::Unavailable(format!("failed to query OpenXR system: {err}"))
            })?;

        Ok(Self {
            instance,
            system_id,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn system_id(&self) -> openxr::SystemId {
        self.system_id
    }

    pub fn hmd_info(&self) -> Result<HmdInfo, SessionError> {
        let views = self
            .instance
            .enumerate_view_configuration_views(
                self.system_id,
                ViewConfigurationType::PRIMARY_STEREO,
            )
            .map_err(|err| {
                SessionError::Unavailable(format!("failed to enumerate stereo views: {err}"))
            })?;

        let eye = views.first().ok_or_else(|| {
            SessionError::Unavailable("runtime reported no stereo views".to_string())
        })?;

        Ok(HmdInfo {
            product_name: "OpenXR HMD",
            resolution: [
                eye.recommended_image_rect_width * 2,
                eye.recommended_image_rect_height,
            ],
            // Core OpenXR has no refresh-rate query; runtimes expose it
            // through FB_display_refresh_rate only.
            refresh_rate: 0.0,
            default_fov: Default::default(),
        })
    }

    /// Null bridge carrying the probed geometry.
    pub fn into_bridge(self) -> Result<NullCompositorBridge, SessionError> {
        let hmd = self.hmd_info()?;
        Ok(NullCompositorBridge::with_resolution(hmd.resolution))
    }
}
