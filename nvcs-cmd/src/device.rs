// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use nvcs_common::methods;
use nvcs_common::settings::Settings;
use nvcs_common::types::DeviceInfo;
use nvcs_mme::{MmeError, MmeImage};

use crate::vk_tables;

/// Read-only state shared by every command buffer of a device: capabilities,
/// settings and the assembled microprogram image.
#[derive(Debug)]
pub struct Device {
    info: DeviceInfo,
    settings: Settings,
    image: Arc<MmeImage>,
}

impl Device {
    /// Check the static tables and assemble the microprogram image.
    pub fn new(info: DeviceInfo, settings: Settings) -> Result<Arc<Self>, MmeError> {
        if let Err(e) = methods::self_check() {
            panic!("method table self-check failed: {}", e);
        }
        if let Err(e) = vk_tables::self_check() {
            panic!("enum table self-check failed: {}", e);
        }

        let image = MmeImage::build(info.gen)?;
        log::info!(
            "Device: {:?} (class 0x{:04X}), MME image {} words",
            info.gen,
            info.gen.class_id(),
            image.code().len()
        );
        Ok(Arc::new(Self {
            info,
            settings,
            image: Arc::new(image),
        }))
    }

    /// Device for the generation named in `settings`.
    pub fn from_settings(settings: Settings) -> Result<Arc<Self>, MmeError> {
        Self::new(DeviceInfo::new(settings.generation), settings)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn image(&self) -> &Arc<MmeImage> {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvcs_common::types::ClassGen;

    #[test]
    fn test_device_per_generation() {
        for gen in ClassGen::ALL {
            let dev = Device::new(DeviceInfo::new(gen), Settings::default()).unwrap();
            assert_eq!(dev.info().gen, gen);
            assert_eq!(dev.image().gen(), gen);
        }
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            generation: ClassGen::Pascal,
            ..Settings::default()
        };
        let dev = Device::from_settings(settings).unwrap();
        assert!(!dev.info().has_fast_indirect_loads);
    }

    #[test]
    fn test_image_shared() {
        let dev = Device::new(DeviceInfo::default(), Settings::default()).unwrap();
        let a = Arc::clone(dev.image());
        assert!(Arc::ptr_eq(&a, dev.image()));
    }
}
