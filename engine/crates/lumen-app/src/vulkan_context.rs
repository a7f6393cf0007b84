use std::ffi::{CStr, CString};

use anyhow::{Context, bail};
use ash::vk;
use itertools::Itertools;
use lumen_gfx::vulkan::VulkanBackendCreateInfo;

const ENGINE_NAME: &CStr = c"lumen";

/// 创建 [`lumen_gfx::vulkan::VulkanBackend`] 所需的 instance 和 device
///
/// 只创建一个 graphics queue。device 开启 Vulkan 1.3 的 synchronization2、timeline semaphore、
/// buffer device address 以及 `VK_EXT_descriptor_buffer`。
pub struct VulkanContext {
    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    _entry: ash::Entry,

    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,

    /// instance 是否开启了 `VK_EXT_debug_utils`
    debug_utils: bool,
}
// new & init
impl VulkanContext {
    pub fn new(app_name: &str) -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load() }.context("failed to load vulkan entry")?;
        let debug_utils = Self::has_instance_extension(&entry, ash::ext::debug_utils::NAME)?;
        let instance = Self::create_instance(&entry, app_name, debug_utils)?;

        let device = Self::pick_physical_device(&instance).and_then(|(physical_device, queue_family_index)| {
            let device = Self::create_device(&instance, physical_device, queue_family_index)?;
            Ok((physical_device, queue_family_index, device))
        });
        let (physical_device, queue_family_index, device) = match device {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        Ok(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            queue_family_index,
            debug_utils,
        })
    }

    fn has_instance_extension(entry: &ash::Entry, name: &CStr) -> anyhow::Result<bool> {
        let exts = unsafe { entry.enumerate_instance_extension_properties(None)? };
        Ok(exts.iter().any(|ext| ext.extension_name_as_c_str().is_ok_and(|ext_name| ext_name == name)))
    }

    fn create_instance(entry: &ash::Entry, app_name: &str, debug_utils: bool) -> anyhow::Result<ash::Instance> {
        let app_name = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let exts = if debug_utils { vec![ash::ext::debug_utils::NAME.as_ptr()] } else { vec![] };
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info).enabled_extension_names(&exts);

        let instance = unsafe { entry.create_instance(&create_info, None) }.context("failed to create instance")?;
        log::info!("vulkan instance created, debug utils: {}", debug_utils);
        Ok(instance)
    }

    /// 优先选择独立显卡；设备需要支持 Vulkan 1.3、descriptor buffer，并且有 graphics queue
    fn pick_physical_device(instance: &ash::Instance) -> anyhow::Result<(vk::PhysicalDevice, u32)> {
        let candidates = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .filter_map(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(pdevice) };
                let name = props.device_name_as_c_str().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
                if props.api_version < vk::API_VERSION_1_3 {
                    log::info!("skip {}: vulkan 1.3 is not supported", name);
                    return None;
                }
                if !Self::supports_descriptor_buffer(instance, pdevice) {
                    log::info!("skip {}: descriptor buffer is not supported", name);
                    return None;
                }
                let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties(pdevice) }
                    .iter()
                    .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
                Some((pdevice, props.device_type, name, queue_family_index as u32))
            })
            .collect_vec();

        let Some((pdevice, _, name, queue_family_index)) = candidates
            .into_iter()
            .find_or_first(|(_, device_type, _, _)| *device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        else {
            bail!("no physical device supports vulkan 1.3 with VK_EXT_descriptor_buffer");
        };
        log::info!("physical device: {}, graphics queue family {}", name, queue_family_index);
        Ok((pdevice, queue_family_index))
    }

    fn supports_descriptor_buffer(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> bool {
        let Ok(exts) = (unsafe { instance.enumerate_device_extension_properties(pdevice) }) else {
            return false;
        };
        if !exts
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == ash::ext::descriptor_buffer::NAME))
        {
            return false;
        }

        let mut db_features = vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut db_features);
        unsafe { instance.get_physical_device_features2(pdevice, &mut features2) };
        db_features.descriptor_buffer == vk::TRUE
    }

    fn create_device(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> anyhow::Result<ash::Device> {
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&[1.0])];
        let exts = [ash::ext::descriptor_buffer::NAME.as_ptr()];

        let supported = unsafe { instance.get_physical_device_features(pdevice) };
        let mut features_13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let mut features_12 =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true).buffer_device_address(true);
        let mut db_features = vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default().descriptor_buffer(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE))
            .push_next(&mut features_12)
            .push_next(&mut features_13)
            .push_next(&mut db_features);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&exts)
            .push_next(&mut features2);
        let device = unsafe { instance.create_device(pdevice, &create_info, None) }.context("failed to create device")?;
        Ok(device)
    }
}
// destroy
impl VulkanContext {
    /// 调用前 backend 必须已经销毁
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        log::info!("vulkan context destroyed");
    }
}
// getters
impl VulkanContext {
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn backend_create_info(&self) -> VulkanBackendCreateInfo<'_> {
        VulkanBackendCreateInfo {
            instance: &self.instance,
            physical_device: self.physical_device,
            device: &self.device,
            queue_family_index: self.queue_family_index,
            queue_index: 0,
            debug_names: self.debug_utils,
        }
    }
}
