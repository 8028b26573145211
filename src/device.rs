//! Adapter selection.
//!
//! wgpu reports every adapter it can reach, software rasterizers included
//! (llvmpipe, lavapipe, WARP show up as `DeviceType::Cpu`). The selection
//! policy below is kept free of wgpu objects so it can be tested without
//! any driver installed:
//!
//! - `Gpu`: DiscreteGpu > IntegratedGpu > VirtualGpu > Other
//! - `Cpu`: Cpu only
//! - `Any`: the `Gpu` order, then Cpu
//!
//! Ties keep the enumeration order.

use std::fmt;

use crate::enums::DeviceKind;

/// What the selection policy needs to know about an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSummary {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<&wgpu::AdapterInfo> for AdapterSummary {
    fn from(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            device_type: info.device_type,
            backend: info.backend,
        }
    }
}

impl fmt::Display for AdapterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

fn gpu_rank(device_type: wgpu::DeviceType) -> Option<u8> {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => Some(0),
        wgpu::DeviceType::IntegratedGpu => Some(1),
        wgpu::DeviceType::VirtualGpu => Some(2),
        wgpu::DeviceType::Other => Some(3),
        wgpu::DeviceType::Cpu => None,
    }
}

/// Lower is better; `None` means the adapter does not satisfy `kind`.
pub fn adapter_rank(kind: DeviceKind, device_type: wgpu::DeviceType) -> Option<u8> {
    match kind {
        DeviceKind::Gpu => gpu_rank(device_type),
        DeviceKind::Cpu => (device_type == wgpu::DeviceType::Cpu).then_some(0),
        DeviceKind::Any => gpu_rank(device_type).or(Some(4)),
    }
}

/// Index of the adapter to use for `kind`, or `None` when nothing fits.
pub fn select_adapter(kind: DeviceKind, adapters: &[AdapterSummary]) -> Option<usize> {
    adapters
        .iter()
        .enumerate()
        .filter_map(|(index, adapter)| adapter_rank(kind, adapter.device_type).map(|rank| (rank, index)))
        .min()
        .map(|(_, index)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, device_type: wgpu::DeviceType) -> AdapterSummary {
        AdapterSummary {
            name: name.to_string(),
            device_type,
            backend: wgpu::Backend::Vulkan,
        }
    }

    fn typical_laptop() -> Vec<AdapterSummary> {
        vec![
            adapter("llvmpipe", wgpu::DeviceType::Cpu),
            adapter("Intel UHD", wgpu::DeviceType::IntegratedGpu),
            adapter("RTX 4070", wgpu::DeviceType::DiscreteGpu),
        ]
    }

    #[test]
    fn gpu_prefers_discrete() {
        assert_eq!(select_adapter(DeviceKind::Gpu, &typical_laptop()), Some(2));
    }

    #[test]
    fn cpu_takes_software_adapter() {
        assert_eq!(select_adapter(DeviceKind::Cpu, &typical_laptop()), Some(0));
    }

    #[test]
    fn any_falls_back_to_cpu() {
        let adapters = vec![adapter("lavapipe", wgpu::DeviceType::Cpu)];
        assert_eq!(select_adapter(DeviceKind::Any, &adapters), Some(0));
        assert_eq!(select_adapter(DeviceKind::Gpu, &adapters), None);
    }

    #[test]
    fn cpu_unavailable_on_gpu_only_host() {
        let adapters = vec![adapter("RTX 4070", wgpu::DeviceType::DiscreteGpu)];
        assert_eq!(select_adapter(DeviceKind::Cpu, &adapters), None);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let adapters = vec![
            adapter("first", wgpu::DeviceType::IntegratedGpu),
            adapter("second", wgpu::DeviceType::IntegratedGpu),
        ];
        assert_eq!(select_adapter(DeviceKind::Any, &adapters), Some(0));
    }

    #[test]
    fn no_adapters_selects_nothing() {
        assert_eq!(select_adapter(DeviceKind::Any, &[]), None);
    }
}
