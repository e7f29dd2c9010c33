//! Device selection

use crate::config::DeviceConfig;
use candle_core::Device;

/// Resolve the configured device, falling back to CPU when the requested
/// accelerator is unavailable.
pub fn resolve(config: DeviceConfig) -> Device {
    match config {
        DeviceConfig::Cpu => Device::Cpu,
        DeviceConfig::Cuda(idx) => Device::new_cuda(idx).unwrap_or_else(|e| {
            tracing::warn!("CUDA device {} unavailable ({}), using CPU", idx, e);
            Device::Cpu
        }),
        DeviceConfig::Metal => Device::new_metal(0).unwrap_or_else(|e| {
            tracing::warn!("Metal device unavailable ({}), using CPU", e);
            Device::Cpu
        }),
        DeviceConfig::Auto => detect_optimal_device(),
    }
}

/// CUDA first, then Metal, then CPU.
pub fn detect_optimal_device() -> Device {
    if candle_core::utils::cuda_is_available() {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    if candle_core::utils::metal_is_available() {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_resolution() {
        let device = resolve(DeviceConfig::Cpu);
        assert!(matches!(device, Device::Cpu));
        assert_eq!(describe(&device), "CPU");
    }
}
