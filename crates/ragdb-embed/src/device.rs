use candle_core::Device;
use tracing::info;

/// Metal when the `metal` feature is on and a GPU is present, CPU otherwise.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { info!("sentence encoder device: Metal (MPS)"); return dev; }
    }
    info!("sentence encoder device: CPU");
    Device::Cpu
}
