use candle_core::Device;

/// Loads a device to be used for the model.
/// If `index` is `Some(i)` it will attempt to load the specified CUDA device.
/// When `None` it defaults to CUDA device 0 if available and otherwise falls back
/// to CPU.
pub fn load_device_with(index: Option<usize>) -> candle_core::Result<Device> {
    match index {
        Some(i) => Device::new_cuda(i),
        None => Device::cuda_if_available(0),
    }
}

pub fn load_device() -> candle_core::Result<Device> {
    load_device_with(None)
}

/// Request for a specific device, resolved once at startup.
#[derive(Clone, Debug, Default)]
pub enum DeviceRequest {
    /// Use CUDA if available, otherwise CPU (default behavior).
    #[default]
    Default,
    /// Force CPU even if CUDA is available.
    Cpu,
    /// Select a specific CUDA device by index.
    Cuda(usize),
}

impl DeviceRequest {
    /// Resolve the request into an actual [`Device`].
    pub fn resolve(self) -> candle_core::Result<Device> {
        match self {
            DeviceRequest::Default => load_device(),
            DeviceRequest::Cpu => Ok(Device::Cpu),
            DeviceRequest::Cuda(i) => load_device_with(Some(i)),
        }
    }
}
