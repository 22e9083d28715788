use candle_core::{DType, Device as CandleDevice};

/// A compute device, other than the host cpu, that a model can be placed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accelerator {
    /// A CUDA capable gpu with the given ordinal.
    Cuda(usize),
}

/// The device a model is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu(usize),
}

/// The floating point width used for model weights and inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    F16,
    F32,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::F16 => "float16",
            Precision::F32 => "float32",
        }
    }

    /// Returns the candle dtype matching this precision.
    pub fn dtype(&self) -> DType {
        match self {
            Precision::F16 => DType::F16,
            Precision::F32 => DType::F32,
        }
    }
}

/// The device and precision pair a model is loaded with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeProfile {
    pub device: Device,
    pub precision: Precision,
}

impl RuntimeProfile {
    /// Host cpu with 32-bit floats.
    pub const CPU: RuntimeProfile = RuntimeProfile {
        device: Device::Cpu,
        precision: Precision::F32,
    };

    /// Creates the candle device for this profile.
    pub fn device(&self) -> candle_core::Result<CandleDevice> {
        match self.device {
            Device::Cpu => Ok(CandleDevice::Cpu),
            Device::Gpu(ordinal) => CandleDevice::new_cuda(ordinal),
        }
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }
}

impl std::fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.device {
            Device::Cpu => write!(f, "cpu ({})", self.precision.as_str()),
            Device::Gpu(ordinal) => write!(f, "cuda:{ordinal} ({})", self.precision.as_str()),
        }
    }
}

/// Picks the runtime profile for the given set of available accelerators.
///
/// The first gpu wins and runs in half precision. Without any accelerator the
/// model runs on the cpu in single precision.
pub fn select_runtime_profile(available: &[Accelerator]) -> RuntimeProfile {
    match available.first() {
        Some(Accelerator::Cuda(ordinal)) => RuntimeProfile {
            device: Device::Gpu(*ordinal),
            precision: Precision::F16,
        },
        None => RuntimeProfile::CPU,
    }
}

/// Lists the accelerators usable by this build.
///
/// Only the first CUDA ordinal is checked. Always empty unless the crate is
/// compiled with the `cuda` feature.
pub fn detect_accelerators() -> Vec<Accelerator> {
    match CandleDevice::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => vec![Accelerator::Cuda(0)],
        Ok(_) => Vec::new(),
        Err(e) => {
            log::warn!("CUDA not available, defaulting to CPU: {e}");
            Vec::new()
        }
    }
}
