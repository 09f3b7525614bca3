use serde::{Deserialize, Serialize};

pub type GpuDeviceId = i64;

pub const NVIDIA_GPU_VENDOR: &str = "nvidia";

/// A GPU present on a node, as discovered by the container driver's inspection container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub id: GpuDeviceId,
    /// VRAM in megabytes.
    pub vram: u64,
    pub vendor: String,
}

/// A GPU requirement declared by an experiment's resource settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuRequirement {
    pub min_vram: Option<u64>,
    pub vendor: Option<String>,
}

impl GpuRequirement {
    pub fn is_sufficient(&self, device: &GpuDevice) -> bool {
        if let Some(min_vram) = self.min_vram {
            if device.vram < min_vram {
                return false;
            }
        }
        if let Some(vendor) = &self.vendor {
            if vendor != &device.vendor {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("insufficient GPU resources: no device satisfies requirement {0:?}")]
pub struct InsufficientGpuError(pub GpuRequirement);

/// First-fit match of `requirements` against `available`. Each satisfied requirement consumes
/// exactly one device from the pool so a later requirement cannot reuse it.
///
/// Mirrors `match_gpus` from the reference implementation's `gpu_info.py`.
pub fn match_gpus(
    available: &[GpuDevice],
    requirements: &[GpuRequirement],
) -> Result<Vec<GpuDevice>, InsufficientGpuError> {
    let mut pool: Vec<GpuDevice> = available.to_vec();
    let mut matched = Vec::with_capacity(requirements.len());

    for requirement in requirements {
        let position = pool.iter().position(|device| requirement.is_sufficient(device));
        match position {
            Some(index) => matched.push(pool.remove(index)),
            None => return Err(InsufficientGpuError(requirement.clone())),
        }
    }

    Ok(matched)
}
