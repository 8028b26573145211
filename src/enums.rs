use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of compute device a reconstruction runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Software adapters (llvmpipe, lavapipe, WARP).
    #[serde(rename = "CPU")]
    Cpu,
    /// Hardware adapters: discrete, integrated or virtual GPUs.
    #[serde(rename = "GPU")]
    Gpu,
    /// Prefer a GPU, fall back to a CPU adapter.
    #[default]
    #[serde(rename = "ANY")]
    Any,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown device kind {0:?} (expected \"CPU\", \"GPU\" or \"ANY\")")]
pub struct ParseDeviceKindError(pub String);

impl FromStr for DeviceKind {
    type Err = ParseDeviceKindError;

    // Case-sensitive, like the selector strings hosts already pass around.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CPU" => Ok(DeviceKind::Cpu),
            "GPU" => Ok(DeviceKind::Gpu),
            "ANY" => Ok(DeviceKind::Any),
            other => Err(ParseDeviceKindError(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Gpu => write!(f, "GPU"),
            DeviceKind::Any => write!(f, "ANY"),
        }
    }
}

/// Per-frame intensity filter applied after cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFilter {
    #[default]
    Grayscale,
    Angio,
}

impl FrameFilter {
    pub fn from_angio(angio: bool) -> Self {
        if angio {
            FrameFilter::Angio
        } else {
            FrameFilter::Grayscale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_parses_case_sensitive() {
        assert_eq!("CPU".parse::<DeviceKind>(), Ok(DeviceKind::Cpu));
        assert_eq!("GPU".parse::<DeviceKind>(), Ok(DeviceKind::Gpu));
        assert!("gpu".parse::<DeviceKind>().is_err());
        assert!("".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn device_kind_display_round_trips() {
        for kind in [DeviceKind::Cpu, DeviceKind::Gpu, DeviceKind::Any] {
            assert_eq!(kind.to_string().parse::<DeviceKind>(), Ok(kind));
        }
    }
}
