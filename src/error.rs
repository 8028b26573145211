use std::path::PathBuf;

use thiserror::Error;

use crate::enums::DeviceKind;
use crate::frame_store::FrameStoreError;
use crate::geometry::GeometryError;
use crate::input::InputError;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("no {requested} compute adapter available (found: {available})")]
    DeviceUnavailable {
        requested: DeviceKind,
        available: String,
    },

    #[error("compute device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("cannot read kernel source {path}: {source}")]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel failed to build:\n{log}")]
    Compile { log: String },

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    FrameStore(#[from] FrameStoreError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("{what} needs {required} bytes, the device allows {limit}")]
    ResourceLimit {
        what: &'static str,
        required: u64,
        limit: u64,
    },

    #[error("device I/O failed: {0}")]
    DeviceIo(String),

    #[error("reconstruction cancelled")]
    Cancelled,
}

impl ReconstructError {
    /// Raised before any device resource is allocated; retrying with another
    /// device kind or kernel path may succeed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconstructError::DeviceUnavailable { .. } | ReconstructError::KernelSource { .. }
        )
    }
}
