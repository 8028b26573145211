//! # us-reconstruct
//!
//! Freehand 3D ultrasound reconstruction: a temporally ordered sequence of
//! tracked 2D B-scan frames is turned into one dense voxel volume using a
//! voxel nearest-neighbour (VNN) fill on a wgpu compute device.
//!
//! The pipeline of a reconstruction:
//!  - Frames are held by a [`FrameStore`], which crops them in-plane and
//!    converts them to grayscale (or angio, keeping only colour flow signal)
//!    on first access.
//!  - Every frame's pose gives three corner points and a plane equation in
//!    output-volume space ([`geometry`]).
//!  - The processed frame stack is uploaded in chunks that respect the
//!    device's buffer limits. The volume is filled in z-slabs that fit one
//!    binding; per slab the kernel runs once per chunk and the slab is read
//!    back into its part of the caller's [`OutputVolume`].
//!
//! Every voxel takes the intensity of the nearest mask-passing pixel among
//! the frame planes within the search distance, measured as point-to-plane
//! distance; voxels with no plane in range stay 0.
//!
//! A CPU implementation of the same fill ([`reference`]) is available for
//! hosts without a usable adapter and to check device results against.
//!
//! # Examples
//!
//! ## Reconstructing a sweep
//!
//! ```no_run
//! # use us_reconstruct::{
//! #     DeviceKind, FrameLoader, InputAggregate, Mask, OutputVolume, TrackingMatrix, reconstruct,
//! # };
//! # use glam::DVec3;
//! # use ndarray::Array3;
//! let frames = Array3::<u8>::from_elem((4, 100, 100), 128);
//! let store = FrameLoader::from_gray_volume(frames, (1.0, 1.0)).expect("valid frames");
//! let poses: Vec<f64> = (0..4)
//!     .flat_map(|i| TrackingMatrix::from_translation(DVec3::new(0.0, 0.0, i as f64)).to_row_major())
//!     .collect();
//! let output = OutputVolume::new((100, 100, 4), (1.0, 1.0, 1.0)).expect("valid volume");
//! let mut input = InputAggregate::new(store, poses, Mask::all_valid(100, 100), output)
//!     .expect("one pose per frame");
//!
//! if reconstruct(&mut input, "kernels/vnn.wgsl", DeviceKind::Gpu, 1.0) {
//!     let volume = input.output.to_array();
//!     println!("centre voxel: {}", volume[[2, 50, 50]]);
//! }
//! ```

mod chunks;
mod compute;
pub mod config;
pub mod device;
pub mod enums;
mod error;
mod filters;
pub mod frame_loader;
pub mod frame_store;
pub mod geometry;
pub mod input;
pub mod reconstruct;
pub mod reference;
pub mod timing;

pub use chunks::{
    ChunkSpan, ChunkedUpload, DEFAULT_CHUNK_COUNT, SlabSpan, plan_chunks, plan_slabs, split_evenly,
};
pub use compute::{
    ComputeContext, KernelArgs, KernelParams, KernelSource, Program, WORKGROUP_SIZE,
    global_work_size, workgroup_grid,
};
pub use config::ReconstructionConfig;
pub use enums::{DeviceKind, FrameFilter};
pub use error::ReconstructError;
pub use frame_loader::{FrameLoader, FrameLoaderError};
pub use frame_store::{CropBox, FrameStore, FrameStoreError};
pub use geometry::{
    GeometryError, PlaneEquation, PlanePoints, PlaneRecord, TrackingMatrix,
    generate_plane_equations, generate_plane_points,
};
pub use input::{InputAggregate, InputError, Mask, OutputVolume};
pub use reconstruct::{ReconstructionReport, Reconstructor, reconstruct};
