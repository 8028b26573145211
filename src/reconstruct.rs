use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;

use crate::chunks::{plan_chunks, plan_slabs};
use crate::compute::{ComputeContext, KernelArgs, KernelParams, KernelSource};
use crate::config::ReconstructionConfig;
use crate::enums::DeviceKind;
use crate::error::ReconstructError;
use crate::geometry::{
    PlaneRecord, generate_plane_equations, generate_plane_points, parse_tracking_matrices,
};
use crate::input::{InputAggregate, InputError};
use crate::reference::{FrameStack, reconstruct_reference};
use crate::timing::{StageTimer, TimingReport};

/// What a successful reconstruction used and how long it took.
#[derive(Debug, Clone)]
pub struct ReconstructionReport {
    pub adapter: String,
    pub frame_count: usize,
    pub chunk_count: usize,
    /// Output z-slabs filled one after another.
    pub slab_count: usize,
    pub timings: TimingReport,
}

/// Fill `input.output` from the tracked frames in `input`.
///
/// Returns `false` on any failure, after logging it; the output buffer is
/// undefined in that case.
pub fn reconstruct(
    input: &mut InputAggregate,
    kernel_source_path: impl AsRef<Path>,
    device_kind: DeviceKind,
    search_distance: f64,
) -> bool {
    let config = ReconstructionConfig {
        device: device_kind,
        search_distance,
        kernel_path: Some(kernel_source_path.as_ref().to_path_buf()),
        ..Default::default()
    };
    Reconstructor::new(config).reconstruct(input)
}

/// Runs reconstructions with one configuration.
///
/// Each call opens its own compute context and releases every device
/// resource before returning.
pub struct Reconstructor {
    config: ReconstructionConfig,
    cancel: Arc<AtomicBool>,
}

impl Reconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Setting this flag aborts the running reconstruction after the frame
    /// upload, before the kernel is dispatched. Every call clears it when it
    /// returns, whether it was honoured or not.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn reconstruct(&self, input: &mut InputAggregate) -> bool {
        match self.try_reconstruct(input) {
            Ok(report) => {
                log::info!(
                    "reconstructed {} frames on {} in {} chunks, {} slabs: {}",
                    report.frame_count,
                    report.adapter,
                    report.chunk_count,
                    report.slab_count,
                    report.timings
                );
                true
            }
            Err(e) => {
                log::error!("reconstruction failed: {e}");
                false
            }
        }
    }

    pub fn try_reconstruct(
        &self,
        input: &mut InputAggregate,
    ) -> Result<ReconstructionReport, ReconstructError> {
        futures::executor::block_on(self.reconstruct_async(input))
    }

    pub async fn reconstruct_async(
        &self,
        input: &mut InputAggregate,
    ) -> Result<ReconstructionReport, ReconstructError> {
        let result = self.run_on_device(input).await;
        self.cancel.store(false, Ordering::Release);
        result
    }

    async fn run_on_device(
        &self,
        input: &mut InputAggregate,
    ) -> Result<ReconstructionReport, ReconstructError> {
        let mut timer = StageTimer::new();

        timer.start("kernel source");
        let kernel = match &self.config.kernel_path {
            Some(path) => KernelSource::from_path(path)?,
            None => KernelSource::builtin(),
        };

        timer.start("geometry");
        let planes = self.prepare(input)?;
        let (width, height, frame_count) = input.frame_data.dimensions();
        let (dx, dy, dz) = input.output.dims();
        let (sx, sy, sz) = input.output.spacing();
        let params = KernelParams {
            frame_width: width as u32,
            frame_height: height as u32,
            frame_count: frame_count as u32,
            _pad: 0,
            out_dims: [dx as u32, dy as u32, dz as u32, 0],
            out_spacing: [
                sx as f32,
                sy as f32,
                sz as f32,
                self.config.search_distance as f32,
            ],
        };

        timer.start("device");
        let context = ComputeContext::new(self.config.device).await?;
        let program = context.build_program(&kernel).await?;

        timer.start("frames");
        let frames = input.frame_data.frames();

        timer.start("upload");
        let frame_bytes = width * height;
        let plan = plan_chunks(
            frame_count,
            frame_bytes,
            self.config.chunk_count,
            context.max_chunk_bytes(),
        )?;
        let upload = context.upload_chunks(frames, frame_bytes, &plan).await?;

        if self.cancel.load(Ordering::Acquire) {
            log::info!("reconstruction cancelled before dispatch");
            return Err(ReconstructError::Cancelled);
        }

        timer.start("dispatch");
        let slabs = plan_slabs((dx, dy, dz), context.max_slab_bytes())?;
        let args = KernelArgs {
            mask: input.mask.as_slice(),
            planes: &planes,
            params,
        };
        context
            .dispatch_and_readback(&program, &args, &upload, &slabs, input.output.as_mut_slice())
            .await?;
        drop(upload);

        let report = ReconstructionReport {
            adapter: context.adapter().to_string(),
            frame_count,
            chunk_count: plan.len(),
            slab_count: slabs.len(),
            timings: timer.report(),
        };
        log::debug!("stage timings: {}", report.timings);
        Ok(report)
    }

    /// Same result as [`Reconstructor::try_reconstruct`], computed on the
    /// host without a compute device.
    pub fn reconstruct_on_host(
        &self,
        input: &mut InputAggregate,
    ) -> Result<ReconstructionReport, ReconstructError> {
        let mut timer = StageTimer::new();

        timer.start("geometry");
        let planes = self.prepare(input)?;
        let (width, height, frame_count) = input.frame_data.dimensions();

        timer.start("fill");
        let frames = FrameStack {
            pixels: input.frame_data.frames(),
            width,
            height,
        };
        reconstruct_reference(
            &frames,
            &input.mask,
            &planes,
            self.config.search_distance as f32,
            &mut input.output,
        );

        Ok(ReconstructionReport {
            adapter: "host".to_string(),
            frame_count,
            chunk_count: 1,
            slab_count: 1,
            timings: timer.report(),
        })
    }

    /// Validate `input` and derive one plane per active frame.
    fn prepare(&self, input: &InputAggregate) -> Result<Vec<PlaneRecord>, ReconstructError> {
        let search_distance = self.config.search_distance;
        if !search_distance.is_finite() || search_distance <= 0.0 {
            return Err(InputError::SearchDistance(search_distance).into());
        }
        let (width, height, frame_count) = input.frame_data.dimensions();
        if frame_count == 0 {
            return Err(InputError::NoFrames.into());
        }
        input.validate_tracking()?;
        input.validate_mask()?;

        let matrices = parse_tracking_matrices(&input.tracking_matrices)?;
        let (sx, sy, _) = input.frame_data.spacing();
        let (crop_x, crop_y) = input.frame_data.crop_origin();
        let crop_offset = DVec3::new(crop_x as f64 * sx, crop_y as f64 * sy, 0.0);
        let active: Vec<_> = input
            .frame_data
            .active_indices()
            .iter()
            .map(|&original| matrices[original].with_pixel_offset(crop_offset))
            .collect();

        let points = generate_plane_points(&active, width, height, sx, sy);
        let equations = generate_plane_equations(&points)?;
        Ok(points
            .iter()
            .zip(&equations)
            .map(|(p, e)| PlaneRecord::new(p, e))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_loader::FrameLoader;
    use crate::frame_store::CropBox;
    use crate::geometry::TrackingMatrix;
    use crate::input::{Mask, OutputVolume};
    use ndarray::Array3;

    fn translated_poses(z_offsets: &[f64]) -> Vec<f64> {
        z_offsets
            .iter()
            .flat_map(|&z| TrackingMatrix::from_translation(DVec3::new(0.0, 0.0, z)).to_row_major())
            .collect()
    }

    fn input_with_poses(frames: Array3<u8>, poses: Vec<f64>, dims: (usize, usize, usize)) -> InputAggregate {
        let (_, height, width) = frames.dim();
        let store = FrameLoader::from_gray_volume(frames, (1.0, 1.0)).unwrap();
        InputAggregate::new(
            store,
            poses,
            Mask::all_valid(width, height),
            OutputVolume::new(dims, (1.0, 1.0, 1.0)).unwrap(),
        )
        .unwrap()
    }

    fn host(search_distance: f64) -> Reconstructor {
        Reconstructor::new(ReconstructionConfig {
            search_distance,
            ..Default::default()
        })
    }

    #[test]
    fn stacked_frames_fill_their_slices() {
        let frames = Array3::from_shape_fn((3, 4, 4), |(f, _, _)| (f as u8 + 1) * 10);
        let mut input = input_with_poses(frames, translated_poses(&[0.0, 1.0, 2.0]), (4, 4, 3));
        host(0.5).reconstruct_on_host(&mut input).unwrap();
        for z in 0..3 {
            assert_eq!(input.output.voxel(2, 2, z), (z as u8 + 1) * 10);
        }
    }

    #[test]
    fn removed_frame_drops_its_pose() {
        let frames = Array3::from_shape_fn((3, 4, 4), |(f, _, _)| (f as u8 + 1) * 10);
        let mut input = input_with_poses(frames, translated_poses(&[0.0, 1.0, 2.0]), (4, 4, 3));
        input.remove_frame(1).unwrap();
        host(0.5).reconstruct_on_host(&mut input).unwrap();
        assert_eq!(input.output.voxel(1, 1, 0), 10);
        assert_eq!(input.output.voxel(1, 1, 1), 0);
        assert_eq!(input.output.voxel(1, 1, 2), 30);
    }

    #[test]
    fn crop_keeps_frame_position() {
        let frames = Array3::from_shape_fn((1, 4, 4), |(_, y, x)| (y * 4 + x) as u8);
        let mut input = input_with_poses(frames, translated_poses(&[0.0]), (4, 4, 1));
        input.frame_data.set_crop_box(CropBox::new((1, 2), (1, 2), (0, 0)));
        input.mask = Mask::all_valid(2, 2);
        host(0.5).reconstruct_on_host(&mut input).unwrap();
        assert_eq!(input.output.voxel(1, 1, 0), 5);
        assert_eq!(input.output.voxel(2, 2, 0), 10);
        assert_eq!(input.output.voxel(0, 0, 0), 0);
        assert_eq!(input.output.voxel(3, 3, 0), 0);
    }

    #[test]
    fn mask_must_match_processed_frames() {
        let frames = Array3::<u8>::zeros((1, 4, 4));
        let mut input = input_with_poses(frames, translated_poses(&[0.0]), (4, 4, 1));
        input.frame_data.set_crop_box(CropBox::new((0, 1), (0, 1), (0, 0)));
        assert!(matches!(
            host(1.0).reconstruct_on_host(&mut input),
            Err(ReconstructError::Input(InputError::MaskShape { .. }))
        ));
    }

    #[test]
    fn degenerate_pose_fails_reconstruction() {
        let frames = Array3::<u8>::zeros((1, 4, 4));
        let mut poses = translated_poses(&[0.0]);
        // Collapse the frame's y axis onto its x axis.
        poses[1] = 1.0;
        poses[5] = 0.0;
        let mut input = input_with_poses(frames, poses, (4, 4, 1));
        assert!(matches!(
            host(1.0).reconstruct_on_host(&mut input),
            Err(ReconstructError::Geometry(_))
        ));
    }

    #[test]
    fn invalid_search_distance_is_rejected() {
        let frames = Array3::<u8>::zeros((1, 2, 2));
        let mut input = input_with_poses(frames, translated_poses(&[0.0]), (2, 2, 1));
        assert!(matches!(
            host(-1.0).reconstruct_on_host(&mut input),
            Err(ReconstructError::Input(InputError::SearchDistance(_)))
        ));
    }

    #[test]
    fn failed_call_clears_cancel_flag() {
        let frames = Array3::<u8>::zeros((1, 2, 2));
        let mut input = input_with_poses(frames, translated_poses(&[0.0]), (2, 2, 1));
        let reconstructor = Reconstructor::new(ReconstructionConfig {
            kernel_path: Some("/nonexistent/vnn.wgsl".into()),
            ..Default::default()
        });
        let cancel = reconstructor.cancel_flag();
        cancel.store(true, Ordering::Release);
        assert!(matches!(
            reconstructor.try_reconstruct(&mut input),
            Err(ReconstructError::KernelSource { .. })
        ));
        assert!(!cancel.load(Ordering::Acquire));
    }

    #[test]
    fn missing_kernel_file_reports_false() {
        let frames = Array3::<u8>::zeros((1, 2, 2));
        let mut input = input_with_poses(frames, translated_poses(&[0.0]), (2, 2, 1));
        assert!(!reconstruct(&mut input, "/nonexistent/vnn.wgsl", DeviceKind::Any, 1.0));
    }
}
