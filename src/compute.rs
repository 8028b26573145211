use std::borrow::Cow;
use std::path::Path;

use wgpu::{PollType, util::DeviceExt};

use crate::chunks::{ChunkSpan, ChunkedUpload, SlabSpan};
use crate::device::{AdapterSummary, select_adapter};
use crate::enums::DeviceKind;
use crate::error::ReconstructError;
use crate::geometry::PlaneRecord;

/// Invocations per workgroup; must match `@workgroup_size` in the kernel.
pub const WORKGROUP_SIZE: u32 = 256;

/// 1-D work size covering every output column `(x, z)`, rounded up to
/// whole workgroups.
pub fn global_work_size(out_width: u32, out_depth: u32) -> u64 {
    let columns = out_width as u64 * out_depth as u64;
    columns.div_ceil(WORKGROUP_SIZE as u64) * WORKGROUP_SIZE as u64
}

/// Fold `groups` workgroups into an `(x, y)` grid that respects the
/// per-dimension dispatch limit. The kernel linearises the grid again.
pub fn workgroup_grid(groups: u64, max_per_dimension: u32) -> Option<(u32, u32)> {
    let max = max_per_dimension.max(1) as u64;
    let x = groups.clamp(1, max);
    let y = groups.div_ceil(x).max(1);
    (y <= max).then_some((x as u32, y as u32))
}

/// WGSL source of the reconstruction kernel.
#[derive(Debug, Clone)]
pub struct KernelSource {
    origin: String,
    text: String,
}

impl KernelSource {
    pub fn builtin() -> Self {
        Self::from_text("vnn.wgsl", include_str!("shaders/vnn.wgsl"))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReconstructError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ReconstructError::KernelSource {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(path.display().to_string(), text))
    }

    pub fn from_text(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelParams {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Planes in the plane buffer; passes never read frames past it.
    pub frame_count: u32,
    pub _pad: u32,
    pub out_dims: [u32; 4],
    /// Voxel spacing in xyz, search distance in w.
    pub out_spacing: [f32; 4],
}

const _: () = assert!(core::mem::size_of::<KernelParams>() == 48);

/// Frames and output slices covered by one compute pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct PassInfo {
    first_frame: u32,
    frame_count: u32,
    z_offset: u32,
    slab_depth: u32,
}

const _: () = assert!(core::mem::size_of::<PassInfo>() == 16);

impl PassInfo {
    fn new(chunk: ChunkSpan, slab: SlabSpan) -> Self {
        Self {
            first_frame: chunk.first_frame as u32,
            frame_count: chunk.frame_count as u32,
            z_offset: slab.first_z as u32,
            slab_depth: slab.depth as u32,
        }
    }
}

/// Fixed kernel arguments shared by every chunk pass.
pub struct KernelArgs<'a> {
    pub mask: &'a [u8],
    pub planes: &'a [PlaneRecord],
    pub params: KernelParams,
}

impl KernelArgs<'_> {
    fn out_dims(&self) -> (u32, u32, u32) {
        let [dx, dy, dz, _] = self.params.out_dims;
        (dx, dy, dz)
    }
}

/// Compiled reconstruction kernel.
pub struct Program {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// Inputs shared by every slab; destroyed together when dropped.
struct SharedBuffers {
    params: wgpu::Buffer,
    mask: wgpu::Buffer,
    planes: wgpu::Buffer,
}

impl Drop for SharedBuffers {
    fn drop(&mut self) {
        self.params.destroy();
        self.mask.destroy();
        self.planes.destroy();
    }
}

/// Output buffers of one slab plus one pass uniform per frame chunk.
struct SlabBuffers {
    volume: wgpu::Buffer,
    best_distance: wgpu::Buffer,
    staging: wgpu::Buffer,
    passes: Vec<wgpu::Buffer>,
}

impl Drop for SlabBuffers {
    fn drop(&mut self) {
        for buffer in [&self.volume, &self.best_distance, &self.staging]
            .into_iter()
            .chain(&self.passes)
        {
            buffer.destroy();
        }
    }
}

/// Compute device, context and queue for one reconstruction.
pub struct ComputeContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: AdapterSummary,
    // Dropped after the device and queue.
    _instance: wgpu::Instance,
}

impl ComputeContext {
    pub async fn new(kind: DeviceKind) -> Result<Self, ReconstructError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let summaries: Vec<AdapterSummary> = adapters
            .iter()
            .map(|adapter| AdapterSummary::from(&adapter.get_info()))
            .collect();
        for summary in &summaries {
            log::debug!("found compute adapter {summary}");
        }

        let index = select_adapter(kind, &summaries).ok_or_else(|| {
            let available = if summaries.is_empty() {
                "none".to_string()
            } else {
                summaries
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            ReconstructError::DeviceUnavailable {
                requested: kind,
                available,
            }
        })?;
        let adapter = &adapters[index];

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("us-reconstruct"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await?;

        let adapter = summaries[index].clone();
        log::info!("using compute adapter {adapter}");
        Ok(Self {
            device,
            queue,
            adapter,
            _instance: instance,
        })
    }

    pub fn adapter(&self) -> &AdapterSummary {
        &self.adapter
    }

    /// Largest frame chunk a single storage binding can hold.
    pub fn max_chunk_bytes(&self) -> u64 {
        let limits = self.device.limits();
        (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size)
    }

    /// Compile the kernel. Build problems come back as
    /// [`ReconstructError::Compile`] carrying the compiler log.
    pub async fn build_program(&self, source: &KernelSource) -> Result<Program, ReconstructError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.origin()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.text())),
            });
        let info = shader.get_compilation_info().await;

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("VNN Bind Group Layout"),
                    entries: &[
                        uniform_entry(0),
                        uniform_entry(1),
                        storage_entry(2, true),
                        storage_entry(3, true),
                        storage_entry(4, true),
                        storage_entry(5, false),
                        storage_entry(6, false),
                    ],
                });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("VNN Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("VNN Pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        let error = self.device.pop_error_scope().await;
        let has_errors = info
            .messages
            .iter()
            .any(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error));
        if error.is_some() || has_errors {
            let mut log = build_log(&info);
            if let Some(error) = error {
                if !log.is_empty() {
                    log.push('\n');
                }
                log.push_str(&error.to_string());
            }
            log::error!("kernel {} failed to build:\n{log}", source.origin());
            return Err(ReconstructError::Compile { log });
        }

        Ok(Program {
            pipeline,
            bind_group_layout,
        })
    }

    /// Upload the frame stack as one read-only buffer per chunk.
    pub async fn upload_chunks(
        &self,
        frames: &[u8],
        frame_bytes: usize,
        plan: &[ChunkSpan],
    ) -> Result<ChunkedUpload, ReconstructError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let upload = ChunkedUpload::upload(&self.device, frames, frame_bytes, plan);
        if let Some(error) = self.device.pop_error_scope().await {
            return Err(ReconstructError::DeviceIo(format!("frame upload failed: {error}")));
        }
        Ok(upload)
    }

    /// Largest output slab, in bytes of `u32` voxels, one binding can hold.
    pub fn max_slab_bytes(&self) -> u64 {
        self.max_chunk_bytes()
    }

    /// Fill the volume slab by slab: each slab runs the kernel over every
    /// chunk in frame order, then blocks until its slices are read back into
    /// their part of `output` (one byte per voxel).
    pub async fn dispatch_and_readback(
        &self,
        program: &Program,
        args: &KernelArgs<'_>,
        upload: &ChunkedUpload,
        slabs: &[SlabSpan],
        output: &mut [u8],
    ) -> Result<(), ReconstructError> {
        let (dx, dy, dz) = args.out_dims();
        let (dx, dy, dz) = (dx as usize, dy as usize, dz as usize);
        if output.len() != dx * dy * dz {
            return Err(ReconstructError::DeviceIo(format!(
                "output holds {} voxels, kernel writes {}",
                output.len(),
                dx * dy * dz
            )));
        }
        if slabs.iter().map(|slab| slab.depth).sum::<usize>() != dz {
            return Err(ReconstructError::DeviceIo(format!(
                "slab plan does not cover {dz} output slices"
            )));
        }

        let shared = self.create_shared_buffers(args);
        for slab in slabs {
            let start = slab.first_z * dx * dy;
            let end = start + slab.voxel_count(dx, dy);
            self.dispatch_slab(program, &shared, upload, *slab, (dx, dy), &mut output[start..end])
                .await?;
        }
        Ok(())
    }

    async fn dispatch_slab(
        &self,
        program: &Program,
        shared: &SharedBuffers,
        upload: &ChunkedUpload,
        slab: SlabSpan,
        (dx, dy): (usize, usize),
        output: &mut [u8],
    ) -> Result<(), ReconstructError> {
        let limits = self.device.limits();
        let slab_bytes = (slab.voxel_count(dx, dy) * std::mem::size_of::<u32>()) as u64;
        let binding_limit = self.max_slab_bytes();
        if slab_bytes > binding_limit {
            return Err(ReconstructError::ResourceLimit {
                what: "an output slab",
                required: slab_bytes,
                limit: binding_limit,
            });
        }
        let groups = global_work_size(dx as u32, slab.depth as u32) / WORKGROUP_SIZE as u64;
        let max_groups = limits.max_compute_workgroups_per_dimension;
        let (groups_x, groups_y) =
            workgroup_grid(groups, max_groups).ok_or(ReconstructError::ResourceLimit {
                what: "the dispatch grid",
                required: groups,
                limit: max_groups as u64 * max_groups as u64,
            })?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let buffers = self.create_slab_buffers(upload, slab, slab_bytes);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("VNN Encoder"),
            });
        for (chunk, pass_info) in upload.chunks().iter().zip(&buffers.passes) {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("VNN Bind Group"),
                layout: &program.bind_group_layout,
                entries: &[
                    bind(0, &shared.params),
                    bind(1, pass_info),
                    bind(2, &shared.mask),
                    bind(3, &shared.planes),
                    bind(4, &chunk.buffer),
                    bind(5, &buffers.volume),
                    bind(6, &buffers.best_distance),
                ],
            });
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("VNN Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&program.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&buffers.volume, 0, &buffers.staging, 0, slab_bytes);
        let submission = self.queue.submit(Some(encoder.finish()));

        let validation = self.device.pop_error_scope().await;
        let out_of_memory = self.device.pop_error_scope().await;
        if let Some(error) = validation.or(out_of_memory) {
            return Err(ReconstructError::DeviceIo(format!("kernel dispatch failed: {error}")));
        }

        let buffer_slice = buffers.staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| ReconstructError::DeviceIo(format!("device poll failed: {e}")))?;
        receiver
            .await
            .map_err(|_| ReconstructError::DeviceIo("read-back was cancelled".into()))?
            .map_err(|e| ReconstructError::DeviceIo(format!("read-back failed: {e}")))?;

        {
            let data = buffer_slice.get_mapped_range();
            let words: &[u32] = bytemuck::cast_slice(&data);
            for (voxel, &word) in output.iter_mut().zip(words) {
                *voxel = word as u8;
            }
        }
        buffers.staging.unmap();
        Ok(())
    }

    fn create_shared_buffers(&self, args: &KernelArgs<'_>) -> SharedBuffers {
        let mut mask = args.mask.to_vec();
        mask.resize(mask.len().next_multiple_of(4).max(4), 0);

        SharedBuffers {
            params: self.init_buffer(
                "Params Buffer",
                bytemuck::bytes_of(&args.params),
                wgpu::BufferUsages::UNIFORM,
            ),
            mask: self.init_buffer("Mask Buffer", &mask, wgpu::BufferUsages::STORAGE),
            planes: self.init_buffer(
                "Plane Buffer",
                bytemuck::cast_slice(args.planes),
                wgpu::BufferUsages::STORAGE,
            ),
        }
    }

    fn create_slab_buffers(
        &self,
        upload: &ChunkedUpload,
        slab: SlabSpan,
        slab_bytes: u64,
    ) -> SlabBuffers {
        let empty = |label: &str, usage: wgpu::BufferUsages| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: slab_bytes,
                usage,
                mapped_at_creation: false,
            })
        };

        SlabBuffers {
            volume: empty(
                "Volume Buffer",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            ),
            best_distance: empty("Distance Buffer", wgpu::BufferUsages::STORAGE),
            staging: empty(
                "Staging Buffer",
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
            passes: upload
                .chunks()
                .iter()
                .map(|chunk| {
                    self.init_buffer(
                        "Pass Info Buffer",
                        bytemuck::bytes_of(&PassInfo::new(chunk.span, slab)),
                        wgpu::BufferUsages::UNIFORM,
                    )
                })
                .collect(),
        }
    }

    fn init_buffer(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bind(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn build_log(info: &wgpu::CompilationInfo) -> String {
    info.messages
        .iter()
        .map(|m| match &m.location {
            Some(location) => format!(
                "{:?} at {}:{}: {}",
                m.message_type, location.line_number, location.line_position, m.message
            ),
            None => format!("{:?}: {}", m.message_type, m.message),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_size_rounds_up_to_workgroups() {
        assert_eq!(global_work_size(100, 4), 512);
        assert_eq!(global_work_size(16, 16), 256);
        assert_eq!(global_work_size(1, 1), 256);
    }

    #[test]
    fn grid_folds_large_dispatches() {
        assert_eq!(workgroup_grid(2, 65535), Some((2, 1)));
        assert_eq!(workgroup_grid(70000, 65535), Some((65535, 2)));
        assert_eq!(workgroup_grid(10, 3), None);
    }

    #[test]
    fn pass_info_carries_chunk_and_slab() {
        let info = PassInfo::new(
            ChunkSpan {
                first_frame: 9,
                frame_count: 2,
            },
            SlabSpan {
                first_z: 65,
                depth: 64,
            },
        );
        assert_eq!(bytemuck::cast::<PassInfo, [u32; 4]>(info), [9, 2, 65, 64]);
    }

    #[test]
    fn builtin_kernel_declares_entry_point() {
        let source = KernelSource::builtin();
        assert!(source.text().contains("fn main("));
        assert!(source.text().contains("@workgroup_size(256, 1, 1)"));
        assert!(source.text().contains("pass_info.z_offset"));
        assert!(source.text().contains("params.frame_count"));
    }

    #[test]
    fn missing_kernel_file_is_a_configuration_error() {
        let err = KernelSource::from_path("/nonexistent/vnn.wgsl").unwrap_err();
        assert!(err.is_configuration());
    }

    fn context(kind: DeviceKind) -> ComputeContext {
        futures::executor::block_on(ComputeContext::new(kind)).expect("compute adapter")
    }

    #[test]
    #[ignore = "requires a wgpu adapter"]
    fn builtin_kernel_compiles() {
        let ctx = context(DeviceKind::Any);
        futures::executor::block_on(ctx.build_program(&KernelSource::builtin()))
            .expect("built-in kernel should compile");
    }

    #[test]
    #[ignore = "requires a wgpu adapter"]
    fn broken_kernel_reports_log() {
        let ctx = context(DeviceKind::Any);
        let source = KernelSource::from_text("broken.wgsl", "fn main( {");
        match futures::executor::block_on(ctx.build_program(&source)) {
            Err(ReconstructError::Compile { log }) => assert!(!log.is_empty()),
            Err(other) => panic!("expected compile error, got {other}"),
            Ok(_) => panic!("broken kernel compiled"),
        }
    }
}
