use wgpu::util::DeviceExt;

use crate::error::ReconstructError;

/// Chunk count used when the configuration does not say otherwise.
pub const DEFAULT_CHUNK_COUNT: usize = 10;

/// A contiguous run of active frames uploaded as one device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub first_frame: usize,
    pub frame_count: usize,
}

impl ChunkSpan {
    pub fn byte_len(&self, frame_bytes: usize) -> usize {
        self.frame_count * frame_bytes
    }

    /// Buffer size on the device: storage buffers are read as `u32` words.
    pub fn padded_byte_len(&self, frame_bytes: usize) -> usize {
        self.byte_len(frame_bytes).next_multiple_of(4)
    }
}

/// Split `frame_count` frames into `chunk_count` contiguous spans.
///
/// Each span gets `frame_count / chunk_count` frames and the remainder is
/// handed out one frame at a time from the first span on, so no two spans
/// differ by more than one frame.
pub fn split_evenly(frame_count: usize, chunk_count: usize) -> Vec<ChunkSpan> {
    let chunk_count = chunk_count.max(1);
    let base = frame_count / chunk_count;
    let remainder = frame_count % chunk_count;
    let mut first_frame = 0;
    (0..chunk_count)
        .map(|chunk| {
            let frame_count = base + usize::from(chunk < remainder);
            let span = ChunkSpan {
                first_frame,
                frame_count,
            };
            first_frame += frame_count;
            span
        })
        .collect()
}

/// Choose chunk spans for the frame stack.
///
/// Starts from `requested` chunks (never more than there are frames) and adds
/// chunks until the largest one fits in `max_chunk_bytes`.
pub fn plan_chunks(
    frame_count: usize,
    frame_bytes: usize,
    requested: usize,
    max_chunk_bytes: u64,
) -> Result<Vec<ChunkSpan>, ReconstructError> {
    if frame_count == 0 {
        return Err(crate::input::InputError::NoFrames.into());
    }
    let single_frame = (frame_bytes as u64).next_multiple_of(4);
    if single_frame > max_chunk_bytes {
        return Err(ReconstructError::ResourceLimit {
            what: "a single frame",
            required: single_frame,
            limit: max_chunk_bytes,
        });
    }

    let mut chunk_count = requested.clamp(1, frame_count);
    loop {
        let largest = frame_count.div_ceil(chunk_count);
        if ((largest * frame_bytes) as u64).next_multiple_of(4) <= max_chunk_bytes {
            break;
        }
        chunk_count += 1;
    }
    if chunk_count != requested {
        log::debug!("using {chunk_count} frame chunks ({requested} requested, {frame_count} frames)");
    }
    Ok(split_evenly(frame_count, chunk_count))
}

/// A run of output z-slices filled and read back as one device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabSpan {
    pub first_z: usize,
    pub depth: usize,
}

impl SlabSpan {
    pub fn voxel_count(&self, width: usize, height: usize) -> usize {
        width * height * self.depth
    }
}

/// Split the output volume along z so that each slab's `u32` voxel buffer
/// fits in `max_slab_bytes`. Slabs differ in depth by at most one slice.
pub fn plan_slabs(
    dims: (usize, usize, usize),
    max_slab_bytes: u64,
) -> Result<Vec<SlabSpan>, ReconstructError> {
    let (dx, dy, dz) = dims;
    let slice_bytes = (dx * dy * std::mem::size_of::<u32>()) as u64;
    if slice_bytes > max_slab_bytes {
        return Err(ReconstructError::ResourceLimit {
            what: "a single output slice",
            required: slice_bytes,
            limit: max_slab_bytes,
        });
    }
    let depth_per_slab = (max_slab_bytes / slice_bytes.max(1)).max(1) as usize;
    let slab_count = dz.div_ceil(depth_per_slab).max(1);
    if slab_count > 1 {
        log::debug!("splitting {dz} output slices into {slab_count} slabs");
    }
    Ok(split_evenly(dz, slab_count)
        .into_iter()
        .map(|span| SlabSpan {
            first_z: span.first_frame,
            depth: span.frame_count,
        })
        .collect())
}

/// Bytes of the frames in `span`, zero-padded to a whole number of words.
pub fn pack_chunk(frames: &[u8], frame_bytes: usize, span: ChunkSpan) -> Vec<u8> {
    let start = span.first_frame * frame_bytes;
    let mut packed = Vec::with_capacity(span.padded_byte_len(frame_bytes));
    packed.extend_from_slice(&frames[start..start + span.byte_len(frame_bytes)]);
    packed.resize(span.padded_byte_len(frame_bytes), 0);
    packed
}

pub struct DeviceChunk {
    pub span: ChunkSpan,
    pub buffer: wgpu::Buffer,
}

/// Read-only storage buffers holding the frame stack, one per chunk.
///
/// Buffers are destroyed when this is dropped, on success and failure alike.
pub struct ChunkedUpload {
    chunks: Vec<DeviceChunk>,
}

impl ChunkedUpload {
    pub(crate) fn upload(
        device: &wgpu::Device,
        frames: &[u8],
        frame_bytes: usize,
        plan: &[ChunkSpan],
    ) -> Self {
        let mut chunks = Vec::with_capacity(plan.len());
        for (index, span) in plan.iter().enumerate() {
            let contents = pack_chunk(frames, frame_bytes, *span);
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("Frame Chunk {index}")),
                contents: &contents,
                usage: wgpu::BufferUsages::STORAGE,
            });
            chunks.push(DeviceChunk {
                span: *span,
                buffer,
            });
        }
        Self { chunks }
    }

    pub fn chunks(&self) -> &[DeviceChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Drop for ChunkedUpload {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            chunk.buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_goes_to_first_chunks() {
        let spans = split_evenly(23, 10);
        let counts: Vec<usize> = spans.iter().map(|s| s.frame_count).collect();
        assert_eq!(counts, vec![3, 3, 3, 2, 2, 2, 2, 2, 2, 2]);
        assert_eq!(spans[3].first_frame, 9);
        assert_eq!(spans[9].first_frame, 21);
    }

    #[test]
    fn spans_are_contiguous() {
        let spans = split_evenly(17, 4);
        let mut next = 0;
        for span in &spans {
            assert_eq!(span.first_frame, next);
            next += span.frame_count;
        }
        assert_eq!(next, 17);
    }

    #[test]
    fn plan_never_makes_empty_chunks() {
        let spans = plan_chunks(4, 100, DEFAULT_CHUNK_COUNT, u64::MAX).unwrap();
        assert_eq!(spans.len(), 4);
        assert!(spans.iter().all(|s| s.frame_count == 1));
    }

    #[test]
    fn plan_grows_to_fit_device_limit() {
        // 10 frames of 1000 bytes, at most 2 frames per buffer.
        let spans = plan_chunks(10, 1000, 2, 2000).unwrap();
        assert_eq!(spans.len(), 5);
        assert!(spans.iter().all(|s| s.byte_len(1000) <= 2000));
    }

    #[test]
    fn plan_rejects_frame_larger_than_limit() {
        assert!(matches!(
            plan_chunks(3, 5000, 1, 4096),
            Err(ReconstructError::ResourceLimit { required: 5000, .. })
        ));
    }

    #[test]
    fn plan_rejects_empty_stack() {
        assert!(matches!(
            plan_chunks(0, 16, 10, 1024),
            Err(ReconstructError::Input(_))
        ));
    }

    #[test]
    fn small_volume_is_one_slab() {
        let slabs = plan_slabs((100, 100, 4), u64::MAX).unwrap();
        assert_eq!(slabs, vec![SlabSpan { first_z: 0, depth: 4 }]);
    }

    #[test]
    fn slabs_fit_binding_limit() {
        // 512 x 512 slices are 1 MiB as u32, the limit holds 128 of them.
        let limit = 128 << 20;
        let slabs = plan_slabs((512, 512, 129), limit).unwrap();
        assert_eq!(slabs.len(), 2);
        assert_eq!(slabs[0], SlabSpan { first_z: 0, depth: 65 });
        assert_eq!(slabs[1], SlabSpan { first_z: 65, depth: 64 });
        assert!(slabs.iter().all(|s| (s.voxel_count(512, 512) * 4) as u64 <= limit));
    }

    #[test]
    fn slab_plan_rejects_oversized_slice() {
        assert!(matches!(
            plan_slabs((64, 64, 2), 1000),
            Err(ReconstructError::ResourceLimit { required: 16384, .. })
        ));
    }

    #[test]
    fn pack_pads_to_words() {
        let frames: Vec<u8> = (0..15).collect();
        let packed = pack_chunk(&frames, 5, ChunkSpan { first_frame: 1, frame_count: 2 });
        assert_eq!(packed, vec![5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 0, 0]);
    }
}
