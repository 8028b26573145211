use std::sync::Arc;

use ndarray::{Array4, ArrayView3, Axis, s};
use rayon::prelude::*;
use thiserror::Error;

use crate::enums::FrameFilter;
use crate::filters::PixelFilter;
use crate::input::Mask;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameStoreError {
    #[error("frame index {index} out of range ({len} active frames)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("mask is {mask_width}x{mask_height}, raw frames are {width}x{height}")]
    MaskShape {
        mask_width: usize,
        mask_height: usize,
        width: usize,
        height: usize,
    },
}

/// Inclusive integer box. `min`/`max` are `(x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropBox {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl CropBox {
    pub fn new(x: (i32, i32), y: (i32, i32), z: (i32, i32)) -> Self {
        Self {
            min: [x.0, y.0, z.0],
            max: [x.1, y.1, z.1],
        }
    }

    /// A zero-range box, which disables cropping.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn range(&self) -> [i64; 3] {
        [0, 1, 2].map(|axis| self.max[axis] as i64 - self.min[axis] as i64)
    }

    pub fn is_set(&self) -> bool {
        self.range()[0] != 0
    }

    /// Frames are never cropped along the temporal axis.
    fn with_unbounded_z(mut self) -> Self {
        self.min[2] = i32::MIN;
        self.max[2] = i32::MAX;
        self
    }

    /// In-plane region `(x0, y0, width, height)` of a `width x height`
    /// frame that this box keeps. Covers the whole frame when unset.
    pub fn in_plane_region(&self, width: usize, height: usize) -> (usize, usize, usize, usize) {
        if !self.is_set() || width == 0 || height == 0 {
            return (0, 0, width, height);
        }
        let clip = |a: i32, b: i32, len: usize| {
            let last = len as i64 - 1;
            let lo = (a.min(b) as i64).clamp(0, last);
            let hi = (a.max(b) as i64).clamp(0, last);
            (lo as usize, (hi - lo + 1) as usize)
        };
        let (x0, w) = clip(self.min[0], self.max[0], width);
        let (y0, h) = clip(self.min[1], self.max[1], height);
        (x0, y0, w, h)
    }
}

/// The tracked B-scan frames of one acquisition and their processed cache.
///
/// Raw frames are `(frame, y, x, channel)` with one or three channels and are
/// never modified. Processed frames are single-channel, cropped, filtered and
/// stored contiguously in active order; they are rebuilt on first access after
/// any change to the crop box, the angio flag or the set of active frames.
pub struct FrameStore {
    raw: Arc<Array4<u8>>,
    spacing: (f64, f64),
    active: Vec<usize>,
    crop_box: CropBox,
    angio: bool,
    processed: Option<Vec<u8>>,
}

impl FrameStore {
    pub(crate) fn from_raw(raw: Array4<u8>, spacing: (f64, f64)) -> Self {
        let frame_count = raw.dim().0;
        Self {
            raw: Arc::new(raw),
            spacing,
            active: (0..frame_count).collect(),
            crop_box: CropBox::unset(),
            angio: false,
            processed: None,
        }
    }

    /// Number of ingested frames, including removed ones.
    pub fn frame_count(&self) -> usize {
        self.raw.dim().0
    }

    pub fn channels(&self) -> usize {
        self.raw.dim().3
    }

    /// Raw `(width, height)` before cropping.
    pub fn raw_dimensions(&self) -> (usize, usize) {
        let (_, height, width, _) = self.raw.dim();
        (width, height)
    }

    /// `(width, height, active frame count)` of the processed frames.
    pub fn dimensions(&self) -> (usize, usize, usize) {
        let (width, height) = self.raw_dimensions();
        let (_, _, w, h) = self.crop_box.in_plane_region(width, height);
        (w, h, self.active.len())
    }

    /// Pixel origin of the cropped region inside the raw frame.
    pub fn crop_origin(&self) -> (usize, usize) {
        let (width, height) = self.raw_dimensions();
        let (x0, y0, _, _) = self.crop_box.in_plane_region(width, height);
        (x0, y0)
    }

    /// `(sx, sy, sz)`. A stack of 2D frames has no native z spacing, so
    /// `sz` is reported equal to `sx`.
    pub fn spacing(&self) -> (f64, f64, f64) {
        (self.spacing.0, self.spacing.1, self.spacing.0)
    }

    /// Original frame index of every active frame, in acquisition order.
    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    pub fn crop_box(&self) -> CropBox {
        self.crop_box
    }

    pub fn set_crop_box(&mut self, crop_box: CropBox) {
        let crop_box = crop_box.with_unbounded_z();
        if crop_box != self.crop_box {
            self.crop_box = crop_box;
            self.invalidate();
        }
    }

    pub fn angio(&self) -> bool {
        self.angio
    }

    pub fn set_angio(&mut self, angio: bool) {
        if angio != self.angio {
            self.angio = angio;
            self.invalidate();
        }
    }

    pub fn remove_frame(&mut self, index: usize) -> Result<(), FrameStoreError> {
        self.check_index(index)?;
        self.active.remove(index);
        self.invalidate();
        Ok(())
    }

    /// Processed pixels of active frame `index`, row-major `width * height`.
    pub fn frame(&mut self, index: usize) -> Result<&[u8], FrameStoreError> {
        self.check_index(index)?;
        let (width, height, _) = self.dimensions();
        let frame_size = width * height;
        let stack = self.frames();
        Ok(&stack[index * frame_size..(index + 1) * frame_size])
    }

    /// All processed active frames, back to back in active order.
    pub fn frames(&mut self) -> &[u8] {
        if self.processed.is_none() {
            self.processed = Some(self.process_all());
        }
        self.processed.as_deref().unwrap_or_default()
    }

    /// Shares the raw frames; every frame is active again and nothing is cached.
    pub fn copy(&self) -> FrameStore {
        FrameStore {
            raw: Arc::clone(&self.raw),
            spacing: self.spacing,
            active: (0..self.frame_count()).collect(),
            crop_box: self.crop_box,
            angio: self.angio,
            processed: None,
        }
    }

    /// Crop a raw-frame-sized mask with the current crop box.
    pub fn crop_mask(&self, mask: &Mask) -> Result<Mask, FrameStoreError> {
        let (width, height) = self.raw_dimensions();
        if mask.width() != width || mask.height() != height {
            return Err(FrameStoreError::MaskShape {
                mask_width: mask.width(),
                mask_height: mask.height(),
                width,
                height,
            });
        }
        let (x0, y0, w, h) = self.crop_box.in_plane_region(width, height);
        let data = (y0..y0 + h)
            .flat_map(|y| mask.row(y)[x0..x0 + w].iter().copied())
            .collect();
        Ok(Mask::from_parts(w, h, data))
    }

    pub fn is_cached(&self) -> bool {
        self.processed.is_some()
    }

    fn invalidate(&mut self) {
        self.processed = None;
    }

    fn check_index(&self, index: usize) -> Result<(), FrameStoreError> {
        if index >= self.active.len() {
            log::warn!(
                "frame index {index} out of range, {} active frames",
                self.active.len()
            );
            return Err(FrameStoreError::IndexOutOfRange {
                index,
                len: self.active.len(),
            });
        }
        Ok(())
    }

    fn process_all(&self) -> Vec<u8> {
        let (raw_width, raw_height) = self.raw_dimensions();
        let (x0, y0, width, height) = self.crop_box.in_plane_region(raw_width, raw_height);
        let frame_size = width * height;

        let mut filter = FrameFilter::from_angio(self.angio);
        if filter == FrameFilter::Angio && self.channels() < 3 {
            log::warn!("angio filter requested on single-channel frames, using grayscale");
            filter = FrameFilter::Grayscale;
        }

        let mut stack = vec![0u8; frame_size * self.active.len()];
        if frame_size == 0 {
            return stack;
        }
        stack
            .par_chunks_mut(frame_size)
            .zip(self.active.par_iter())
            .for_each(|(dst, &original)| {
                let frame = self.raw.index_axis(Axis(0), original);
                let cropped = frame.slice(s![y0..y0 + height, x0..x0 + width, ..]);
                Self::filter_frame(&cropped, filter, dst);
            });
        stack
    }

    fn filter_frame(frame: &ArrayView3<u8>, filter: FrameFilter, dst: &mut [u8]) {
        let processed = match filter {
            FrameFilter::Angio => {
                PixelFilter::angio(frame).unwrap_or_else(|| PixelFilter::grayscale(frame))
            }
            FrameFilter::Grayscale => PixelFilter::grayscale(frame),
        };
        for (dst, &value) in dst.iter_mut().zip(processed.iter()) {
            *dst = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn gradient_store(frames: usize, width: usize, height: usize) -> FrameStore {
        let raw = Array4::from_shape_fn((frames, height, width, 1), |(f, y, x, _)| {
            (f * 100 + y * 10 + x) as u8
        });
        FrameStore::from_raw(raw, (0.5, 0.25))
    }

    #[test]
    fn spacing_reports_sx_as_z() {
        let store = gradient_store(2, 4, 3);
        assert_eq!(store.spacing(), (0.5, 0.25, 0.5));
    }

    #[test]
    fn crop_box_forces_unbounded_z() {
        let mut store = gradient_store(2, 8, 8);
        store.set_crop_box(CropBox::new((1, 3), (2, 5), (0, 0)));
        let crop = store.crop_box();
        assert_eq!(crop.min[2], i32::MIN);
        assert_eq!(crop.max[2], i32::MAX);
        assert_eq!(store.dimensions(), (3, 4, 2));
    }

    #[test]
    fn cropped_frame_starts_at_box_origin() {
        let mut store = gradient_store(2, 8, 8);
        store.set_crop_box(CropBox::new((1, 3), (2, 5), (0, 0)));
        let frame = store.frame(1).unwrap().to_vec();
        // Frame 1, y = 2, x = 1..=3
        assert_eq!(&frame[..3], &[121, 122, 123]);
        assert_eq!(store.crop_origin(), (1, 2));
    }

    #[test]
    fn crop_box_is_clipped_to_frame() {
        let mut store = gradient_store(1, 4, 4);
        store.set_crop_box(CropBox::new((2, 40), (-5, 1), (0, 0)));
        assert_eq!(store.dimensions(), (2, 2, 1));
    }

    #[test]
    fn unchanged_crop_box_keeps_cache() {
        let mut store = gradient_store(2, 4, 4);
        store.set_crop_box(CropBox::new((0, 1), (0, 1), (0, 0)));
        store.frames();
        assert!(store.is_cached());
        store.set_crop_box(CropBox::new((0, 1), (0, 1), (7, 9)));
        assert!(store.is_cached());
        store.set_crop_box(CropBox::new((0, 2), (0, 1), (0, 0)));
        assert!(!store.is_cached());
    }

    #[test]
    fn angio_toggle_invalidates_only_on_change() {
        let mut store = gradient_store(1, 2, 2);
        store.frames();
        store.set_angio(false);
        assert!(store.is_cached());
        store.set_angio(true);
        assert!(!store.is_cached());
    }

    #[test]
    fn remove_frame_shifts_active_indices() {
        let mut store = gradient_store(4, 2, 2);
        store.remove_frame(1).unwrap();
        assert_eq!(store.active_indices(), &[0, 2, 3]);
        assert_eq!(store.frame(1).unwrap()[0], 200);
    }

    #[test]
    fn frame_out_of_range_is_an_error() {
        let mut store = gradient_store(2, 2, 2);
        assert_eq!(
            store.frame(2),
            Err(FrameStoreError::IndexOutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn copy_resets_active_frames_and_cache() {
        let mut store = gradient_store(3, 2, 2);
        store.set_angio(true);
        store.remove_frame(0).unwrap();
        store.frames();
        let copy = store.copy();
        assert_eq!(copy.dimensions(), (2, 2, 3));
        assert!(!copy.is_cached());
        assert!(copy.angio());
    }

    #[test]
    fn crop_mask_matches_frame_region() {
        let mut store = gradient_store(1, 4, 3);
        store.set_crop_box(CropBox::new((1, 2), (1, 2), (0, 0)));
        let mask = Mask::from_parts(4, 3, (0..12).collect());
        let cropped = store.crop_mask(&mask).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (2, 2));
        assert_eq!(cropped.as_slice(), &[5, 6, 9, 10]);
    }
}
