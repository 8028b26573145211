use image::DynamicImage;
use ndarray::{Array3, Array4, Axis};
use rayon::prelude::*;
use thiserror::Error;

use crate::frame_store::FrameStore;

#[derive(Debug, Error, PartialEq)]
pub enum FrameLoaderError {
    #[error("no frames to load")]
    NoFrames,

    #[error("frames differ in width or height")]
    InconsistentDimensions,

    #[error("unsupported channel count {0}, expected 1 or 3")]
    UnsupportedChannels(usize),

    #[error("pixel spacing must be positive and finite: {0:?}")]
    InvalidSpacing((f64, f64)),
}

pub struct FrameLoader;

impl FrameLoader {
    /// Load single-channel frames from a `(frame, height, width)` array.
    pub fn from_gray_volume(
        volume: Array3<u8>,
        spacing: (f64, f64),
    ) -> Result<FrameStore, FrameLoaderError> {
        Self::from_volume(volume.insert_axis(Axis(3)), spacing)
    }

    /// Load frames from a `(frame, height, width, channel)` array with one or
    /// three channels.
    pub fn from_volume(
        volume: Array4<u8>,
        spacing: (f64, f64),
    ) -> Result<FrameStore, FrameLoaderError> {
        let (frames, _, _, channels) = volume.dim();
        if frames == 0 {
            return Err(FrameLoaderError::NoFrames);
        }
        if channels != 1 && channels != 3 {
            return Err(FrameLoaderError::UnsupportedChannels(channels));
        }
        Self::validate_spacing(spacing)?;
        Ok(FrameStore::from_raw(volume, spacing))
    }

    /// Load a list of 2D images in acquisition order.
    ///
    /// Images are kept single-channel when none of them carries colour,
    /// otherwise every image is converted to RGB.
    pub fn from_images(
        images: &[DynamicImage],
        spacing: (f64, f64),
    ) -> Result<FrameStore, FrameLoaderError> {
        if images.is_empty() {
            return Err(FrameLoaderError::NoFrames);
        }
        Self::validate_dimensions(images)?;
        Self::validate_spacing(spacing)?;

        let channels = if images.iter().any(|image| image.color().has_color()) {
            3
        } else {
            1
        };
        let volume = Self::build_frame_array(images, channels);
        Ok(FrameStore::from_raw(volume, spacing))
    }

    fn validate_dimensions(images: &[DynamicImage]) -> Result<(), FrameLoaderError> {
        let first = (images[0].width(), images[0].height());
        if images
            .iter()
            .any(|image| (image.width(), image.height()) != first)
        {
            return Err(FrameLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn validate_spacing(spacing: (f64, f64)) -> Result<(), FrameLoaderError> {
        let (sx, sy) = spacing;
        if !sx.is_finite() || !sy.is_finite() || sx <= 0.0 || sy <= 0.0 {
            return Err(FrameLoaderError::InvalidSpacing(spacing));
        }
        Ok(())
    }

    fn build_frame_array(images: &[DynamicImage], channels: usize) -> Array4<u8> {
        let width = images[0].width() as usize;
        let height = images[0].height() as usize;
        let mut volume = Array4::<u8>::zeros((images.len(), height, width, channels));

        volume
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(images.par_iter())
            .for_each(|(mut frame, image)| {
                let pixels = if channels == 1 {
                    image.to_luma8().into_raw()
                } else {
                    image.to_rgb8().into_raw()
                };
                // Both are row-major (y, x, channel), like the frame view.
                for (dst, &value) in frame.iter_mut().zip(&pixels) {
                    *dst = value;
                }
            });

        volume
    }
}
