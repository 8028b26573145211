use ndarray::{Array2, ArrayView3, Zip};

pub(crate) struct PixelFilter;

impl PixelFilter {
    const RED_WEIGHT: f32 = 0.30;
    const GREEN_WEIGHT: f32 = 0.59;
    const BLUE_WEIGHT: f32 = 0.11;

    #[inline]
    pub(crate) fn luminance(r: u8, g: u8, b: u8) -> u8 {
        let value = Self::BLUE_WEIGHT.mul_add(
            b as f32,
            Self::GREEN_WEIGHT.mul_add(g as f32, Self::RED_WEIGHT * r as f32),
        );
        value.round().clamp(0.0, 255.0) as u8
    }

    /// Reduce a `(height, width, channels)` frame to one channel.
    ///
    /// Single-channel input is copied through unchanged.
    pub(crate) fn grayscale(frame: &ArrayView3<u8>) -> Array2<u8> {
        let (height, width, channels) = frame.dim();
        if channels == 1 {
            return frame.index_axis(ndarray::Axis(2), 0).to_owned();
        }
        let mut out = Array2::<u8>::zeros((height, width));
        Zip::indexed(&mut out).for_each(|(y, x), value| {
            *value = Self::luminance(frame[[y, x, 0]], frame[[y, x, 1]], frame[[y, x, 2]]);
        });
        out
    }

    /// Luminance of the chromatic pixels only: every pixel whose three
    /// channels are equal (tissue) becomes 0, colour (flow) is kept.
    ///
    /// Returns `None` for single-channel input, where there is no colour to keep.
    pub(crate) fn angio(frame: &ArrayView3<u8>) -> Option<Array2<u8>> {
        let (height, width, channels) = frame.dim();
        if channels < 3 {
            return None;
        }
        let mut out = Array2::<u8>::zeros((height, width));
        Zip::indexed(&mut out).for_each(|(y, x), value| {
            let (r, g, b) = (frame[[y, x, 0]], frame[[y, x, 1]], frame[[y, x, 2]]);
            *value = if r == g && g == b {
                0
            } else {
                Self::luminance(r, g, b)
            };
        });
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn luminance_of_gray_is_identity() {
        for v in [0u8, 1, 77, 128, 254, 255] {
            assert_eq!(PixelFilter::luminance(v, v, v), v);
        }
    }

    #[test]
    fn grayscale_passes_single_channel_through() {
        let frame = Array3::from_shape_fn((2, 3, 1), |(y, x, _)| (y * 3 + x) as u8);
        let gray = PixelFilter::grayscale(&frame.view());
        assert_eq!(gray.as_slice().unwrap(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn angio_suppresses_achromatic_pixels() {
        let mut frame = Array3::<u8>::zeros((1, 2, 3));
        // Tissue: equal channels.
        frame[[0, 0, 0]] = 90;
        frame[[0, 0, 1]] = 90;
        frame[[0, 0, 2]] = 90;
        // Flow: pure red.
        frame[[0, 1, 0]] = 200;
        let angio = PixelFilter::angio(&frame.view()).unwrap();
        assert_eq!(angio[[0, 0]], 0);
        assert_eq!(angio[[0, 1]], PixelFilter::luminance(200, 0, 0));
        assert_eq!(angio[[0, 1]], 60);
    }

    #[test]
    fn angio_rejects_single_channel() {
        let frame = Array3::<u8>::zeros((2, 2, 1));
        assert!(PixelFilter::angio(&frame.view()).is_none());
    }
}
