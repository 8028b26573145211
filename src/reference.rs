//! CPU implementation of the voxel nearest-neighbour fill.
//!
//! Follows `shaders/vnn.wgsl` step for step in `f32`, so the two agree on
//! every voxel that is not within rounding distance of a pixel or search
//! boundary. Runs z-slices in parallel with rayon.

use glam::Vec3;
use rayon::prelude::*;

use crate::geometry::PlaneRecord;
use crate::input::{Mask, OutputVolume};

#[inline]
fn xyz(v: [f32; 4]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

/// Stacked processed frames of one reconstruction, `width * height` bytes each.
pub struct FrameStack<'a> {
    pub pixels: &'a [u8],
    pub width: usize,
    pub height: usize,
}

/// Intensity of the nearest valid sample within `search_distance` of `p`,
/// or 0 when there is none. Ties go to the earlier frame.
pub fn nearest_sample(
    p: Vec3,
    frames: &FrameStack<'_>,
    mask: &Mask,
    planes: &[PlaneRecord],
    search_distance: f32,
) -> u8 {
    let (width, height) = (frames.width as f32, frames.height as f32);
    let frame_size = frames.width * frames.height;
    let mut best = f32::MAX;
    let mut value = 0;

    for (k, plane) in planes.iter().enumerate() {
        let n = xyz(plane.equation);
        let d = n.dot(p) + plane.equation[3];
        let distance = d.abs();
        if distance > search_distance || distance >= best {
            continue;
        }

        let (axis_u, axis_v) = (xyz(plane.axis_u), xyz(plane.axis_v));
        let rel = p - n * d - xyz(plane.origin);
        let u = rel.dot(axis_u) / axis_u.length_squared() * width;
        let v = rel.dot(axis_v) / axis_v.length_squared() * height;
        let (i, j) = ((u + 0.5).floor(), (v + 0.5).floor());
        if !(i >= 0.0 && j >= 0.0 && i < width && j < height) {
            continue;
        }

        let pixel = j as usize * frames.width + i as usize;
        if mask.as_slice()[pixel] == 0 {
            continue;
        }
        best = distance;
        value = frames.pixels[k * frame_size + pixel];
    }
    value
}

pub fn reconstruct_reference(
    frames: &FrameStack<'_>,
    mask: &Mask,
    planes: &[PlaneRecord],
    search_distance: f32,
    output: &mut OutputVolume,
) {
    let (dx, dy, _) = output.dims();
    let (sx, sy, sz) = output.spacing();
    let spacing = Vec3::new(sx as f32, sy as f32, sz as f32);

    output
        .as_mut_slice()
        .par_chunks_mut(dx * dy)
        .enumerate()
        .for_each(|(z, slice)| {
            for y in 0..dy {
                for x in 0..dx {
                    let p = Vec3::new(x as f32, y as f32, z as f32) * spacing;
                    slice[x + y * dx] = nearest_sample(p, frames, mask, planes, search_distance);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{
        TrackingMatrix, generate_plane_equations, generate_plane_points,
    };
    use glam::DVec3;

    fn planes_at(z_offsets: &[f64], width: usize, height: usize) -> Vec<PlaneRecord> {
        let matrices: Vec<_> = z_offsets
            .iter()
            .map(|&z| TrackingMatrix::from_translation(DVec3::new(0.0, 0.0, z)))
            .collect();
        let points = generate_plane_points(&matrices, width, height, 1.0, 1.0);
        let equations = generate_plane_equations(&points).unwrap();
        points
            .iter()
            .zip(&equations)
            .map(|(p, e)| PlaneRecord::new(p, e))
            .collect()
    }

    #[test]
    fn nearest_plane_wins() {
        let pixels: Vec<u8> = [vec![10u8; 4], vec![20u8; 4]].concat();
        let frames = FrameStack {
            pixels: &pixels,
            width: 2,
            height: 2,
        };
        let planes = planes_at(&[0.0, 2.0], 2, 2);
        let mask = Mask::all_valid(2, 2);
        assert_eq!(nearest_sample(Vec3::new(1.0, 1.0, 0.4), &frames, &mask, &planes, 5.0), 10);
        assert_eq!(nearest_sample(Vec3::new(1.0, 1.0, 1.6), &frames, &mask, &planes, 5.0), 20);
        // Equidistant: the earlier frame is kept.
        assert_eq!(nearest_sample(Vec3::new(1.0, 1.0, 1.0), &frames, &mask, &planes, 5.0), 10);
    }

    #[test]
    fn samples_the_projected_pixel() {
        let pixels: Vec<u8> = (0..12).collect();
        let frames = FrameStack {
            pixels: &pixels,
            width: 4,
            height: 3,
        };
        let planes = planes_at(&[0.0], 4, 3);
        let mask = Mask::all_valid(4, 3);
        assert_eq!(nearest_sample(Vec3::new(3.0, 2.0, 0.5), &frames, &mask, &planes, 1.0), 11);
        assert_eq!(nearest_sample(Vec3::new(1.2, 0.9, 0.0), &frames, &mask, &planes, 1.0), 5);
    }

    #[test]
    fn masked_and_out_of_frame_samples_are_skipped() {
        let pixels = vec![50u8; 4];
        let frames = FrameStack {
            pixels: &pixels,
            width: 2,
            height: 2,
        };
        let planes = planes_at(&[0.0], 2, 2);
        let mask = Mask::new(2, 2, vec![1, 0, 1, 1]).unwrap();
        assert_eq!(nearest_sample(Vec3::new(1.0, 0.0, 0.0), &frames, &mask, &planes, 1.0), 0);
        assert_eq!(nearest_sample(Vec3::new(0.0, 0.0, 0.0), &frames, &mask, &planes, 1.0), 50);
        assert_eq!(nearest_sample(Vec3::new(5.0, 0.0, 0.0), &frames, &mask, &planes, 1.0), 0);
    }

    #[test]
    fn beyond_search_distance_is_zero() {
        let pixels = vec![50u8; 4];
        let frames = FrameStack {
            pixels: &pixels,
            width: 2,
            height: 2,
        };
        let planes = planes_at(&[0.0], 2, 2);
        let mask = Mask::all_valid(2, 2);
        assert_eq!(nearest_sample(Vec3::new(0.0, 0.0, 1.5), &frames, &mask, &planes, 1.0), 0);
    }
}
