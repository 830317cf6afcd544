use indicatif::{ProgressBar, ProgressIterator};
use log::{debug, info, warn};
use ndarray::{Array, Array4, ArrayBase, ArrayView3, Axis, Data, Dimension, s};

use crate::{
    error::{Error, Result},
    roi::{Crop, Roi},
    source::{ImageSource, PlaneIndex},
};

/// Normalized 8-bit volume, axes (frame, z, y, x).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume4 {
    data: Array4<u8>,
}

impl Volume4 {
    pub fn new(data: Array4<u8>) -> Self {
        Self { data }
    }

    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn frame(&self, i: usize) -> Result<ArrayView3<'_, u8>> {
        if i >= self.frames() {
            return Err(Error::out_of_range("frame", i, self.frames()));
        }
        Ok(self.data.index_axis(Axis(0), i))
    }

    pub fn data(&self) -> &Array4<u8> {
        &self.data
    }
}

pub fn assemble(
    source: &mut dyn ImageSource,
    frames: &[usize],
    crop: Crop,
    channel: usize,
    progress: &ProgressBar,
) -> Result<Array4<u16>> {
    let geometry = source.geometry().clone();
    if frames.is_empty() {
        return Err(Error::Configuration("no frames selected".to_string()));
    }
    if crop.x1() > geometry.width || crop.y1() > geometry.height {
        return Err(Error::InvalidRegion(format!(
            "crop {crop:?} exceeds frame {}x{}",
            geometry.width, geometry.height
        )));
    }
    for &frame in frames {
        geometry.check(PlaneIndex {
            channel,
            z: 0,
            frame,
        })?;
    }

    let z_slices = geometry.z_slices;
    let mut volume = Array4::<u16>::zeros((frames.len(), z_slices, crop.height, crop.width));
    debug!(
        "assembling channel {channel}: volume {:?}, crop {crop:?}",
        volume.dim()
    );

    // z fastest
    let coords = frames
        .iter()
        .enumerate()
        .flat_map(|(i, &frame)| (0..z_slices).map(move |z| (i, frame, z)));
    for (i, frame, z) in coords.progress_with(progress.clone()) {
        let plane = source.plane(PlaneIndex { channel, z, frame })?;
        if plane.dim() != (geometry.height, geometry.width) {
            return Err(Error::InvalidFormat(format!(
                "plane c={channel} z={z} t={frame} has shape {:?}, expected {:?}",
                plane.dim(),
                (geometry.height, geometry.width)
            )));
        }
        volume
            .slice_mut(s![i, z, .., ..])
            .assign(&plane.slice(s![crop.y0..crop.y1(), crop.x0..crop.x1()]));
    }
    Ok(volume)
}

/// Rescale to `0..=255` over the minimum and range of the whole array.
pub fn normalize<S, D>(volume: &ArrayBase<S, D>) -> Array<u8, D>
where
    S: Data,
    S::Elem: Copy + Into<f64>,
    D: Dimension,
{
    let (lo, hi) = volume
        .iter()
        .map(|&v| Into::<f64>::into(v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    if range <= 0.0 || range.is_nan() {
        warn!("volume has no dynamic range (min = max = {lo}), output is all zeros");
        return Array::zeros(volume.raw_dim());
    }

    let step = range / 255.0;
    volume.mapv(|v| ((Into::<f64>::into(v) - lo) / step).round().clamp(0.0, 255.0) as u8)
}

pub fn assemble_and_normalize(
    source: &mut dyn ImageSource,
    frames: &[usize],
    roi: Option<&Roi>,
    channel: usize,
    progress: &ProgressBar,
) -> Result<Volume4> {
    let geometry = source.geometry();
    let crop = Crop::from_roi(roi, geometry.width, geometry.height)?;
    let wide = assemble(source, frames, crop, channel, progress)?;
    let volume = Volume4::new(normalize(&wide));
    info!("channel {channel}: assembled volume {:?}", volume.dim());
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ArraySource;
    use ndarray::{Array3, Array5, arr1};

    // planes hold `[0..w*h] * k` with k running over all planes from 1
    fn ramp_source(frames: usize, z: usize, h: usize, w: usize) -> ArraySource {
        let data = Array5::from_shape_fn((1, frames, z, h, w), |(_, t, z_, y, x)| {
            let k = t * z + z_ + 1;
            ((y * w + x) * k) as u16
        });
        ArraySource::new(data, 1.0, 1.0)
    }

    fn rect(left: f64, right: f64, top: f64, bottom: f64) -> Roi {
        Roi {
            left,
            right,
            top,
            bottom,
            t_position: None,
        }
    }

    #[test]
    fn full_frame_shape() {
        let mut src = ramp_source(2, 3, 4, 5);
        let vol =
            assemble_and_normalize(&mut src, &[0, 1], None, 0, &ProgressBar::hidden()).unwrap();
        assert_eq!(vol.dim(), (2, 3, 4, 5));
    }

    #[test]
    fn roi_shape() {
        let mut src = ramp_source(2, 3, 4, 4);
        let roi = rect(1.0, 3.0, 1.0, 3.0);
        let vol =
            assemble_and_normalize(&mut src, &[0, 1], Some(&roi), 0, &ProgressBar::hidden())
                .unwrap();
        assert_eq!(vol.dim(), (2, 3, 2, 2));
    }

    #[test]
    fn crop_takes_the_right_pixels() {
        let mut src = ramp_source(1, 1, 4, 4);
        let crop = Crop::from_roi(Some(&rect(1.0, 3.0, 2.0, 4.0)), 4, 4).unwrap();
        let wide = assemble(&mut src, &[0], crop, 0, &ProgressBar::hidden()).unwrap();
        // rows 2..4, cols 1..3 of [0..16]
        assert_eq!(
            wide.iter().copied().collect::<Vec<_>>(),
            vec![9u16, 10, 13, 14]
        );
    }

    #[test]
    fn frames_are_placed_in_requested_order() {
        let mut src = ramp_source(3, 1, 2, 2);
        let wide = assemble(&mut src, &[2, 0], Crop::full(2, 2), 0, &ProgressBar::hidden())
            .unwrap();
        assert_eq!(wide[[0, 0, 1, 1]], 3 * 3);
        assert_eq!(wide[[1, 0, 1, 1]], 3);
    }

    #[test]
    fn invalid_frame_or_channel() {
        let mut src = ramp_source(2, 1, 2, 2);
        let bar = ProgressBar::hidden();
        assert!(matches!(
            assemble(&mut src, &[0, 2], Crop::full(2, 2), 0, &bar),
            Err(Error::IndexOutOfRange { axis: "frame", .. })
        ));
        assert!(matches!(
            assemble(&mut src, &[0], Crop::full(2, 2), 1, &bar),
            Err(Error::IndexOutOfRange {
                axis: "channel",
                ..
            })
        ));
        assert!(assemble(&mut src, &[], Crop::full(2, 2), 0, &bar).is_err());
    }

    #[test]
    fn invalid_roi() {
        let mut src = ramp_source(1, 1, 4, 4);
        let roi = rect(1.0, 1.0, 0.0, 2.0);
        assert!(matches!(
            assemble_and_normalize(&mut src, &[0], Some(&roi), 0, &ProgressBar::hidden()),
            Err(Error::InvalidRegion(_))
        ));
    }

    #[test]
    fn normalization_spans_full_range() {
        let mut src = ramp_source(2, 3, 4, 4);
        let vol =
            assemble_and_normalize(&mut src, &[0, 1], None, 0, &ProgressBar::hidden()).unwrap();
        assert_eq!(vol.data().iter().copied().min(), Some(0));
        assert_eq!(vol.data().iter().copied().max(), Some(255));
    }

    #[test]
    fn normalization_rounds() {
        let out = normalize(&arr1(&[100u16, 101, 102, 107]));
        // step = 7 / 255: 36.43 -> 36, 72.86 -> 73
        assert_eq!(out, arr1(&[0u8, 36, 73, 255]));
    }

    #[test]
    fn normalization_is_series_wide() {
        // frame 1 is much brighter than frame 0; frame 0 must stay dim
        let data = Array5::from_shape_fn((1, 2, 1, 1, 2), |(_, t, _, _, x)| {
            (t * 1000 + x * 10) as u16
        });
        let mut src = ArraySource::new(data, 1.0, 1.0);
        let vol =
            assemble_and_normalize(&mut src, &[0, 1], None, 0, &ProgressBar::hidden()).unwrap();
        let frame0 = vol.frame(0).unwrap();
        assert_eq!(frame0[[0, 0, 0]], 0);
        assert_eq!(frame0[[0, 0, 1]], 3);
        assert_eq!(vol.frame(1).unwrap()[[0, 0, 1]], 255);
    }

    #[test]
    fn normalization_is_idempotent_on_full_range() {
        let data = Array3::from_shape_fn((2, 4, 32), |(z, y, x)| ((z * 128 + y * 32 + x) % 256) as u8);
        let once = normalize(&data);
        assert_eq!(once, data);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn constant_volume_maps_to_zero() {
        let data = Array4::<u16>::from_elem((2, 2, 3, 3), 777);
        let out = normalize(&data);
        assert_eq!(out.dim(), (2, 2, 3, 3));
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn empty_volume_normalizes_to_empty() {
        let data = Array4::<u16>::zeros((0, 2, 3, 3));
        let out = normalize(&data);
        assert_eq!(out.dim(), (0, 2, 3, 3));
    }

    #[test]
    fn frame_view_bounds() {
        let vol = Volume4::new(Array4::zeros((2, 1, 1, 1)));
        assert!(vol.frame(1).is_ok());
        assert!(vol.frame(2).is_err());
    }
}
