use ndarray::ArrayView3;

use crate::error::{Error, Result};

pub const DENSITY: &str = "density";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    UnsignedChar,
}

// `data` is packed x fastest, then y, then z
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeImage {
    /// `[x0, x1, y0, y1, z0, z1]`, inclusive bounds
    pub extent: [i32; 6],
    pub whole_extent: [i32; 6],
    pub spacing: [f64; 3],
    pub scalar_name: String,
    pub scalar_type: ScalarType,
    pub components: usize,
    pub data: Vec<u8>,
}

impl VolumeImage {
    /// (x, y, z)
    pub fn dimensions(&self) -> (usize, usize, usize) {
        let e = &self.extent;
        (
            (e[1] - e[0] + 1) as usize,
            (e[3] - e[2] + 1) as usize,
            (e[5] - e[4] + 1) as usize,
        )
    }

    pub fn value_at(&self, i: i32, j: i32, k: i32) -> Option<u8> {
        let e = &self.extent;
        if i < e[0] || i > e[1] || j < e[2] || j > e[3] || k < e[4] || k > e[5] {
            return None;
        }
        let (nx, ny, _) = self.dimensions();
        let idx = ((k - e[4]) as usize * ny + (j - e[2]) as usize) * nx + (i - e[0]) as usize;
        self.data.get(idx).copied()
    }
}

pub fn encode_volume(slice: ArrayView3<'_, u8>, um_per_pix: f64, um_per_z: f64) -> Result<VolumeImage> {
    let (nz, rows, cols) = slice.dim();
    if nz == 0 || rows == 0 || cols == 0 {
        return Err(Error::Encoding(format!(
            "degenerate volume shape ({nz}, {rows}, {cols})"
        )));
    }
    for (name, v) in [("um_per_pix", um_per_pix), ("um_per_z", um_per_z)] {
        if !(v.is_finite() && v > 0.0) {
            return Err(Error::Encoding(format!("{name} must be positive, got {v}")));
        }
    }
    let too_large = |n: usize| i32::try_from(n).is_err();
    if too_large(nz) || too_large(rows) || too_large(cols) {
        return Err(Error::Encoding(format!(
            "volume shape ({nz}, {rows}, {cols}) exceeds the index range"
        )));
    }

    // iterates in logical (z, y, x) order regardless of the view's strides
    let data: Vec<u8> = slice.iter().copied().collect();
    debug_assert_eq!(data.len(), nz * rows * cols);

    let extent = [1, cols as i32, 1, rows as i32, 1, nz as i32];
    Ok(VolumeImage {
        extent,
        whole_extent: extent,
        spacing: [um_per_pix, um_per_pix, um_per_z],
        scalar_name: DENSITY.to_string(),
        scalar_type: ScalarType::UnsignedChar,
        components: 1,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Axis, s};

    fn indexed(nz: usize, rows: usize, cols: usize) -> Array3<u8> {
        Array3::from_shape_fn((nz, rows, cols), |(z, y, x)| (z * 100 + y * 10 + x) as u8)
    }

    #[test]
    fn extents_and_metadata() {
        let img = encode_volume(indexed(3, 2, 4).view(), 0.25, 1.5).unwrap();
        assert_eq!(img.extent, [1, 4, 1, 2, 1, 3]);
        assert_eq!(img.whole_extent, img.extent);
        assert_eq!(img.spacing, [0.25, 0.25, 1.5]);
        assert_eq!(img.scalar_name, "density");
        assert_eq!(img.scalar_type, ScalarType::UnsignedChar);
        assert_eq!(img.components, 1);
        assert_eq!(img.dimensions(), (4, 2, 3));
    }

    #[test]
    fn buffer_length_matches_voxel_count() {
        let img = encode_volume(indexed(5, 3, 7).view(), 1.0, 1.0).unwrap();
        assert_eq!(img.data.len(), 5 * 3 * 7);
    }

    #[test]
    fn buffer_layout_matches_extents() {
        let arr = indexed(3, 2, 4);
        let img = encode_volume(arr.view(), 1.0, 1.0).unwrap();
        for ((z, y, x), &v) in arr.indexed_iter() {
            assert_eq!(img.data[(z * 2 + y) * 4 + x], v);
            assert_eq!(
                img.value_at(x as i32 + 1, y as i32 + 1, z as i32 + 1),
                Some(v)
            );
        }
        assert_eq!(img.value_at(0, 1, 1), None);
        assert_eq!(img.value_at(1, 1, 4), None);
    }

    #[test]
    fn non_contiguous_views_are_packed() {
        let arr = indexed(2, 3, 4);
        // (z, x, y) view: logical order differs from memory order
        let permuted = arr.view().permuted_axes([0, 2, 1]);
        let img = encode_volume(permuted, 1.0, 1.0).unwrap();
        assert_eq!(img.extent, [1, 3, 1, 4, 1, 2]);
        for ((z, r, c), &v) in permuted.indexed_iter() {
            assert_eq!(img.value_at(c as i32 + 1, r as i32 + 1, z as i32 + 1), Some(v));
        }

        let strided = arr.slice(s![.., .., ..;2]);
        let img = encode_volume(strided, 1.0, 1.0).unwrap();
        assert_eq!(img.extent, [1, 2, 1, 3, 1, 2]);
        assert_eq!(img.value_at(2, 1, 1), Some(arr[[0, 0, 2]]));
    }

    #[test]
    fn degenerate_shapes_are_rejected() {
        let empty = Array3::<u8>::zeros((2, 0, 3));
        assert!(matches!(
            encode_volume(empty.view(), 1.0, 1.0),
            Err(Error::Encoding(_))
        ));
        let arr = indexed(2, 2, 2);
        let none = arr.slice_axis(Axis(0), ndarray::Slice::from(0..0));
        assert!(encode_volume(none, 1.0, 1.0).is_err());
        assert!(encode_volume(arr.view(), 0.0, 1.0).is_err());
    }
}
