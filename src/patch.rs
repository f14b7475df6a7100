//! Tiling of channel-stacked images into patches and back.
//!
//! Images are handled channel-last, `(h, w, channels)`. With an overlap
//! factor of one the tiling is disjoint and reconstruction is an exact
//! inverse of extraction; larger factors shrink the stride to
//! `patch dim / factor` and reconstruction averages the overlapped regions.

use ndarray::prelude::*;
use ndarray::s;
use num_complex::Complex64 as c64;

use crate::error::Error;

/// Extraction stride implied by a patch shape and overlap factor.
pub fn extraction_step(
    patch_shape: (usize, usize),
    overlapping_factor: usize,
) -> (usize, usize) {
    (
        patch_shape.0 / overlapping_factor,
        patch_shape.1 / overlapping_factor,
    )
}

fn check_tiling(
    img: (usize, usize),
    patch: (usize, usize),
    overlapping_factor: usize,
) -> Result<(usize, usize), Error> {
    let err = Error::PatchTiling {
        patch,
        image: img,
        overlap: overlapping_factor,
    };
    if overlapping_factor == 0
        || patch.0 == 0
        || patch.1 == 0
        || patch.0 % overlapping_factor != 0
        || patch.1 % overlapping_factor != 0
    {
        return Err(err);
    }
    let step = extraction_step(patch, overlapping_factor);
    if img.0 < patch.0
        || img.1 < patch.1
        || (img.0 - patch.0) % step.0 != 0
        || (img.1 - patch.1) % step.1 != 0
    {
        return Err(err);
    }
    Ok(step)
}

/// Extract equally-shaped patches from an `(h, w, channels)` image,
/// row-major over the grid of patch positions.
pub fn extract_patches(
    image: ArrayView3<'_, c64>,
    patch_shape: (usize, usize),
    overlapping_factor: usize,
) -> Result<Vec<Array3<c64>>, Error> {
    let (h, w, _) = image.dim();
    let step = check_tiling((h, w), patch_shape, overlapping_factor)?;
    let mut patches = Vec::new();
    let mut i = 0;
    while i + patch_shape.0 <= h {
        let mut j = 0;
        while j + patch_shape.1 <= w {
            patches.push(
                image
                    .slice(s![i..i + patch_shape.0, j..j + patch_shape.1, ..])
                    .to_owned(),
            );
            j += step.1;
        }
        i += step.0;
    }
    Ok(patches)
}

/// Stitch patches back into an `(h, w, channels)` image.
///
/// Output patch `i` lands at the spatial location input patch `i` was
/// extracted from; overlapped contributions are averaged, which for a
/// disjoint tiling reduces to an exact inverse of [`extract_patches`].
pub fn reconstruct_patches(
    patches: &[Array3<c64>],
    img_shape: (usize, usize, usize),
    patch_shape: (usize, usize),
    overlapping_factor: usize,
) -> Result<Array3<c64>, Error> {
    let (h, w, _) = img_shape;
    let step = check_tiling((h, w), patch_shape, overlapping_factor)?;
    let mut acc = Array3::<c64>::zeros(img_shape);
    let mut counts = Array2::<f64>::zeros((h, w));
    let mut idx = 0;
    let mut i = 0;
    while i + patch_shape.0 <= h {
        let mut j = 0;
        while j + patch_shape.1 <= w {
            let patch = patches.get(idx).ok_or(Error::ShapeMismatch {
                data: vec![patches.len()],
                expected: vec![idx + 1],
            })?;
            acc.slice_mut(s![i..i + patch_shape.0, j..j + patch_shape.1, ..])
                .zip_mut_with(patch, |a, p| *a += *p);
            counts
                .slice_mut(s![i..i + patch_shape.0, j..j + patch_shape.1])
                .mapv_inplace(|v| v + 1.0);
            idx += 1;
            j += step.1;
        }
        i += step.0;
    }
    for ((r, c, _), v) in acc.indexed_iter_mut() {
        *v = *v / counts[[r, c]];
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::l2_norm;

    fn test_stack(h: usize, w: usize, c: usize) -> Array3<c64> {
        Array3::from_shape_fn((h, w, c), |(i, j, l)| {
            c64::new((i * w + j) as f64 + 0.1 * l as f64, (j + l) as f64 / 3.0)
        })
    }

    #[test]
    fn disjoint_round_trip_is_exact() {
        let img = test_stack(4, 6, 2);
        let patches = extract_patches(img.view(), (2, 3), 1).unwrap();
        assert_eq!(patches.len(), 4);
        let back = reconstruct_patches(&patches, (4, 6, 2), (2, 3), 1).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn overlapped_round_trip_averages_back() {
        let img = test_stack(4, 4, 1);
        let patches = extract_patches(img.view(), (2, 2), 2).unwrap();
        assert_eq!(patches.len(), 9);
        let back = reconstruct_patches(&patches, (4, 4, 1), (2, 2), 2).unwrap();
        assert!(l2_norm((&back - &img).view()) < 1e-12);
    }

    #[test]
    fn non_tiling_shapes_fail() {
        let img = test_stack(5, 4, 1);
        assert!(extract_patches(img.view(), (2, 2), 1).is_err());
        assert!(extract_patches(test_stack(4, 4, 1).view(), (3, 2), 2).is_err());
    }
}
