//! Small grayscale image operations shared by the extractors.

use image::imageops;
use ndarray::{Array1, Array2};

use crate::data_handling::FloatImage;

/// Largest square region about the image centre.
pub fn center_square(image: &FloatImage) -> FloatImage {
    let side = image.width().min(image.height());
    let x = (image.width() - side) / 2;
    let y = (image.height() - side) / 2;
    imageops::crop_imm(image, x, y, side, side).to_image()
}

/// Area-averaging resize. Upscaling falls back to bilinear interpolation.
pub fn resize_area(image: &FloatImage, width: u32, height: u32) -> FloatImage {
    if width > image.width() || height > image.height() {
        imageops::resize(image, width, height, imageops::FilterType::Triangle)
    } else {
        imageops::thumbnail(image, width, height)
    }
}

/// Linearly rescale intensities to `[0, 1]`. A constant image becomes all zeros.
pub fn normalise(image: &mut FloatImage) {
    let (min, max) = image
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[0]), hi.max(p[0]))
        });
    let range = max - min;
    for p in image.pixels_mut() {
        p[0] = if range > 0.0 { (p[0] - min) / range } else { 0.0 };
    }
}

/// Subtract the mean from every element.
pub fn mean_center(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    for v in values.iter_mut() {
        *v -= mean;
    }
}

/// Scale to unit L2 norm; a zero vector is left untouched.
pub fn l2_normalize(values: &mut [f64]) {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// Scale to unit L1 norm; a zero vector is left untouched.
pub fn l1_normalize(values: &mut [f64]) {
    let norm = values.iter().map(|v| v.abs()).sum::<f64>();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn l2_normalized(mut values: Array1<f64>) -> Array1<f64> {
    if let Some(slice) = values.as_slice_mut() {
        l2_normalize(slice);
    }
    values
}

/// Row-major pixel vector.
pub fn pixel_vector(image: &FloatImage) -> Vec<f64> {
    image.pixels().map(|p| p[0] as f64).collect()
}

/// Pixels as a `(height, width)` matrix.
pub fn to_array2(image: &FloatImage) -> Array2<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    Array2::from_shape_fn((h, w), |(y, x)| image.get_pixel(x as u32, y as u32)[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_center_square_of_landscape_image() {
        let img = FloatImage::from_fn(10, 6, |x, _| Luma([x as f32]));
        let square = center_square(&img);
        assert_eq!(square.dimensions(), (6, 6));
        // columns 2..8 of the original
        assert_eq!(square.get_pixel(0, 0)[0], 2.0);
        assert_eq!(square.get_pixel(5, 5)[0], 7.0);
    }

    #[test]
    fn test_normalise_constant_image_is_zero() {
        let mut img = FloatImage::from_pixel(3, 3, Luma([0.4]));
        normalise(&mut img);
        assert!(img.pixels().all(|p| p[0] == 0.0));
    }

    #[test]
    fn test_normalise_spans_unit_range() {
        let mut img = FloatImage::from_fn(4, 1, |x, _| Luma([0.2 + x as f32 * 0.1]));
        normalise(&mut img);
        assert!((img.get_pixel(0, 0)[0] - 0.0).abs() < 1e-6);
        assert!((img.get_pixel(3, 0)[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_leaves_zero_vector() {
        let mut v = vec![0.0; 5];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 5]);
    }

    #[test]
    fn test_resize_area_averages_blocks() {
        let img = FloatImage::from_fn(4, 4, |x, y| Luma([if x < 2 && y < 2 { 1.0 } else { 0.0 }]));
        let small = resize_area(&img, 2, 2);
        assert_eq!(small.dimensions(), (2, 2));
        assert!((small.get_pixel(0, 0)[0] - 1.0).abs() < 1e-5);
        assert!(small.get_pixel(1, 1)[0].abs() < 1e-5);
    }
}
