use std::io::Cursor;

use anytext_contracts::receipts::MaskKind;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, Luma, Rgb, RgbImage, RgbaImage};
use ndarray::{Array2, Array4, ArrayView3, Axis};

use crate::error::JobError;

/// Side length of the mask returned for sources without alpha.
pub const PLACEHOLDER_MASK_SIZE: usize = 64;

/// RGB pixels in [0, 1], laid out `[batch = 1, height, width, channel = 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pixels: Array4<f32>,
}

impl DecodedImage {
    pub fn width(&self) -> usize {
        self.pixels.shape()[2]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn tensor(&self) -> &Array4<f32> {
        &self.pixels
    }

    /// The single frame as `[height, width, 3]`.
    pub fn frame(&self) -> ArrayView3<'_, f32> {
        self.pixels.index_axis(Axis(0), 0)
    }

    /// Quantizes back to 8-bit RGB for writing to disk.
    pub fn to_rgb8(&self) -> RgbImage {
        let frame = self.frame();
        RgbImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([
                to_u8(frame[[y, x, 0]]),
                to_u8(frame[[y, x, 1]]),
                to_u8(frame[[y, x, 2]]),
            ])
        })
    }
}

/// Per-pixel `1 - alpha`, in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct OpacityMask {
    values: Array2<f32>,
    placeholder: bool,
}

impl OpacityMask {
    fn placeholder() -> Self {
        Self {
            values: Array2::zeros((PLACEHOLDER_MASK_SIZE, PLACEHOLDER_MASK_SIZE)),
            placeholder: true,
        }
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// True when the source had no alpha and this is the fixed zero buffer.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn kind(&self) -> MaskKind {
        if self.placeholder {
            MaskKind::Placeholder
        } else {
            MaskKind::Alpha
        }
    }

    pub fn to_luma8(&self) -> GrayImage {
        GrayImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            Luma([to_u8(self.values[[y as usize, x as usize]])])
        })
    }
}

/// Decodes a downloaded asset into a float RGB batch and an opacity mask.
///
/// EXIF orientation is applied first. The RGBA pixels are then composited
/// over black using their own alpha, so fully transparent regions come out
/// as pure black no matter what RGB the encoder left there.
pub fn normalize(raw: &[u8]) -> Result<(DecodedImage, OpacityMask), JobError> {
    let image = decode_oriented(raw)?;
    let has_alpha = image.color().has_alpha();
    let rgba = image.to_rgba8();

    let image = DecodedImage {
        pixels: composite_over_black(&rgba)?,
    };
    let mask = if has_alpha {
        OpacityMask {
            values: inverted_alpha(&rgba),
            placeholder: false,
        }
    } else {
        OpacityMask::placeholder()
    };
    Ok((image, mask))
}

fn decode_oriented(raw: &[u8]) -> Result<DynamicImage, JobError> {
    let reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|err| JobError::Decode(format!("failed to sniff image format: {err}")))?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

fn composite_over_black(rgba: &RgbaImage) -> Result<Array4<f32>, JobError> {
    let (width, height) = rgba.dimensions();
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for pixel in rgba.pixels() {
        let alpha = u32::from(pixel[3]);
        for channel in &pixel.0[..3] {
            let blended = (u32::from(*channel) * alpha + 127) / 255;
            data.push(blended as f32 / 255.0);
        }
    }
    Array4::from_shape_vec((1, height as usize, width as usize, 3), data)
        .map_err(|err| JobError::Decode(format!("pixel buffer shape mismatch: {err}")))
}

fn inverted_alpha(rgba: &RgbaImage) -> Array2<f32> {
    let (width, height) = rgba.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        1.0 - f32::from(rgba.get_pixel(x as u32, y as u32)[3]) / 255.0
    })
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use image::{
        DynamicImage, ImageBuffer, ImageFormat, LumaA, Rgb, RgbImage, Rgba, RgbaImage,
    };

    use super::{normalize, PLACEHOLDER_MASK_SIZE};
    use crate::error::JobError;
    use crate::testing::encode;
    use anytext_contracts::receipts::MaskKind;

    fn rgba_png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        encode(
            &DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(pixel))),
            ImageFormat::Png,
        )
    }

    #[test]
    fn opaque_alpha_yields_zero_mask_with_source_dimensions() -> anyhow::Result<()> {
        let (image, mask) = normalize(&rgba_png(5, 3, [200, 100, 50, 255]))?;
        assert_eq!(image.tensor().shape(), &[1, 3, 5, 3]);
        assert_eq!((mask.width(), mask.height()), (5, 3));
        assert!(!mask.is_placeholder());
        assert!(mask.values().iter().all(|value| *value == 0.0));

        let frame = image.frame();
        assert_eq!(frame[[0, 0, 0]], 200.0 / 255.0);
        assert_eq!(frame[[2, 4, 1]], 100.0 / 255.0);
        assert_eq!(frame[[1, 2, 2]], 50.0 / 255.0);
        Ok(())
    }

    #[test]
    fn transparent_alpha_yields_full_mask_and_black_pixels() -> anyhow::Result<()> {
        // garbage RGB under zero alpha must not leak into the output
        let (image, mask) = normalize(&rgba_png(4, 4, [255, 0, 255, 0]))?;
        assert!(mask.values().iter().all(|value| *value == 1.0));
        assert!(image.tensor().iter().all(|value| *value == 0.0));
        assert_eq!(mask.kind(), MaskKind::Alpha);
        Ok(())
    }

    #[test]
    fn partial_alpha_is_premultiplied_against_black() -> anyhow::Result<()> {
        let (image, mask) = normalize(&rgba_png(1, 1, [255, 128, 0, 128]))?;
        let frame = image.frame();
        assert_eq!(frame[[0, 0, 0]], 128.0 / 255.0);
        assert_eq!(frame[[0, 0, 1]], 64.0 / 255.0);
        assert_eq!(frame[[0, 0, 2]], 0.0);
        let expected = 1.0 - 128.0 / 255.0;
        assert!((mask.values()[[0, 0]] - expected).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn sources_without_alpha_get_placeholder_mask() -> anyhow::Result<()> {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 120, Rgb([9, 9, 9])));
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let (image, mask) = normalize(&encode(&rgb, format))?;
            assert_eq!((image.width(), image.height()), (300, 120));
            assert!(mask.is_placeholder());
            assert_eq!(mask.kind(), MaskKind::Placeholder);
            assert_eq!(
                mask.values().shape(),
                &[PLACEHOLDER_MASK_SIZE, PLACEHOLDER_MASK_SIZE]
            );
            assert!(mask.values().iter().all(|value| *value == 0.0));
        }
        Ok(())
    }

    #[test]
    fn grayscale_alpha_sources_expand_to_rgb() -> anyhow::Result<()> {
        let gray: ImageBuffer<LumaA<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(2, 2, LumaA([51, 255]));
        let (image, mask) = normalize(&encode(&DynamicImage::ImageLumaA8(gray), ImageFormat::Png))?;
        let frame = image.frame();
        for channel in 0..3 {
            assert_eq!(frame[[1, 1, channel]], 51.0 / 255.0);
        }
        assert!(!mask.is_placeholder());
        Ok(())
    }

    #[test]
    fn values_always_stay_in_unit_range() -> anyhow::Result<()> {
        let noisy = RgbaImage::from_fn(16, 16, |x, y| {
            Rgba([
                (x * 16) as u8,
                (y * 16) as u8,
                ((x * y) % 256) as u8,
                ((x + y) * 8) as u8,
            ])
        });
        let (image, mask) = normalize(&encode(&DynamicImage::ImageRgba8(noisy), ImageFormat::Png))?;
        assert!(image.tensor().iter().all(|value| (0.0..=1.0).contains(value)));
        assert!(mask.values().iter().all(|value| (0.0..=1.0).contains(value)));
        Ok(())
    }

    #[test]
    fn exif_orientation_is_applied() -> anyhow::Result<()> {
        // 4x2 source tagged "rotate 90 clockwise" must come out 2x4
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, Rgb([128, 128, 128])));
        let jpeg = with_exif_orientation(&encode(&source, ImageFormat::Jpeg), 6);
        let (image, _) = normalize(&jpeg)?;
        assert_eq!((image.width(), image.height()), (2, 4));

        let plain = encode(&source, ImageFormat::Jpeg);
        let (image, _) = normalize(&plain)?;
        assert_eq!((image.width(), image.height()), (4, 2));
        Ok(())
    }

    #[test]
    fn round_trips_to_8_bit_images() -> anyhow::Result<()> {
        let (image, mask) = normalize(&rgba_png(3, 2, [10, 20, 30, 0]))?;
        let rgb = image.to_rgb8();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        let luma = mask.to_luma8();
        assert_eq!(luma.get_pixel(2, 1).0, [255]);
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_decode_errors() {
        assert!(matches!(normalize(b"not an image"), Err(JobError::Decode(_))));
        assert!(matches!(normalize(&[]), Err(JobError::Decode(_))));
    }

    /// Splices a big-endian EXIF APP1 segment carrying only an orientation
    /// tag right after the JPEG SOI marker.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"MM\x00\x2a");
        tiff.extend_from_slice(&8u32.to_be_bytes());
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&tiff);
        let segment_len = (payload.len() + 2) as u16;

        let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
        out.extend_from_slice(&jpeg[..2]);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&segment_len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }
}
