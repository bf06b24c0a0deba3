//! QR code decoder using rqrr

use crate::qr::{DecodePrimitive, InversionMode};
use image::{DynamicImage, GrayImage, imageops};

/// QR code decoder
#[derive(Debug, Clone, Default)]
pub struct QrDecoder {}

impl QrDecoder {
    /// Create a new QR decoder with default settings
    pub fn new() -> Self {
        Self {}
    }

    /// Decode a QR code from an image
    pub fn decode_image(&self, img: &DynamicImage, mode: InversionMode) -> Option<String> {
        self.decode(&img.to_luma8(), mode)
    }

    fn decode_pass(&self, raster: &GrayImage) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare(raster.clone());
        let grids = prepared.detect_grids();

        for grid in grids {
            match grid.decode() {
                Ok((meta, content)) => {
                    tracing::debug!(
                        "Decoded QR: version={:?}, ecc_level={:?}, length={}",
                        meta.version,
                        meta.ecc_level,
                        content.len()
                    );
                    if !content.is_empty() {
                        return Some(content);
                    }
                }
                Err(e) => {
                    tracing::debug!("Grid decode failed: {:?}", e);
                }
            }
        }

        None
    }
}

impl DecodePrimitive for QrDecoder {
    fn decode(&self, raster: &GrayImage, mode: InversionMode) -> Option<String> {
        if let Some(content) = self.decode_pass(raster) {
            return Some(content);
        }

        match mode {
            InversionMode::DontInvert => None,
            InversionMode::AttemptBoth => {
                let mut inverted = raster.clone();
                imageops::invert(&mut inverted);
                self.decode_pass(&inverted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use qrcode::QrCode;

    fn render(data: &str) -> GrayImage {
        QrCode::new(data.as_bytes())
            .expect("encode fixture")
            .render::<Luma<u8>>()
            .min_dimensions(240, 240)
            .build()
    }

    #[test]
    fn test_decode_rendered_code() {
        let decoder = QrDecoder::new();
        let raster = render("WO-2291");
        assert_eq!(
            decoder.decode(&raster, InversionMode::DontInvert).as_deref(),
            Some("WO-2291")
        );
    }

    #[test]
    fn test_blank_raster_has_no_code() {
        let decoder = QrDecoder::new();
        let blank = GrayImage::from_pixel(200, 200, Luma([255u8]));
        assert!(decoder.decode(&blank, InversionMode::AttemptBoth).is_none());
    }

    #[test]
    fn test_inverted_code_needs_attempt_both() {
        let decoder = QrDecoder::new();
        let mut raster = render("https://ops.example.com/c/K7Q2");
        imageops::invert(&mut raster);
        assert_eq!(
            decoder.decode(&raster, InversionMode::AttemptBoth).as_deref(),
            Some("https://ops.example.com/c/K7Q2")
        );
    }

    #[test]
    fn test_decode_dynamic_image() {
        let decoder = QrDecoder::new();
        let img = DynamicImage::ImageLuma8(render("K7Q2")).to_rgb8();
        assert_eq!(
            decoder
                .decode_image(&DynamicImage::ImageRgb8(img), InversionMode::DontInvert)
                .as_deref(),
            Some("K7Q2")
        );
    }
}
