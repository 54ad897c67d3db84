use image::{ImageBuffer, Luma};
use qrcode::render::svg;
use qrcode::QrCode;

use crate::services::credential::{Credential, CredentialError};

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("Credential serialization failed: {0}")]
    CredentialError(#[from] CredentialError),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),
}

/// Each QR module is drawn as a square of this many pixels
const MODULE_SIZE: u32 = 10;

fn qr_for(credential: &Credential) -> Result<QrCode, QrGenerationError> {
    let payload = credential.to_payload()?;
    Ok(QrCode::new(payload.as_bytes())?)
}

/// Renders a credential as an SVG QR code
pub fn generate_qr_svg(credential: &Credential) -> Result<String, QrGenerationError> {
    let code = qr_for(credential)?;

    Ok(code.render::<svg::Color>().min_dimensions(200, 200).build())
}

/// Renders a credential as a PNG QR code
pub fn generate_qr_png(credential: &Credential) -> Result<Vec<u8>, QrGenerationError> {
    let code = qr_for(credential)?;

    let width = code.width() as u32;
    let img_size = width * MODULE_SIZE;

    let mut img = ImageBuffer::<Luma<u8>, Vec<u8>>::new(img_size, img_size);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let module = code[((x / MODULE_SIZE) as usize, (y / MODULE_SIZE) as usize)];
        *pixel = match module {
            qrcode::types::Color::Dark => Luma([0u8]),
            qrcode::types::Color::Light => Luma([255u8]),
        };
    }

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credential::CredentialCodec;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn credential() -> Credential {
        CredentialCodec::new(b"qr-tests")
            .encode(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "QR-000123",
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_qr_svg_generation() {
        let svg = generate_qr_svg(&credential()).unwrap();

        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_qr_png_generation() {
        let png = generate_qr_png(&credential()).unwrap();

        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
