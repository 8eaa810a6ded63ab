// src/services/verification_code.rs
//! Verification code encoding.
//!
//! Builds the canonical verification URL
//! `<origin>/verify?did=<identity>&hash=<fingerprint>` and renders it as a
//! PNG QR code. Output depends only on the inputs and the configured origin,
//! margin and width.

use crate::error::{AnchorError, Result};
use crate::models::credential::ContentFingerprint;
use crate::models::did::Identity;
use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, QrCode};
use serde::Serialize;
use std::io::Cursor;

/// Builds a verification URL from raw parameter values.
///
/// Both values are percent-encoded, so identities or fingerprints containing
/// URL-reserved characters survive a round trip through
/// [`crate::services::verification_query::parse_verification_url`].
pub fn build_verification_url(origin: &str, did: &str, hash: &str) -> String {
    format!(
        "{}/verify?did={}&hash={}",
        origin.trim_end_matches('/'),
        urlencoding::encode(did),
        urlencoding::encode(hash)
    )
}

/// A rendered verification code.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationCode {
    /// Plain URL, the textual fallback for the image
    pub url: String,
    #[serde(skip)]
    pub png: Vec<u8>,
    /// `data:image/png;base64,...`
    pub data_url: String,
}

#[derive(Debug, Clone)]
pub struct VerificationCodeEncoder {
    origin: String,
    /// Quiet zone, in modules
    margin: u32,
    /// Image width, in pixels
    width: u32,
}

impl VerificationCodeEncoder {
    pub fn new(origin: &str, margin: u32, width: u32) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            margin,
            width,
        }
    }

    pub fn verification_url(&self, identity: &Identity, fingerprint: &ContentFingerprint) -> String {
        build_verification_url(&self.origin, identity.as_str(), fingerprint.as_str())
    }

    /// Builds the URL and its QR rendering.
    ///
    /// # Errors
    /// Returns `AnchorError::Unknown` if the URL does not fit in a QR symbol
    /// or PNG encoding fails.
    pub fn encode(&self, identity: &Identity, fingerprint: &ContentFingerprint) -> Result<VerificationCode> {
        let url = self.verification_url(identity, fingerprint);
        let png = self.render(&url)?;
        let data_url = format!("data:image/png;base64,{}", base64::encode(&png));
        Ok(VerificationCode { url, png, data_url })
    }

    /// Renders `text` as a square greyscale PNG of `width` pixels.
    ///
    /// Modules are scaled fractionally so the symbol plus margin fills the
    /// requested width exactly; a width smaller than one pixel per module is
    /// raised to that minimum.
    fn render(&self, text: &str) -> Result<Vec<u8>> {
        let code = QrCode::new(text.as_bytes())
            .map_err(|e| AnchorError::Unknown(format!("cannot encode verification code: {}", e)))?;
        let modules = code.width() as u32;
        let colors = code.to_colors();

        let span = modules + 2 * self.margin;
        let width = self.width.max(span);
        let scale = width as f64 / span as f64;
        let margin_px = (self.margin as f64 * scale).floor() as i64;

        let image = GrayImage::from_fn(width, width, |x, y| {
            let mx = ((x as i64 - margin_px) as f64 / scale).floor() as i64;
            let my = ((y as i64 - margin_px) as f64 / scale).floor() as i64;
            let inside = (0..modules as i64).contains(&mx) && (0..modules as i64).contains(&my);
            if inside && colors[(my as usize) * modules as usize + mx as usize] == Color::Dark {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        });

        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| AnchorError::Unknown(format!("cannot render verification code: {}", e)))?;
        Ok(png.into_inner())
    }
}
