//! QR code generation for lobby join links
//!
//! The challenge service can render QR codes itself. When it can't, the
//! join URL is encoded locally so sharing never depends on that endpoint.

use crate::api::LobbyApi;
use crate::error::{LobbyError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use tracing::warn;

/// QR code options
#[derive(Debug, Clone, Default)]
pub struct QrOptions {
    /// Minimum width/height in pixels
    pub size: Option<u32>,
    /// Quiet zone around the code (default: on)
    pub quiet_zone: Option<bool>,
    /// Foreground color (hex)
    pub fg_color: Option<String>,
    /// Background color (hex)
    pub bg_color: Option<String>,
}

/// A shareable QR image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrImage {
    /// Opaque reference from the QR provider (URL or data URL)
    Remote(String),
    /// Locally rendered SVG data URL
    Local(String),
}

impl QrImage {
    pub fn as_str(&self) -> &str {
        match self {
            QrImage::Remote(s) | QrImage::Local(s) => s,
        }
    }
}

/// Generate QR code as SVG string
pub fn generate_qr_svg(data: &str, options: &QrOptions) -> Result<String> {
    let size = options.size.unwrap_or(200);
    let fg = options.fg_color.as_deref().unwrap_or("#000000");
    let bg = options.bg_color.as_deref().unwrap_or("#ffffff");

    let code = QrCode::new(data.as_bytes()).map_err(|e| LobbyError::Qr(e.to_string()))?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(size, size)
        .quiet_zone(options.quiet_zone.unwrap_or(true))
        .dark_color(svg::Color(fg))
        .light_color(svg::Color(bg))
        .build())
}

/// Generate QR code as data URL
pub fn generate_qr_data_url(data: &str, options: &QrOptions) -> Result<String> {
    let svg = generate_qr_svg(data, options)?;
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)))
}

/// Ask the provider for a QR image, rendering `join_url` locally if it fails.
pub async fn share_qr(
    api: &dyn LobbyApi,
    join_code: &str,
    join_url: &str,
    options: &QrOptions,
) -> Result<QrImage> {
    match api.qr_code(join_code).await {
        Ok(image) if !image.is_empty() => Ok(QrImage::Remote(image)),
        Ok(_) => {
            warn!("QR provider returned an empty image for {}", join_code);
            generate_qr_data_url(join_url, options).map(QrImage::Local)
        }
        Err(e) => {
            warn!("QR provider failed for {}: {}; rendering locally", join_code, e);
            generate_qr_data_url(join_url, options).map(QrImage::Local)
        }
    }
}
