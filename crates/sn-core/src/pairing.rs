//! Login pairing image
//!
//! Renders the gateway's pairing string as a scannable QR code PNG.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::store::write_atomic;

/// Minimum edge length of the rendered image in pixels
pub const QR_SIZE: u32 = 512;

/// Encode `code` as a PNG QR image (highest error correction)
pub fn encode_png(code: &str) -> Result<Vec<u8>> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::H)
        .map_err(|e| Error::Image(e.to_string()))?;

    let img = qr
        .render::<Luma<u8>>()
        .min_dimensions(QR_SIZE, QR_SIZE)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| Error::Image(e.to_string()))?;
    Ok(png)
}

/// Write the pairing image for `code` to `path`
pub async fn write_pairing_image(code: &str, path: &Path) -> Result<()> {
    let png = encode_png(code)?;
    write_atomic(path, &png).await
}

/// Spawn the task that waits for exactly one pairing string
///
/// The lifecycle aborts the returned handle once login finishes.
pub fn spawn_pairing_task(rx: oneshot::Receiver<String>, path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(code) = rx.await else {
            return;
        };

        match write_pairing_image(&code, &path).await {
            Ok(()) => info!("QR code written to {}. Kindly scan and login", path.display()),
            Err(e) => error!("Error writing QR code to {}: {}", path.display(), e),
        }
    })
}
