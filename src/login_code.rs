//! Terminal rendering of WhatsApp login codes

use qrcode::render::unicode;
use qrcode::QrCode;
use tracing::error;

use crate::error::{Error, Result};

/// Render a login token as a QR code made of half-block characters.
pub fn render(token: &str) -> Result<String> {
    let code = QrCode::new(token.as_bytes())
        .map_err(|e| Error::InvalidArgument(format!("login code cannot be encoded: {}", e)))?;

    // Inverted so the code reads on dark terminal themes.
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Print the code and scanning instructions to stdout.
pub fn present(token: &str) {
    match render(token) {
        Ok(qr) => {
            println!("{}", qr);
            println!("📱 Scan the code above in WhatsApp: Settings → Linked devices → Link a device");
        }
        Err(err) => error!("Failed to render login code: {}", err),
    }
}
