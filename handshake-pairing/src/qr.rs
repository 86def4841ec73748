use anyhow::Result;
use qrcode::{render::svg, EcLevel, QrCode};
use qrcodegen::{QrCode as QrCodeGen, QrCodeEcc};

/// Render QR text as SVG
pub fn render_qr_svg(text: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::H)?;
    let svg = code
        .render()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Ok(svg)
}

/// Render QR text as terminal-friendly blocks.
pub fn render_qr_ascii(text: &str) -> Result<String> {
    let qr = QrCodeGen::encode_text(text, QrCodeEcc::Medium)?;
    Ok(blocks(&qr))
}

fn blocks(qr: &QrCodeGen) -> String {
    let size = qr.size();
    let quiet = 2;

    let mut out = String::new();
    for y in (-quiet)..(size + quiet) {
        for x in (-quiet)..(size + quiet) {
            // get_module is false outside the symbol, which draws the quiet zone
            out.push_str(if qr.get_module(x, y) { "██" } else { "  " });
        }
        out.push('\n');
    }
    out
}
