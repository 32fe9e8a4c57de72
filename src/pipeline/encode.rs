//! Image encoding: rendered PNG → base64 `ImageData` for the VLM request.
//!
//! Pages are rendered straight to PNG, so this stage only wraps the bytes.
//! `detail: "high"` matters here more than for full-text OCR: the magnifier
//! glyph sits in the margin and is only a few dozen pixels wide, which
//! OpenAI's single 512 px low-detail tile blurs away.

use crate::pipeline::render::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap a rendered page as a base64 PNG ready for the VLM API.
pub fn encode_page(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(page.png());
    debug!(
        "Encoded page {} → {} bytes base64",
        page.page_index + 1,
        b64.len()
    );
    ImageData::new(b64, "image/png").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let page = PageImage::from_image("doc", 0, 150, &img).expect("png encode");
        let data = encode_page(&page);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, page.png());
    }
}
