//! OCR fallback for scanned documents.

#[cfg(feature = "ocr")]
mod pure_engine;

#[cfg(feature = "ocr")]
pub use pure_engine::PureOcrEngine;

use std::sync::Arc;

use image::DynamicImage;

use crate::error::OcrError;
use crate::models::config::OcrConfig;

/// Recognizes the text on a page image.
pub trait OcrBackend: Send + Sync {
    /// Text of the image, lines in reading order.
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// Build the configured OCR backend, if OCR is enabled and available.
///
/// A missing model directory disables OCR instead of failing the run.
pub fn backend_from_config(config: &OcrConfig) -> Option<Arc<dyn OcrBackend>> {
    if !config.enabled {
        tracing::info!("OCR disabled by configuration");
        return None;
    }
    load_backend(config)
}

#[cfg(feature = "ocr")]
fn load_backend(config: &OcrConfig) -> Option<Arc<dyn OcrBackend>> {
    match PureOcrEngine::from_dir(&config.model_dir, config.clone()) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            tracing::warn!("OCR unavailable, scanned documents will not be read: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "ocr"))]
fn load_backend(_config: &OcrConfig) -> Option<Arc<dyn OcrBackend>> {
    tracing::warn!("Built without the `ocr` feature, scanned documents will not be read");
    None
}
