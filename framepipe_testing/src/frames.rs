//! Tagged frames and a scripted engine for end-to-end tests.
//!
//! Every test frame is a 2x1 RGB image. The red channel of pixel (0, 0)
//! scripts what [`ScriptedEngine`] does with it; the red channel of pixel
//! (1, 0) carries an identifier that survives lossless round trips, letting
//! tests read back which frame they received.

use std::{io::Cursor, thread, time::Duration};

use framepipe::engine::{EngineError, EngineInitError, PipelineEngine};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Script tag making [`ScriptedEngine`] return an error.
pub const FAIL: u8 = 254;
/// Script tag making [`ScriptedEngine`] panic.
pub const PANIC: u8 = 255;

/// Engine driven by the script tag of each frame.
///
/// `FAIL` yields an [`EngineError`], `PANIC` panics, and any other value is
/// a processing delay in milliseconds after which the frame is returned
/// unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptedEngine;

impl PipelineEngine for ScriptedEngine {
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError> {
        match script_tag(&image) {
            FAIL => Err(EngineError::new("scripted failure")),
            PANIC => panic!("scripted panic"),
            ms => {
                thread::sleep(Duration::from_millis(u64::from(ms)));
                Ok(image)
            }
        }
    }
}

/// Factory building a [`ScriptedEngine`] per worker.
pub fn scripted_factory() -> fn() -> Result<ScriptedEngine, EngineInitError> {
    || Ok(ScriptedEngine)
}

/// Build a tagged frame image.
pub fn tagged_image(tag: u8, id: u8) -> DynamicImage {
    let mut image = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
    image.put_pixel(0, 0, Rgb([tag, 0, 0]));
    image.put_pixel(1, 0, Rgb([id, 0, 0]));
    DynamicImage::ImageRgb8(image)
}

/// Build a tagged frame encoded as PNG, ready to send over the wire.
///
/// # Panics
///
/// Panics if PNG encoding fails.
pub fn tagged_png(tag: u8, id: u8) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    tagged_image(tag, id)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test frame");
    out.into_inner()
}

/// Script tag of a decoded frame.
pub fn script_tag(image: &DynamicImage) -> u8 { image.to_rgb8().get_pixel(0, 0).0[0] }

/// Identifier carried by an encoded frame received from the server.
///
/// # Panics
///
/// Panics if `payload` is not a decodable image.
pub fn read_id(payload: &[u8]) -> u8 {
    let image = image::load_from_memory(payload).expect("decode returned frame");
    image.to_rgb8().get_pixel(1, 0).0[0]
}
