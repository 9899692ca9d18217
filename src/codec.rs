//! Image codec used at the wire boundary.
//!
//! Inbound WebSocket payloads are decoded into [`DynamicImage`]s by the I/O
//! loop; processed frames are encoded by the workers. Encoded output is held
//! as [`Bytes`] so the reassembly buffer and the dispatcher can share it
//! without copying.

use std::fmt;

use bytes::Bytes;
use image::{
    DynamicImage,
    ImageError,
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
};
use thiserror::Error;

/// Default JPEG quality used for outbound frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Errors raised while decoding or encoding frames.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload was empty.
    #[error("empty payload")]
    Empty,
    /// The payload could not be parsed as an image.
    #[error("undecodable image: {0}")]
    Decode(#[source] ImageError),
    /// The image could not be serialised in the configured format.
    #[error("unencodable image: {0}")]
    Encode(#[source] ImageError),
    /// The image has no pixels.
    #[error("image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// Serialisation of frames to and from wire bytes.
pub trait ImageCodec: Send + Sync + 'static {
    /// Decode an inbound payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload is not a supported image.
    fn decode(&self, payload: &[u8]) -> Result<DynamicImage, CodecError>;

    /// Encode a processed frame for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the frame cannot be serialised.
    fn encode(&self, image: &DynamicImage) -> Result<Bytes, CodecError>;
}

/// Wire format for outbound frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy JPEG at the given quality (1-100).
    Jpeg { quality: u8 },
    /// Lossless PNG.
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg { quality } => write!(f, "jpeg(q={quality})"),
            Self::Png => f.write_str("png"),
        }
    }
}

/// [`ImageCodec`] backed by the `image` crate.
///
/// Decoding sniffs the payload format; encoding uses the configured
/// [`OutputFormat`].
///
/// ```
/// use framepipe::codec::{ImageCodec, ImageFormatCodec, OutputFormat};
/// use image::{DynamicImage, RgbImage};
///
/// let codec = ImageFormatCodec::new(OutputFormat::Png);
/// let frame = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
/// let bytes = codec.encode(&frame).expect("encode");
/// assert_eq!(codec.decode(&bytes).expect("decode").width(), 2);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageFormatCodec {
    format: OutputFormat,
}

impl ImageFormatCodec {
    /// Create a codec emitting `format`.
    ///
    /// JPEG quality is clamped to `1..=100`.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        let format = match format {
            OutputFormat::Jpeg { quality } => OutputFormat::Jpeg {
                quality: quality.clamp(1, 100),
            },
            OutputFormat::Png => OutputFormat::Png,
        };
        Self { format }
    }

    /// The configured output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat { self.format }
}

impl ImageCodec for ImageFormatCodec {
    fn decode(&self, payload: &[u8]) -> Result<DynamicImage, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::Empty);
        }
        let image = image::load_from_memory(payload).map_err(CodecError::Decode)?;
        ensure_area(&image)?;
        Ok(image)
    }

    fn encode(&self, image: &DynamicImage) -> Result<Bytes, CodecError> {
        ensure_area(image)?;
        let mut buf = Vec::new();
        match self.format {
            OutputFormat::Jpeg { quality } => {
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
                // JPEG carries neither alpha nor 16-bit samples.
                match image {
                    DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => {
                        image.write_with_encoder(encoder)
                    }
                    other => DynamicImage::ImageRgb8(other.to_rgb8()).write_with_encoder(encoder),
                }
            }
            OutputFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buf)),
        }
        .map_err(CodecError::Encode)?;
        Ok(Bytes::from(buf))
    }
}

fn ensure_area(image: &DynamicImage) -> Result<(), CodecError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(CodecError::ZeroArea { width, height });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn frame() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([10, 120, 200])))
    }

    #[rstest]
    #[case(OutputFormat::Png)]
    #[case(OutputFormat::Jpeg { quality: 80 })]
    fn encoded_frames_decode(frame: DynamicImage, #[case] format: OutputFormat) {
        let codec = ImageFormatCodec::new(format);
        let bytes = codec.encode(&frame).expect("encode");
        let decoded = codec.decode(&bytes).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn jpeg_accepts_alpha_frames() {
        let codec = ImageFormatCodec::default();
        let frame = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 4])));
        assert!(codec.encode(&frame).is_ok());
    }

    #[rstest]
    #[case(&[][..])]
    #[case(&b"definitely not an image"[..])]
    fn garbage_fails_to_decode(#[case] payload: &[u8]) {
        assert!(ImageFormatCodec::default().decode(payload).is_err());
    }

    #[test]
    fn zero_area_frames_fail_to_encode() {
        let codec = ImageFormatCodec::new(OutputFormat::Png);
        let frame = DynamicImage::ImageRgb8(RgbImage::new(0, 4));
        let err = codec.encode(&frame).expect_err("zero-area frame must fail");
        assert!(matches!(err, CodecError::ZeroArea { width: 0, height: 4 }));
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        let codec = ImageFormatCodec::new(OutputFormat::Jpeg { quality: 0 });
        assert_eq!(codec.format(), OutputFormat::Jpeg { quality: 1 });
    }
}
