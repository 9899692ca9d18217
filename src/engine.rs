//! Pipeline engine boundary.
//!
//! A [`PipelineEngine`] is the opaque frame transform run by each worker. The
//! pool never shares an engine between threads: every worker asks the
//! [`EngineFactory`] for its own instance when it starts, so engines need not
//! be `Send` or `Sync`.
//!
//! [`EngineConfig`] is the built-in factory. It carries the configuration
//! bundle for the engines shipped with the crate and validates it each time a
//! worker builds an engine.

use std::fmt;

use image::{DynamicImage, GrayImage, Luma};
use thiserror::Error;

/// Error returned by [`PipelineEngine::process`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Create an error with a human-readable description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned when a worker cannot construct its engine.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineInitError {
    /// A numeric parameter fell outside its accepted range.
    #[error("invalid engine parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f32,
        reason: &'static str,
    },
    /// Engine-specific construction failure.
    #[error("{0}")]
    Other(String),
}

/// Opaque frame-to-frame transform.
pub trait PipelineEngine {
    /// Transform one decoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the frame cannot be processed. The worker
    /// drops the frame and records a loss marker for its sequence number.
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError>;
}

impl<E: PipelineEngine + ?Sized> PipelineEngine for Box<E> {
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError> {
        (**self).process(image)
    }
}

/// Builds one [`PipelineEngine`] per worker.
///
/// Closures returning `Result<E, EngineInitError>` implement this trait, so
/// tests and embedders can supply engines without a dedicated type.
///
/// ```
/// use framepipe::engine::{EngineFactory, EngineInitError, Identity};
///
/// let factory = || Ok::<_, EngineInitError>(Identity);
/// assert!(factory.build().is_ok());
/// ```
pub trait EngineFactory: Send + Sync + 'static {
    /// Engine type produced for each worker.
    type Engine: PipelineEngine;

    /// Construct a fresh engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineInitError`] if the engine cannot be built. The calling
    /// worker exits and the pool continues with one fewer worker.
    fn build(&self) -> Result<Self::Engine, EngineInitError>;
}

impl<F, E> EngineFactory for F
where
    F: Fn() -> Result<E, EngineInitError> + Send + Sync + 'static,
    E: PipelineEngine,
{
    type Engine = E;

    fn build(&self) -> Result<E, EngineInitError> { self() }
}

/// Pass-through engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl PipelineEngine for Identity {
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError> { Ok(image) }
}

/// Converts frames to 8-bit luma.
#[derive(Clone, Copy, Debug, Default)]
pub struct Grayscale;

impl PipelineEngine for Grayscale {
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError> {
        Ok(DynamicImage::ImageLuma8(image.to_luma8()))
    }
}

/// Binarises luma at a fixed cut-off.
#[derive(Clone, Copy, Debug)]
pub struct Threshold {
    cutoff: u8,
}

impl Threshold {
    /// Build a threshold engine from a normalised cut-off in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineInitError::InvalidParameter`] when `threshold` is not a
    /// finite value within `[0, 1]`.
    pub fn new(threshold: f32) -> Result<Self, EngineInitError> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(EngineInitError::InvalidParameter {
                name: "threshold",
                value: threshold,
                reason: "must lie within [0, 1]",
            });
        }
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "threshold is validated to [0, 1] so the product fits in u8"
        )]
        let cutoff = (threshold * 255.0).round() as u8;
        Ok(Self { cutoff })
    }

    /// The 8-bit cut-off applied to luma values.
    #[must_use]
    pub const fn cutoff(&self) -> u8 { self.cutoff }
}

impl PipelineEngine for Threshold {
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError> {
        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        let cutoff = self.cutoff;
        let out = GrayImage::from_fn(width, height, |x, y| {
            let Luma([value]) = *luma.get_pixel(x, y);
            Luma([if value >= cutoff { u8::MAX } else { 0 }])
        });
        Ok(DynamicImage::ImageLuma8(out))
    }
}

/// Built-in engine selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// Return frames unchanged.
    #[default]
    Identity,
    /// Convert frames to grayscale.
    Grayscale,
    /// Binarise frames at [`EngineConfig::threshold`].
    Threshold,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::Grayscale => "grayscale",
            Self::Threshold => "threshold",
        })
    }
}

/// Configuration bundle for the built-in engines.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Which engine each worker builds.
    pub kind: EngineKind,
    /// Normalised cut-off used by [`EngineKind::Threshold`].
    pub threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Identity,
            threshold: 0.5,
        }
    }
}

/// Engine produced by [`EngineConfig`].
#[derive(Clone, Copy, Debug)]
pub enum BuiltinEngine {
    Identity(Identity),
    Grayscale(Grayscale),
    Threshold(Threshold),
}

impl PipelineEngine for BuiltinEngine {
    fn process(&mut self, image: DynamicImage) -> Result<DynamicImage, EngineError> {
        match self {
            Self::Identity(engine) => engine.process(image),
            Self::Grayscale(engine) => engine.process(image),
            Self::Threshold(engine) => engine.process(image),
        }
    }
}

impl EngineFactory for EngineConfig {
    type Engine = BuiltinEngine;

    fn build(&self) -> Result<BuiltinEngine, EngineInitError> {
        Ok(match self.kind {
            EngineKind::Identity => BuiltinEngine::Identity(Identity),
            EngineKind::Grayscale => BuiltinEngine::Grayscale(Grayscale),
            EngineKind::Threshold => BuiltinEngine::Threshold(Threshold::new(self.threshold)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use rstest::rstest;

    use super::*;

    fn solid(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, Rgb([value, value, value])))
    }

    #[test]
    fn identity_returns_frame_unchanged() {
        let frame = solid(42);
        let out = Identity.process(frame.clone()).expect("identity never fails");
        assert_eq!(out, frame);
    }

    #[test]
    fn grayscale_produces_luma() {
        let out = Grayscale.process(solid(42)).expect("grayscale never fails");
        assert!(matches!(out, DynamicImage::ImageLuma8(_)));
        assert_eq!((out.width(), out.height()), (4, 3));
    }

    #[rstest]
    #[case(200, 255)]
    #[case(20, 0)]
    fn threshold_binarises(#[case] input: u8, #[case] expected: u8) {
        let mut engine = Threshold::new(0.5).expect("valid threshold");
        let out = engine.process(solid(input)).expect("threshold never fails");
        let luma = out.to_luma8();
        assert!(luma.pixels().all(|p| p.0 == [expected]));
    }

    #[rstest]
    #[case(-0.1)]
    #[case(1.5)]
    #[case(f32::NAN)]
    fn threshold_rejects_out_of_range(#[case] value: f32) {
        let err = Threshold::new(value).expect_err("threshold must be rejected");
        assert!(matches!(err, EngineInitError::InvalidParameter { name: "threshold", .. }));
    }

    #[rstest]
    #[case(EngineKind::Identity)]
    #[case(EngineKind::Grayscale)]
    #[case(EngineKind::Threshold)]
    fn config_builds_each_kind(#[case] kind: EngineKind) {
        let config = EngineConfig {
            kind,
            ..EngineConfig::default()
        };
        assert!(config.build().is_ok());
    }

    #[test]
    fn config_surfaces_invalid_threshold() {
        let config = EngineConfig {
            kind: EngineKind::Threshold,
            threshold: 2.0,
        };
        assert!(config.build().is_err());
    }
}
