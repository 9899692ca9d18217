//! Formatting of panic payloads for logs.
//!
//! Engine panics are caught on the worker thread and reported through the
//! logging facade; these helpers turn the opaque payload into text.

use std::{any::Any, fmt};

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use framepipe::panic::format_panic;
/// assert_eq!(format_panic(Box::new("engine exploded")).to_string(), "engine exploded");
/// assert_eq!(
///     format_panic(Box::new(String::from("bad frame"))).to_string(),
///     "bad frame"
/// );
/// assert!(format_panic(Box::new(7_u8)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// Borrow the payload as text when it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.0.downcast_ref::<&'static str>().copied())
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => f.write_str(s),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }
