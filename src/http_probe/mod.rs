pub mod capture;
pub mod error;
pub mod probe;
pub mod result;

pub mod prelude {
    pub use super::capture::CapturedCertificate;
    pub use super::error::ProbeError;
    pub use super::probe::{ConnectionProbe, ProbeSettings};
    pub use super::result::{ProbeOutcome, ProbeResult};
}

use std::fmt::Write;

/// Flattens an error and its sources into one line, skipping causes whose
/// text is already part of the message.
pub(crate) fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let text = src.to_string();
        if !s.contains(&text) {
            let _ = write!(s, ": {}", text);
        }
        err = src;
    }
    s
}
