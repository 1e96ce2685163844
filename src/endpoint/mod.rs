
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,

    #[error("unsupported scheme '{0}', only http and https can be probed")]
    UnsupportedScheme(String),

    #[error("'{endpoint}' is not a valid URL: {reason}")]
    InvalidUrl { endpoint: String, reason: String },

    #[error("'{0}' does not contain a host name")]
    MissingHost(String),
}

/// A user supplied endpoint, either a bare host (`example.com:8443/health`) or
/// a URL with an explicit `http`/`https` scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    raw: String,
    host: String,
    probe_url: Url,
}

impl Endpoint {
    /// Parses the raw endpoint string.
    ///
    /// Bare hosts are probed over `https`. An explicit `http://` or `https://`
    /// prefix is kept as given; any other scheme is rejected.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(EndpointError::Empty);
        }

        let candidate = match explicit_scheme(raw) {
            Some(scheme) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
                raw.to_string()
            }
            Some(scheme) => return Err(EndpointError::UnsupportedScheme(scheme.to_string())),
            None => format!("https://{raw}"),
        };

        let probe_url = Url::parse(&candidate).map_err(|e| EndpointError::InvalidUrl {
            endpoint: raw.to_string(),
            reason: e.to_string(),
        })?;

        let host = probe_url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| EndpointError::MissingHost(raw.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            host,
            probe_url,
        })
    }

    /// The endpoint exactly as the user typed it (trimmed).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Host name only, as handed to the route tracer.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn probe_url(&self) -> &Url {
        &self.probe_url
    }
}

fn explicit_scheme(raw: &str) -> Option<&str> {
    let (scheme, _) = raw.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}
