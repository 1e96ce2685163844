//! Failure taxonomy for the connection probe.
//!
//! A [`ProbeError`] records which stage of the probe failed and the error that
//! stage produced. [`classify`] turns it into exactly one [`Diagnosis`], walking
//! from the most specific condition to the most generic one, and every
//! diagnosis renders to a fixed, user facing [`DiagnosticMessage`].

use std::fmt;
use std::io;

use rustls::client::VerifierBuilderError;
use rustls::{AlertDescription, CertificateError};

use crate::http_probe::{capture::CapturedCertificate, error::ProbeError, report};

/// The human readable text written to the report for one probe outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage(String);

impl DiagnosticMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Underlying cause of a TLS failure that is not a handshake rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsCause {
    MalformedCertificate,
    ContextSetup,
    TrustStore,
    MissingAlgorithm,
    Unknown(String),
}

/// Classified probe failure, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    UnresolvedHost,
    ConnectionRefused,
    TimedOut,
    SocketError,
    /// The peer's certificate was rejected. `subject` is set when the server
    /// presented a certificate during this probe.
    HandshakeRejected { subject: Option<String> },
    KeyError,
    PeerUnverified,
    Tls(TlsCause),
    IllegalState,
    MissingComponent,
    SecurityPolicy,
    Unsupported,
    Io(String),
    Unexpected { kind: &'static str, message: String },
}

impl Diagnosis {
    pub fn message(&self) -> DiagnosticMessage {
        DiagnosticMessage::new(self.to_string())
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedHost => f.write_str(
                "Unable to resolve host. This usually means a DNS problem or missing network connectivity.",
            ),
            Self::ConnectionRefused => f.write_str(
                "Connection refused. A firewall, proxy, or antivirus might be blocking access.",
            ),
            Self::TimedOut => f.write_str(
                "The connection timed out. The network could be congested or the server is unreachable.",
            ),
            Self::SocketError => f.write_str(
                "A network socket error occurred. The connection may have been reset or a broken pipe detected.",
            ),
            Self::HandshakeRejected { subject: Some(subject) } => write!(
                f,
                "TLS handshake failed. Certificate not trusted: {subject}. Install this certificate or its issuing CA in the system trust store."
            ),
            Self::HandshakeRejected { subject: None } => f.write_str(
                "TLS handshake failed. The certificate could be invalid, untrusted, expired, or the hostname does not match.",
            ),
            Self::KeyError => f.write_str(
                "SSL key error. Check that the key and certificate configuration is correct.",
            ),
            Self::PeerUnverified => f.write_str(
                "Failed to verify the server certificate. It might not be signed by a trusted CA.",
            ),
            Self::Tls(TlsCause::MalformedCertificate) => f.write_str(
                "Certificate validation failed. The certificate might be malformed or unreadable.",
            ),
            Self::Tls(TlsCause::ContextSetup) => f.write_str(
                "Error setting up the TLS context. Verify your trust store and key configuration.",
            ),
            Self::Tls(TlsCause::TrustStore) => f.write_str(
                "Unable to access the trust store. The system certificate store may be missing or unreadable.",
            ),
            Self::Tls(TlsCause::MissingAlgorithm) => f.write_str(
                "Missing cryptographic algorithm. The server may require a TLS version or cipher this client does not support.",
            ),
            Self::Tls(TlsCause::Unknown(message)) => write!(f, "General TLS error: {message}"),
            Self::IllegalState => f.write_str(
                "Illegal state encountered. The request could not be assembled or the TLS session was used before the handshake completed.",
            ),
            Self::MissingComponent => f.write_str(
                "A required system component was not available. The system clock or random number source could not be used.",
            ),
            Self::SecurityPolicy => f.write_str("A security policy is preventing the connection."),
            Self::Unsupported => f.write_str(
                "The requested operation is not supported in this environment.",
            ),
            Self::Io(message) => write!(f, "I/O error during communication: {message}"),
            Self::Unexpected { kind, message } => write!(f, "Unexpected error: {kind} - {message}"),
        }
    }
}

/// Maps a probe failure to its diagnosis.
///
/// `captured` is the certificate the server presented during this probe, if
/// any; it only influences handshake rejections.
pub fn classify(error: &ProbeError, captured: Option<&CapturedCertificate>) -> Diagnosis {
    match error {
        ProbeError::Resolve { .. } | ProbeError::NoAddresses { .. } => Diagnosis::UnresolvedHost,
        ProbeError::Timeout { .. } => Diagnosis::TimedOut,
        ProbeError::Connect { source, .. } => classify_io(source, captured),
        ProbeError::Handshake(source) => classify_io(source, captured),
        ProbeError::TrustStore(_) => Diagnosis::Tls(TlsCause::TrustStore),
        ProbeError::Verifier(VerifierBuilderError::NoRootAnchors) => {
            Diagnosis::Tls(TlsCause::TrustStore)
        }
        ProbeError::Verifier(_) | ProbeError::TlsConfig(_) => Diagnosis::Tls(TlsCause::ContextSetup),
        ProbeError::Request(_) => Diagnosis::IllegalState,
        ProbeError::Unsupported(_) => Diagnosis::Unsupported,
        ProbeError::Http(source) => classify_http(source, captured),
        ProbeError::ServerName(_) => Diagnosis::Unexpected {
            kind: error.kind(),
            message: report(error),
        },
    }
}

fn classify_io(error: &io::Error, captured: Option<&CapturedCertificate>) -> Diagnosis {
    // tokio-rustls surfaces TLS failures as InvalidData wrapping the rustls error.
    if let Some(tls) = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        return classify_tls(tls, captured);
    }

    use io::ErrorKind::*;
    match error.kind() {
        ConnectionRefused => Diagnosis::ConnectionRefused,
        TimedOut | WouldBlock => Diagnosis::TimedOut,
        ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected | UnexpectedEof
        | AddrInUse | AddrNotAvailable | HostUnreachable | NetworkUnreachable | NetworkDown => {
            Diagnosis::SocketError
        }
        PermissionDenied => Diagnosis::SecurityPolicy,
        Unsupported => Diagnosis::Unsupported,
        _ => Diagnosis::Io(report(error)),
    }
}

fn classify_tls(error: &rustls::Error, captured: Option<&CapturedCertificate>) -> Diagnosis {
    use rustls::Error;

    match error {
        Error::InvalidCertificate(CertificateError::BadEncoding) => {
            Diagnosis::Tls(TlsCause::MalformedCertificate)
        }
        Error::InvalidCertificate(_) => handshake_rejected(captured),
        Error::AlertReceived(alert) => classify_alert(*alert, error, captured),
        Error::DecryptError | Error::EncryptError => Diagnosis::KeyError,
        Error::NoCertificatesPresented => Diagnosis::PeerUnverified,
        Error::InvalidCertRevocationList(_) => Diagnosis::Tls(TlsCause::MalformedCertificate),
        Error::PeerIncompatible(_) => Diagnosis::Tls(TlsCause::MissingAlgorithm),
        Error::FailedToGetCurrentTime | Error::FailedToGetRandomBytes => Diagnosis::MissingComponent,
        Error::HandshakeNotComplete => Diagnosis::IllegalState,
        other => Diagnosis::Tls(TlsCause::Unknown(other.to_string())),
    }
}

fn classify_alert(
    alert: AlertDescription,
    error: &rustls::Error,
    captured: Option<&CapturedCertificate>,
) -> Diagnosis {
    match alert {
        AlertDescription::BadCertificate
        | AlertDescription::UnsupportedCertificate
        | AlertDescription::CertificateRevoked
        | AlertDescription::CertificateExpired
        | AlertDescription::CertificateUnknown
        | AlertDescription::CertificateRequired
        | AlertDescription::UnknownCA
        | AlertDescription::AccessDenied
        | AlertDescription::HandshakeFailure => handshake_rejected(captured),
        AlertDescription::DecryptError
        | AlertDescription::DecryptionFailed
        | AlertDescription::BadRecordMac => Diagnosis::KeyError,
        AlertDescription::ProtocolVersion | AlertDescription::InsufficientSecurity => {
            Diagnosis::Tls(TlsCause::MissingAlgorithm)
        }
        _ => Diagnosis::Tls(TlsCause::Unknown(error.to_string())),
    }
}

fn classify_http(error: &hyper::Error, captured: Option<&CapturedCertificate>) -> Diagnosis {
    if error.is_timeout() {
        return Diagnosis::TimedOut;
    }
    if let Some(source) = find_source::<io::Error>(error) {
        return classify_io(source, captured);
    }
    if error.is_user() {
        Diagnosis::IllegalState
    } else if error.is_canceled() || error.is_closed() || error.is_incomplete_message() {
        Diagnosis::SocketError
    } else {
        Diagnosis::Unexpected {
            kind: if error.is_parse() { "HttpParse" } else { "Http" },
            message: report(error),
        }
    }
}

fn handshake_rejected(captured: Option<&CapturedCertificate>) -> Diagnosis {
    Diagnosis::HandshakeRejected {
        subject: captured.and_then(CapturedCertificate::subject),
    }
}

fn find_source<'a, T: std::error::Error + 'static>(
    error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a T> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        current = err.source();
    }
    None
}
