use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use x509_parser::parse_x509_certificate;

/// Leaf certificate presented by the server during one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCertificate {
    der: CertificateDer<'static>,
}

/// Parsed fields of a captured certificate, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl CapturedCertificate {
    pub fn new(der: CertificateDer<'static>) -> Self {
        Self { der }
    }

    pub fn der(&self) -> &[u8] {
        self.der.as_ref()
    }

    /// Subject distinguished name (`CN=..., O=...`), or `None` when the
    /// certificate cannot be parsed or has an empty subject.
    pub fn subject(&self) -> Option<String> {
        self.summary()
            .map(|summary| summary.subject)
            .filter(|subject| !subject.is_empty())
    }

    pub fn summary(&self) -> Option<CertificateSummary> {
        let (_, parsed) = parse_x509_certificate(self.der()).ok()?;
        let validity = parsed.validity();
        Some(CertificateSummary {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
            not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
        })
    }
}

/// Slot the capturing verifier writes into. One slot belongs to one probe.
#[derive(Debug, Clone, Default)]
pub struct CertificateCapture {
    slot: Arc<Mutex<Option<CapturedCertificate>>>,
}

impl CertificateCapture {
    fn record(&self, end_entity: &CertificateDer<'_>) {
        let captured = CapturedCertificate::new(end_entity.clone().into_owned());
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(captured);
    }

    pub fn get(&self) -> Option<CapturedCertificate> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Server certificate verifier that records the leaf certificate and then
/// defers every decision to the wrapped verifier.
#[derive(Debug)]
pub struct CapturingVerifier {
    delegate: Arc<dyn ServerCertVerifier>,
    capture: CertificateCapture,
}

impl CapturingVerifier {
    pub fn new(delegate: Arc<dyn ServerCertVerifier>, capture: CertificateCapture) -> Self {
        Self { delegate, capture }
    }
}

impl ServerCertVerifier for CapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // Record before delegating: a rejected chain is exactly the case we need it for.
        self.capture.record(end_entity);
        log::debug!(
            "captured server certificate for {:?} ({} intermediates)",
            server_name,
            intermediates.len()
        );
        self.delegate
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.delegate.supported_verify_schemes()
    }

    fn requires_raw_public_keys(&self) -> bool {
        self.delegate.requires_raw_public_keys()
    }

    fn root_hint_subjects(&self) -> Option<&[DistinguishedName]> {
        self.delegate.root_hint_subjects()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName as RcgenName, DnType, KeyPair};

    #[derive(Debug)]
    struct Rejecting;

    impl ServerCertVerifier for Rejecting {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer,
            ))
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![SignatureScheme::ECDSA_NISTP256_SHA256]
        }
    }

    fn leaf(common_name: &str) -> CertificateDer<'static> {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).expect("params");
        params.distinguished_name = RcgenName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        let key = KeyPair::generate().expect("key");
        params.self_signed(&key).expect("certificate").der().clone()
    }

    #[test]
    fn test_captures_leaf_even_when_delegate_rejects() {
        let capture = CertificateCapture::default();
        let verifier = CapturingVerifier::new(Arc::new(Rejecting), capture.clone());
        let cert = leaf("rejected.example.com");
        let server_name = ServerName::try_from("localhost").expect("server name");

        let result = verifier.verify_server_cert(&cert, &[], &server_name, &[], UnixTime::now());

        assert!(matches!(
            result,
            Err(rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer))
        ));
        let captured = capture.get().expect("certificate captured");
        assert_eq!(captured.der(), cert.as_ref());
        assert_eq!(captured.subject().as_deref(), Some("CN=rejected.example.com"));
    }

    #[test]
    fn test_later_handshake_overwrites_capture() {
        let capture = CertificateCapture::default();
        let verifier = CapturingVerifier::new(Arc::new(Rejecting), capture.clone());
        let server_name = ServerName::try_from("localhost").expect("server name");

        let _ = verifier.verify_server_cert(&leaf("first"), &[], &server_name, &[], UnixTime::now());
        let _ = verifier.verify_server_cert(&leaf("second"), &[], &server_name, &[], UnixTime::now());

        assert_eq!(
            capture.get().and_then(|c| c.subject()).as_deref(),
            Some("CN=second")
        );
    }

    #[test]
    fn test_fresh_capture_is_empty() {
        assert!(CertificateCapture::default().get().is_none());
    }

    #[test]
    fn test_summary_of_garbage_is_none() {
        let captured = CapturedCertificate::new(CertificateDer::from(vec![1, 2, 3]));
        assert!(captured.summary().is_none());
        assert!(captured.subject().is_none());
    }

    #[test]
    fn test_summary_reports_validity() {
        let captured = CapturedCertificate::new(leaf("dated.example.com"));
        let summary = captured.summary().expect("summary");
        assert_eq!(summary.issuer, "CN=dated.example.com");
        assert!(summary.not_before < summary.not_after);
    }
}
