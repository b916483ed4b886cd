use crate::Lookups;
use agentgateway_controller_core::{agent::TlsConfig, ConfigError, ErrorKind, GroupKind, NamespacedName};
use agentgateway_controller_k8s_api::gateway::GatewayTlsConfig;
use agentgateway_controller_krt::HandlerContext;

const TLS_CERT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";

/// Resolves the serving certificate of a terminating listener.
pub(super) fn resolve(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    gateway: &NamespacedName,
    tls: Option<&GatewayTlsConfig>,
) -> Result<TlsConfig, ConfigError> {
    let Some(cert_ref) = tls.and_then(|t| t.certificate_refs.first()) else {
        return Err(ConfigError::new(
            ErrorKind::InvalidCertificateRef,
            "listener has no certificate references",
        ));
    };

    let kind = GroupKind::from_ref(
        cert_ref.group.as_deref(),
        cert_ref.kind.as_deref(),
        &GroupKind::SECRET,
    );
    if kind != GroupKind::SECRET {
        return Err(ConfigError::new(
            ErrorKind::InvalidCertificateRef,
            format!("unsupported certificate reference kind {kind}"),
        ));
    }

    let ns = cert_ref.namespace.as_deref().unwrap_or(&gateway.namespace);
    if !lookups.grants.secret_allowed(
        ctx,
        (&GroupKind::GATEWAY, &gateway.namespace),
        (ns, &cert_ref.name),
    ) {
        return Err(ConfigError::new(
            ErrorKind::InvalidListenerRefNotPermitted,
            format!("reference to Secret {ns}/{} is not permitted", cert_ref.name),
        ));
    }

    let Some(secret) = ctx.fetch_one(&lookups.secrets, &format!("{ns}/{}", cert_ref.name)) else {
        return Err(ConfigError::new(
            ErrorKind::InvalidCertificateRef,
            format!("Secret {ns}/{} not found", cert_ref.name),
        ));
    };

    let data = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| v.0.clone())
            .ok_or_else(|| {
                ConfigError::new(
                    ErrorKind::InvalidCertificateRef,
                    format!("Secret {ns}/{} is missing {key}", cert_ref.name),
                )
            })
    };
    let cert = data(TLS_CERT)?;
    let key = data(TLS_KEY)?;

    let invalid = |msg: String| {
        ConfigError::new(
            ErrorKind::InvalidCertificateRef,
            format!("Secret {ns}/{}: {msg}", cert_ref.name),
        )
    };
    validate_certificates(&cert).map_err(invalid)?;
    validate_private_key(&key).map_err(invalid)?;

    Ok(TlsConfig {
        cert: String::from_utf8(cert).map_err(|e| invalid(e.to_string()))?,
        private_key: String::from_utf8(key).map_err(|e| invalid(e.to_string()))?,
    })
}

/// Checks that `pem` holds at least one certificate and that every
/// certificate it holds parses and is currently valid.
pub(crate) fn validate_certificates(pem: &[u8]) -> Result<(), String> {
    let blocks = ::pem::parse_many(pem).map_err(|e| format!("invalid PEM: {e}"))?;
    let mut found = false;
    for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
        found = true;
        let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
            .map_err(|e| format!("invalid certificate: {e}"))?;
        if !cert.validity().is_valid() {
            return Err(format!(
                "certificate {} is expired or not yet valid",
                cert.subject()
            ));
        }
    }
    if !found {
        return Err("no certificates found".to_string());
    }
    Ok(())
}

fn validate_private_key(pem: &[u8]) -> Result<(), String> {
    let blocks = ::pem::parse_many(pem).map_err(|e| format!("invalid PEM: {e}"))?;
    if !blocks.iter().any(|b| b.tag().ends_with("PRIVATE KEY")) {
        return Err("no private key found".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(not_after: (i32, u8, u8)) -> (String, String) {
        let mut params =
            rcgen::CertificateParams::new(vec!["example.com".to_string()]).expect("params");
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
        let key = rcgen::KeyPair::generate().expect("key");
        let cert = params.self_signed(&key).expect("cert");
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn accepts_valid_certificate() {
        let (cert, key) = self_signed((4000, 1, 1));
        assert_eq!(validate_certificates(cert.as_bytes()), Ok(()));
        assert_eq!(validate_private_key(key.as_bytes()), Ok(()));
    }

    #[test]
    fn rejects_expired_certificate() {
        let (cert, _) = self_signed((2001, 1, 1));
        let err = validate_certificates(cert.as_bytes()).expect_err("must be expired");
        assert!(err.contains("expired"), "{err}");
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate_certificates(b"not a certificate").is_err());
        let (_, key) = self_signed((4000, 1, 1));
        // A key is not a certificate.
        assert!(validate_certificates(key.as_bytes()).is_err());
        assert!(validate_private_key(b"").is_err());
    }
}
