use super::Translator;
use crate::{gateway::validate_certificates, Lookups};
use agentgateway_controller_core::{
    policy::{self, PolicySpec},
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::policy::{
    backend_tls::BackendTlsValidation, BackendTlsPolicy, LocalPolicyTargetReference,
};
use agentgateway_controller_krt::HandlerContext;

const CA_CERT_KEY: &str = "ca.crt";

pub(super) struct BackendTls;

impl Translator for BackendTls {
    type Resource = BackendTlsPolicy;

    const KIND: GroupKind = GroupKind::BACKEND_TLS_POLICY;
    const TARGETS: &'static [GroupKind] = &[GroupKind::SERVICE, GroupKind::BACKEND];

    fn target_refs(policy: &BackendTlsPolicy) -> &[LocalPolicyTargetReference] {
        &policy.spec.target_refs
    }

    fn translate(
        ctx: &mut HandlerContext<'_>,
        lookups: &Lookups,
        ns: &str,
        policy: &BackendTlsPolicy,
        errors: &mut Vec<ConfigError>,
    ) -> Vec<PolicySpec> {
        match validation(ctx, lookups, ns, &policy.spec.validation) {
            Ok(tls) => vec![PolicySpec::BackendTls(tls)],
            Err(error) => {
                errors.push(error);
                vec![]
            }
        }
    }
}

fn validation(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    ns: &str,
    v: &BackendTlsValidation,
) -> Result<policy::BackendTls, ConfigError> {
    let root = match (v.well_known_ca_certificates.as_deref(), v.ca_certificate_refs.is_empty()) {
        (Some("System"), true) => None,
        (Some(other), true) => {
            return Err(ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("unsupported well-known CA certificates {other}"),
            ))
        }
        (Some(_), false) => {
            return Err(ConfigError::new(
                ErrorKind::InvalidConfiguration,
                "caCertificateRefs and wellKnownCACertificates are mutually exclusive",
            ))
        }
        (None, true) => {
            return Err(ConfigError::new(
                ErrorKind::InvalidConfiguration,
                "one of caCertificateRefs or wellKnownCACertificates must be set",
            ))
        }
        (None, false) => {
            let mut bundle = String::new();
            for r in &v.ca_certificate_refs {
                let pem = ca_bundle(ctx, lookups, ns, &r.kind, &r.name)?;
                if !bundle.is_empty() && !bundle.ends_with('\n') {
                    bundle.push('\n');
                }
                bundle.push_str(&pem);
            }
            Some(bundle)
        }
    };

    let subject_alt_names = v
        .subject_alt_names
        .iter()
        .filter_map(|san| match san.type_.as_str() {
            "Hostname" => san.hostname.clone(),
            "URI" => san.uri.clone(),
            _ => None,
        })
        .collect();

    Ok(policy::BackendTls {
        root,
        hostname: Some(v.hostname.clone()).filter(|h| !h.is_empty()),
        subject_alt_names,
        insecure: None,
    })
}

fn ca_bundle(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    ns: &str,
    kind: &str,
    name: &str,
) -> Result<String, ConfigError> {
    if !kind.is_empty() && kind != GroupKind::CONFIG_MAP.kind {
        return Err(ConfigError::new(
            ErrorKind::InvalidKind,
            format!("unsupported CA certificate reference kind {kind}"),
        ));
    }
    let cm = ctx
        .fetch_one(&lookups.config_maps, &format!("{ns}/{name}"))
        .ok_or_else(|| {
            ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("ConfigMap {ns}/{name} not found"),
            )
        })?;
    let pem = cm
        .data
        .as_ref()
        .and_then(|d| d.get(CA_CERT_KEY))
        .ok_or_else(|| {
            ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("ConfigMap {ns}/{name} is missing {CA_CERT_KEY}"),
            )
        })?;
    validate_certificates(pem.as_bytes()).map_err(|e| {
        ConfigError::new(
            ErrorKind::InvalidConfiguration,
            format!("ConfigMap {ns}/{name}: {e}"),
        )
    })?;
    Ok(pem.clone())
}
