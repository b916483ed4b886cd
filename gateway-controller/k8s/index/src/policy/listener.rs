use super::{duration, Translator};
use crate::Lookups;
use agentgateway_controller_core::{
    policy::{AccessLog, ListenerSettings, PolicySpec},
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::policy::{
    listener::HttpListenerPolicySpec, HttpListenerPolicy, LocalPolicyTargetReference,
};
use agentgateway_controller_krt::HandlerContext;

const DEFAULT_ACCESS_LOG_PATH: &str = "/dev/stdout";

pub(super) struct Listener;

impl Translator for Listener {
    type Resource = HttpListenerPolicy;

    const KIND: GroupKind = GroupKind::HTTP_LISTENER_POLICY;
    const TARGETS: &'static [GroupKind] = &[GroupKind::GATEWAY];

    fn target_refs(policy: &HttpListenerPolicy) -> &[LocalPolicyTargetReference] {
        &policy.spec.target_refs
    }

    fn translate(
        _: &mut HandlerContext<'_>,
        _: &Lookups,
        _: &str,
        policy: &HttpListenerPolicy,
        errors: &mut Vec<ConfigError>,
    ) -> Vec<PolicySpec> {
        match settings(&policy.spec) {
            Ok(settings) => vec![PolicySpec::ListenerSettings(settings)],
            Err(error) => {
                errors.push(error);
                vec![]
            }
        }
    }
}

fn settings(spec: &HttpListenerPolicySpec) -> Result<ListenerSettings, ConfigError> {
    if spec.access_log.len() > 1 {
        return Err(ConfigError::new(
            ErrorKind::InvalidConfiguration,
            "at most one access log may be configured",
        ));
    }
    let server_header = match spec.server_header_transformation.as_deref() {
        None => None,
        Some(v @ ("Overwrite" | "AppendIfAbsent" | "PassThrough")) => Some(v.to_string()),
        Some(other) => {
            return Err(ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("unsupported server header transformation {other}"),
            ))
        }
    };

    Ok(ListenerSettings {
        access_log: spec.access_log.first().map(|log| AccessLog {
            path: log
                .path
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_ACCESS_LOG_PATH.to_string()),
            format: log.format.clone(),
        }),
        server_header,
        preserve_http1_header_case: spec.preserve_http1_header_case,
        idle_timeout: duration("idleTimeout", spec.idle_timeout.as_deref())?,
    })
}
