//! Backend objects are distributed to every gateway, independent of the
//! routes that reference them.

use crate::Lookups;
use agentgateway_controller_core::agent::{
    AgentResource, Backend, BackendKind, McpProtocol, McpTarget, Output,
};
use agentgateway_controller_k8s_api::{self as k8s, backend::StaticBackend, ResourceExt};
use agentgateway_controller_krt::{Collection, Runtime};

pub(crate) fn build(rt: &Runtime, lookups: &Lookups) -> Collection<Output> {
    let config = lookups.config.clone();
    let backends = rt.flat_map("backends", &lookups.backends, |_, b: &k8s::Backend| {
        let Some(ns) = b.namespace() else {
            return vec![];
        };
        let name = b.name_any();
        match backend_kind(&b.spec) {
            Ok(kind) => vec![global(Backend {
                name: format!("{ns}/{name}"),
                kind,
            })],
            Err(error) => {
                tracing::warn!(%ns, %name, %error, "Ignoring invalid backend");
                vec![]
            }
        }
    });

    let pools = rt.flat_map(
        "backends/inferencepools",
        &lookups.inference_pools,
        move |_, pool: &k8s::InferencePool| {
            let Some(ns) = pool.namespace() else {
                return vec![];
            };
            let name = pool.name_any();
            match inference_pool(&config.cluster_domain, &ns, pool) {
                Ok(kind) => vec![global(Backend {
                    name: format!("{ns}/{name}"),
                    kind,
                })],
                Err(error) => {
                    tracing::warn!(%ns, %name, %error, "Ignoring invalid inference pool");
                    vec![]
                }
            }
        },
    );

    rt.join("backends/all", vec![backends, pools])
}

fn global(backend: Backend) -> Output {
    Output::Resource {
        gateway: None,
        resource: AgentResource::Backend(backend),
    }
}

fn backend_kind(spec: &k8s::backend::BackendSpec) -> Result<BackendKind, String> {
    match (&spec.static_, &spec.ai, &spec.mcp) {
        (Some(s), None, None) => Ok(BackendKind::Static {
            host: s.host.clone(),
            port: port(s.port)?,
        }),
        (None, Some(ai), None) => Ok(BackendKind::Ai {
            provider: ai.provider.clone(),
            model: ai.model.clone(),
            host_override: ai.host_override.as_ref().map(authority).transpose()?,
        }),
        (None, None, Some(mcp)) => {
            let targets = mcp
                .targets
                .iter()
                .map(|t| {
                    Ok(McpTarget {
                        name: t.name.clone(),
                        host: t.host.clone(),
                        port: port(t.port)?,
                        path: t.path.clone(),
                        protocol: match t.protocol.as_deref() {
                            Some("SSE") => McpProtocol::Sse,
                            _ => McpProtocol::StreamableHttp,
                        },
                    })
                })
                .collect::<Result<_, String>>()?;
            Ok(BackendKind::Mcp { targets })
        }
        (None, None, None) => Err("backend type must be set".to_string()),
        _ => Err("only one backend type may be set".to_string()),
    }
}

fn inference_pool(
    cluster_domain: &str,
    ns: &str,
    pool: &k8s::InferencePool,
) -> Result<BackendKind, String> {
    let target_port = pool
        .spec
        .target_ports
        .first()
        .ok_or_else(|| "no target ports".to_string())
        .and_then(|p| port(p.number))?;
    let epp = &pool.spec.endpoint_picker_ref;
    let epp_port = epp
        .port
        .as_ref()
        .ok_or_else(|| "endpoint picker port must be set".to_string())
        .and_then(|p| port(p.number))?;
    Ok(BackendKind::InferencePool {
        target_port,
        selector: pool.spec.selector.match_labels.clone().unwrap_or_default(),
        endpoint_picker: format!("{}.{ns}.svc.{cluster_domain}:{epp_port}", epp.name),
    })
}

fn authority(s: &StaticBackend) -> Result<String, String> {
    Ok(format!("{}:{}", s.host, port(s.port)?))
}

fn port(p: i32) -> Result<u16, String> {
    u16::try_from(p)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| format!("invalid port {p}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_k8s_api::backend::{AiBackend, BackendSpec, McpBackend};

    #[test]
    fn ai_backend_host_override() {
        let kind = backend_kind(&BackendSpec {
            ai: Some(AiBackend {
                provider: "openai".into(),
                model: Some("gpt-4o".into()),
                host_override: Some(StaticBackend {
                    host: "llm.internal".into(),
                    port: 8443,
                }),
            }),
            ..Default::default()
        })
        .expect("valid");
        assert_eq!(
            kind,
            BackendKind::Ai {
                provider: "openai".into(),
                model: Some("gpt-4o".into()),
                host_override: Some("llm.internal:8443".into()),
            }
        );
    }

    #[test]
    fn mcp_protocol_defaults_to_streamable_http() {
        let kind = backend_kind(&BackendSpec {
            mcp: Some(McpBackend {
                targets: vec![
                    k8s::backend::McpTarget {
                        name: "a".into(),
                        host: "a.example".into(),
                        port: 80,
                        path: None,
                        protocol: None,
                    },
                    k8s::backend::McpTarget {
                        name: "b".into(),
                        host: "b.example".into(),
                        port: 80,
                        path: Some("/sse".into()),
                        protocol: Some("SSE".into()),
                    },
                ],
            }),
            ..Default::default()
        })
        .expect("valid");
        let BackendKind::Mcp { targets } = kind else {
            panic!("expected mcp backend");
        };
        assert_eq!(targets[0].protocol, McpProtocol::StreamableHttp);
        assert_eq!(targets[1].protocol, McpProtocol::Sse);
    }

    #[test]
    fn exactly_one_type() {
        assert!(backend_kind(&BackendSpec::default()).is_err());
        assert!(backend_kind(&BackendSpec {
            static_: Some(StaticBackend {
                host: "a".into(),
                port: 1,
            }),
            mcp: Some(McpBackend { targets: vec![] }),
            ..Default::default()
        })
        .is_err());
        assert!(backend_kind(&BackendSpec {
            static_: Some(StaticBackend {
                host: "a".into(),
                port: 0,
            }),
            ..Default::default()
        })
        .is_err());
    }
}
