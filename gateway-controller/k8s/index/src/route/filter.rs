use super::{backend, trim_trailing_slash};
use crate::Lookups;
use agentgateway_controller_core::{
    agent::{
        HeaderModifier, PathModifier, RequestMirror, RequestRedirect, RouteFilter, UrlRewrite,
    },
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::httproute::{
    HttpHeader, HttpHeaderFilter, HttpPathModifier, HttpRequestMirrorFilter, HttpRouteFilter,
};
use agentgateway_controller_krt::HandlerContext;

/// Translates route filters, omitting (and recording) those that are
/// invalid. gRPC routes do not support rewrites or redirects.
pub(super) fn translate(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    from: (&GroupKind, &str),
    filters: &[HttpRouteFilter],
    errors: &mut Vec<ConfigError>,
) -> Vec<RouteFilter> {
    let grpc = *from.0 == GroupKind::GRPC_ROUTE;
    let mut out = Vec::with_capacity(filters.len());
    for f in filters {
        match filter(ctx, lookups, from, grpc, f) {
            Ok(Some(f)) => out.push(f),
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(%error, "Omitting filter");
                errors.push(error);
            }
        }
    }
    out
}

fn filter(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    from: (&GroupKind, &str),
    grpc: bool,
    f: &HttpRouteFilter,
) -> Result<Option<RouteFilter>, ConfigError> {
    let missing = || {
        ConfigError::new(
            ErrorKind::InvalidFilter,
            format!("{} filter is missing its configuration", f.type_),
        )
    };
    let unsupported = || {
        ConfigError::new(
            ErrorKind::InvalidFilter,
            format!("{} filter is not supported", f.type_),
        )
    };

    match f.type_.as_str() {
        "RequestHeaderModifier" => {
            let m = f.request_header_modifier.as_ref().ok_or_else(missing)?;
            Ok(Some(RouteFilter::RequestHeaderModifier(header_modifier(m))))
        }
        "ResponseHeaderModifier" => {
            let m = f.response_header_modifier.as_ref().ok_or_else(missing)?;
            Ok(Some(RouteFilter::ResponseHeaderModifier(header_modifier(m))))
        }
        "URLRewrite" if !grpc => {
            let rw = f.url_rewrite.as_ref().ok_or_else(missing)?;
            Ok(Some(RouteFilter::UrlRewrite(UrlRewrite {
                hostname: rw.hostname.clone(),
                path: rw.path.as_ref().map(path_modifier).transpose()?,
            })))
        }
        "RequestRedirect" if !grpc => {
            let rd = f.request_redirect.as_ref().ok_or_else(missing)?;
            let invalid = |field: &str, v: i32| {
                ConfigError::new(
                    ErrorKind::InvalidFilter,
                    format!("invalid redirect {field} {v}"),
                )
            };
            Ok(Some(RouteFilter::RequestRedirect(RequestRedirect {
                scheme: rd.scheme.clone(),
                hostname: rd.hostname.clone(),
                path: rd.path.as_ref().map(path_modifier).transpose()?,
                port: rd
                    .port
                    .map(|p| u16::try_from(p).map_err(|_| invalid("port", p)))
                    .transpose()?,
                status: rd
                    .status_code
                    .map(|s| u16::try_from(s).map_err(|_| invalid("status code", s)))
                    .transpose()?,
            })))
        }
        "RequestMirror" => {
            let mirror = f.request_mirror.as_ref().ok_or_else(missing)?;
            let percentage = mirror_percentage(mirror)?;
            if percentage <= 0.0 {
                return Ok(None);
            }
            let backend = backend::resolve(ctx, lookups, from, &mirror.backend_ref)?;
            Ok(Some(RouteFilter::RequestMirror(RequestMirror {
                backend,
                percentage,
            })))
        }
        _ => Err(unsupported()),
    }
}

fn header_modifier(f: &HttpHeaderFilter) -> HeaderModifier {
    fn pairs(headers: &[HttpHeader]) -> Vec<(String, String)> {
        headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect()
    }
    HeaderModifier {
        add: pairs(&f.add),
        set: pairs(&f.set),
        remove: f.remove.clone(),
    }
}

fn path_modifier(m: &HttpPathModifier) -> Result<PathModifier, ConfigError> {
    let missing = || {
        ConfigError::new(
            ErrorKind::InvalidFilter,
            format!("{} path modifier is missing its value", m.type_),
        )
    };
    match m.type_.as_str() {
        "ReplaceFullPath" => {
            let path = m.replace_full_path.as_deref().ok_or_else(missing)?;
            Ok(PathModifier::Full(trim_trailing_slash(path)))
        }
        "ReplacePrefixMatch" => {
            let path = m.replace_prefix_match.as_deref().ok_or_else(missing)?;
            Ok(PathModifier::Prefix(trim_trailing_slash(path)))
        }
        other => Err(ConfigError::new(
            ErrorKind::InvalidFilter,
            format!("unsupported path modifier {other}"),
        )),
    }
}

/// The share of requests mirrored, in `[0, 100]`. A fraction takes precedence
/// over the legacy percent field; mirroring defaults to every request.
fn mirror_percentage(m: &HttpRequestMirrorFilter) -> Result<f64, ConfigError> {
    let pct = match (&m.fraction, m.percent) {
        (Some(fraction), _) => {
            let denominator = fraction.denominator.unwrap_or(100);
            if denominator <= 0 {
                return Err(ConfigError::new(
                    ErrorKind::InvalidFilter,
                    format!("invalid mirror fraction denominator {denominator}"),
                ));
            }
            f64::from(fraction.numerator) * 100.0 / f64::from(denominator)
        }
        (None, Some(percent)) => f64::from(percent),
        (None, None) => 100.0,
    };
    Ok(pct.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_k8s_api::httproute::Fraction;

    #[test]
    fn mirror_percentages() {
        let mirror = |percent, fraction| HttpRequestMirrorFilter {
            percent,
            fraction,
            ..Default::default()
        };
        assert_eq!(mirror_percentage(&mirror(None, None)), Ok(100.0));
        assert_eq!(mirror_percentage(&mirror(Some(25), None)), Ok(25.0));
        assert_eq!(
            mirror_percentage(&mirror(
                Some(25),
                Some(Fraction {
                    numerator: 1,
                    denominator: Some(4),
                })
            )),
            Ok(25.0)
        );
        assert_eq!(
            mirror_percentage(&mirror(
                None,
                Some(Fraction {
                    numerator: 50,
                    denominator: None,
                })
            )),
            Ok(50.0)
        );
        assert_eq!(mirror_percentage(&mirror(Some(250), None)), Ok(100.0));
        assert!(mirror_percentage(&mirror(
            None,
            Some(Fraction {
                numerator: 1,
                denominator: Some(0),
            })
        ))
        .is_err());
    }

    #[test]
    fn path_modifiers_trim() {
        let m = HttpPathModifier {
            type_: "ReplacePrefixMatch".to_string(),
            replace_prefix_match: Some("/v2/".to_string()),
            ..Default::default()
        };
        assert_eq!(path_modifier(&m), Ok(PathModifier::Prefix("/v2".to_string())));

        let m = HttpPathModifier {
            type_: "ReplaceFullPath".to_string(),
            ..Default::default()
        };
        assert!(path_modifier(&m).is_err());
    }
}
