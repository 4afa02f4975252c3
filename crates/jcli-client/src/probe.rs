//! Capability discovery: one GET against the server root, read the
//! advertised CLI endpoints from the response headers.

use reqwest::header::HeaderMap;
use url::Url;

use jcli_core::{CliError, CliResult, InstanceIdentity};

use crate::http::HttpContext;

pub const CLI_HOST_HEADER: &str = "X-Jenkins-CLI-Host";
pub const CLI_PORT_HEADER: &str = "X-Jenkins-CLI-Port";
/// Deprecated spelling of [`CLI_PORT_HEADER`].
pub const LEGACY_CLI_PORT_HEADER: &str = "X-Hudson-CLI-Port";
pub const CLI2_PORT_HEADER: &str = "X-Jenkins-CLI2-Port";
pub const IDENTITY_HEADER: &str = "X-Instance-Identity";
pub const JENKINS_HEADER: &str = "X-Jenkins";
pub const HUDSON_HEADER: &str = "X-Hudson";

/// Most body bytes read (and discarded) after a probe.
const MAX_DRAIN: usize = 64 * 1024;

/// Handshake generation spoken on the CLI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
}

/// Where and how to reach the server's CLI port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub host: String,
    pub port: u16,
    pub version: ProtocolVersion,
    /// Raw `X-Instance-Identity` value, decoded at handshake time.
    pub identity: Option<String>,
}

impl EndpointDescriptor {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Decode the advertised identity, if there was one.
    pub fn identity(&self) -> CliResult<Option<InstanceIdentity>> {
        self.identity
            .as_deref()
            .map(InstanceIdentity::from_header)
            .transpose()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_port(name: &str, value: &str) -> CliResult<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::Discovery(format!("invalid {name} value {value:?}")))
}

/// Build an endpoint from probe response headers.
///
/// `url` is the URL the response came from; its host is used unless the
/// server names another one.
pub fn endpoint_from_headers(url: &Url, headers: &HeaderMap) -> CliResult<EndpointDescriptor> {
    let legacy = header(headers, CLI_PORT_HEADER)
        .map(|v| (CLI_PORT_HEADER, v))
        .or_else(|| header(headers, LEGACY_CLI_PORT_HEADER).map(|v| (LEGACY_CLI_PORT_HEADER, v)));
    let versioned = header(headers, CLI2_PORT_HEADER);

    let (port, version) = match (versioned, legacy) {
        (Some(v), _) => (parse_port(CLI2_PORT_HEADER, v)?, ProtocolVersion::V2),
        (None, Some((name, v))) => (parse_port(name, v)?, ProtocolVersion::V1),
        (None, None) => {
            if header(headers, JENKINS_HEADER).is_none() && header(headers, HUDSON_HEADER).is_none()
            {
                return Err(CliError::NoServerDetected(url.to_string()));
            }
            let seen = headers.keys().map(|k| k.as_str().to_string()).collect();
            return Err(CliError::NoPortAdvertised(seen));
        }
    };

    let host = match header(headers, CLI_HOST_HEADER) {
        Some(h) if !h.trim().is_empty() => h.trim().to_string(),
        _ => url
            .host_str()
            .ok_or_else(|| CliError::Discovery(format!("invalid URL: {url}")))?
            .to_string(),
    };

    Ok(EndpointDescriptor {
        host,
        port,
        version,
        identity: header(headers, IDENTITY_HEADER).map(str::to_string),
    })
}

/// Probe `base` and describe its CLI endpoint.
///
/// Error statuses are not failures: a server that rejects anonymous reads
/// still advertises its headers on the 403.
pub async fn probe(http: &HttpContext, base: &Url) -> CliResult<EndpointDescriptor> {
    tracing::debug!(url = %base, "probing server capabilities");
    let mut response = http
        .get(base.clone())
        .send()
        .await
        .map_err(|e| CliError::Discovery(format!("failed to connect to {base}: {e}")))?;

    let final_url = response.url().clone();
    let headers = response.headers().clone();

    let mut drained = 0;
    while drained < MAX_DRAIN {
        match response.chunk().await {
            Ok(Some(chunk)) => drained += chunk.len(),
            _ => break,
        }
    }
    drop(response);

    let endpoint = endpoint_from_headers(&final_url, &headers)?;
    tracing::debug!(
        address = %endpoint.address(),
        version = endpoint.version as u8,
        identity = endpoint.identity.is_some(),
        "discovered CLI endpoint"
    );
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConfig;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn url() -> Url {
        Url::parse("http://ci.example:8080/").unwrap()
    }

    #[test]
    fn versioned_port_wins() {
        let h = headers(&[
            ("X-Jenkins", "2.440"),
            ("X-Jenkins-CLI-Port", "49000"),
            ("X-Jenkins-CLI2-Port", "50000"),
        ]);
        let ep = endpoint_from_headers(&url(), &h).unwrap();
        assert_eq!(ep.port, 50000);
        assert_eq!(ep.version, ProtocolVersion::V2);
        assert_eq!(ep.host, "ci.example");
    }

    #[test]
    fn legacy_port_and_alias() {
        let ep = endpoint_from_headers(&url(), &headers(&[("X-Jenkins-CLI-Port", "49000")]))
            .unwrap();
        assert_eq!((ep.port, ep.version), (49000, ProtocolVersion::V1));

        let ep = endpoint_from_headers(&url(), &headers(&[("X-Hudson-CLI-Port", "48000")]))
            .unwrap();
        assert_eq!((ep.port, ep.version), (48000, ProtocolVersion::V1));
    }

    #[test]
    fn host_override_and_identity() {
        let h = headers(&[
            ("X-Jenkins-CLI2-Port", "50000"),
            ("X-Jenkins-CLI-Host", "agents.example"),
            ("X-Instance-Identity", "AAAA"),
        ]);
        let ep = endpoint_from_headers(&url(), &h).unwrap();
        assert_eq!(ep.address(), "agents.example:50000");
        assert_eq!(ep.identity.as_deref(), Some("AAAA"));
        // Kept raw; decoding happens later and fails as a crypto error.
        assert!(matches!(ep.identity(), Err(CliError::Crypto(_))));
    }

    #[test]
    fn recognised_server_without_port() {
        let err = endpoint_from_headers(&url(), &headers(&[("X-Jenkins", "2.440")])).unwrap_err();
        match err {
            CliError::NoPortAdvertised(seen) => assert_eq!(seen, vec!["x-jenkins".to_string()]),
            other => panic!("unexpected {other:?}"),
        }

        let err = endpoint_from_headers(&url(), &headers(&[("X-Hudson", "1.395")])).unwrap_err();
        assert!(matches!(err, CliError::NoPortAdvertised(_)));
    }

    #[test]
    fn unrecognised_server() {
        let err = endpoint_from_headers(&url(), &headers(&[("Server", "nginx")])).unwrap_err();
        assert!(matches!(err, CliError::NoServerDetected(_)));
    }

    #[test]
    fn bad_port_is_discovery_error() {
        let err = endpoint_from_headers(&url(), &headers(&[("X-Jenkins-CLI2-Port", "lots")]))
            .unwrap_err();
        assert!(matches!(err, CliError::Discovery(_)));
    }

    #[tokio::test]
    async fn probe_reads_headers_from_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jenkins/"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("X-Jenkins", "2.440")
                    .insert_header("X-Jenkins-CLI2-Port", "50000")
                    .set_body_string("<html>Authentication required</html>"),
            )
            .mount(&server)
            .await;

        let http = HttpContext::new(&HttpConfig::default()).unwrap();
        let base = crate::http::normalize_base_url(&format!("{}/jenkins", server.uri())).unwrap();
        let ep = probe(&http, &base).await.unwrap();
        assert_eq!(ep.port, 50000);
        assert_eq!(ep.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn probe_unreachable_server() {
        let http = HttpContext::new(&HttpConfig::default()).unwrap();
        let base = Url::parse("http://127.0.0.1:1/").unwrap();
        assert!(matches!(
            probe(&http, &base).await,
            Err(CliError::Discovery(_))
        ));
    }
}
