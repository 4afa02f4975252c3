//! Shared HTTP client configuration.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use url::Url;

use jcli_core::{CliError, CliResult};

/// Options that apply to every HTTP request the client makes.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Value of the `Authorization` header, if any.
    pub authorization: Option<String>,
    /// Accept any TLS certificate.
    pub no_certificate_check: bool,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            authorization: None,
            no_certificate_check: false,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// A configured HTTP client plus the headers every request carries.
#[derive(Debug, Clone)]
pub struct HttpContext {
    client: Client,
    authorization: Option<String>,
}

impl HttpContext {
    pub fn new(config: &HttpConfig) -> CliResult<Self> {
        if config.no_certificate_check {
            tracing::warn!("skipping HTTPS certificate checks altogether; this is insecure");
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.no_certificate_check)
            .build()
            .map_err(|e| CliError::Http(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            authorization: config.authorization.clone(),
        })
    }

    pub fn get(&self, url: Url) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    pub fn post(&self, url: Url) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }
}

/// Build a Basic `Authorization` header value from `user:secret`.
pub fn basic_authorization(credentials: &str) -> String {
    format!("Basic {}", STANDARD.encode(credentials))
}

/// Resolve the `Authorization` header for `url`.
///
/// Credentials embedded in the URL win; otherwise `auth` is used, where a
/// leading `@` names a file holding `user:token`.
pub fn resolve_authorization(url: &Url, auth: Option<&str>) -> CliResult<Option<String>> {
    if !url.username().is_empty() {
        let credentials = match url.password() {
            Some(password) => format!("{}:{}", url.username(), password),
            None => url.username().to_string(),
        };
        return Ok(Some(basic_authorization(&credentials)));
    }
    match auth {
        Some(file) if file.starts_with('@') => {
            let credentials = read_credentials_file(Path::new(&file[1..]))?;
            Ok(Some(basic_authorization(&credentials)))
        }
        Some(credentials) => Ok(Some(basic_authorization(credentials))),
        None => Ok(None),
    }
}

fn read_credentials_file(path: &Path) -> CliResult<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))
}

/// Append a trailing `/` and parse.
pub fn normalize_base_url(url: &str) -> CliResult<Url> {
    let mut url = url.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    let parsed =
        Url::parse(&url).map_err(|e| CliError::Discovery(format!("invalid URL {url}: {e}")))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(CliError::Discovery(format!("invalid URL: {url}")));
    }
    Ok(parsed)
}

/// Resolve `path` against a normalized base URL.
pub fn join(base: &Url, path: &str) -> CliResult<Url> {
    base.join(path)
        .map_err(|e| CliError::Discovery(format!("cannot resolve {path} against {base}: {e}")))
}
