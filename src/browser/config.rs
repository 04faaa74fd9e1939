//! Configuration of the render service adapters.

use crate::error::SpiderError;
use reqwest::ClientBuilder;
use reqwest::tls::Version;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default base URL of the render service.
pub const DEFAULT_ADAPTER_URL: &str = "http://127.0.0.1:8050";
/// Default endpoint name joined onto the base URL.
pub const DEFAULT_ENDPOINT: &str = "render.json";

/// TLS protocol versions offered to the render service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMethod {
    /// Let the TLS backend pick the best supported version.
    #[default]
    Negotiate,
    TlsV1_2,
    TlsV1_3,
}

impl TlsMethod {
    pub(crate) fn apply(self, builder: ClientBuilder) -> ClientBuilder {
        match self {
            TlsMethod::Negotiate => builder,
            TlsMethod::TlsV1_2 => builder
                .min_tls_version(Version::TLS_1_2)
                .max_tls_version(Version::TLS_1_2),
            TlsMethod::TlsV1_3 => builder.min_tls_version(Version::TLS_1_3),
        }
    }
}

impl FromStr for TlsMethod {
    type Err = SpiderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" | "negotiate" => Ok(TlsMethod::Negotiate),
            "tlsv1.2" | "tls1.2" => Ok(TlsMethod::TlsV1_2),
            "tlsv1.3" | "tls1.3" => Ok(TlsMethod::TlsV1_3),
            other => Err(SpiderError::ConfigurationError(format!(
                "unsupported TLS method '{other}'"
            ))),
        }
    }
}

/// Settings shared by the rewrite adapter and the streaming transport.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Base URL of the render service.
    pub adapter_url: String,
    /// Endpoint name joined onto `adapter_url`.
    pub endpoint: String,
    /// Upper bound on open streams and idle connections per render host.
    pub max_connections_per_host: usize,
    pub tls_method: TlsMethod,
    /// Deadline of a single fetch unless the request carries `download_timeout`.
    pub download_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long `close` lets running streams finish before aborting them.
    pub shutdown_grace: Duration,
    /// Local address outbound connections bind to.
    pub bind_address: Option<IpAddr>,
    /// Decoded events a stream buffers before it stops reading its reply.
    pub max_buffered_events: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            adapter_url: DEFAULT_ADAPTER_URL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_connections_per_host: 8,
            tls_method: TlsMethod::default(),
            download_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            bind_address: None,
            max_buffered_events: 64,
        }
    }
}

impl BrowserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter_url(mut self, url: impl Into<String>) -> Self {
        self.adapter_url = url.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn max_connections_per_host(mut self, limit: usize) -> Self {
        self.max_connections_per_host = limit;
        self
    }

    pub fn tls_method(mut self, method: TlsMethod) -> Self {
        self.tls_method = method;
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    pub fn max_buffered_events(mut self, limit: usize) -> Self {
        self.max_buffered_events = limit;
        self
    }

    /// Parsed `adapter_url`.
    pub fn base_url(&self) -> Result<Url, SpiderError> {
        let url = Url::parse(&self.adapter_url)?;
        if url.cannot_be_a_base() {
            return Err(SpiderError::ConfigurationError(format!(
                "render service URL '{}' cannot be used as a base",
                self.adapter_url
            )));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), SpiderError> {
        self.base_url()?;
        if self.endpoint.is_empty() {
            return Err(SpiderError::ConfigurationError(
                "render endpoint must not be empty".into(),
            ));
        }
        if self.max_connections_per_host == 0 {
            return Err(SpiderError::ConfigurationError(
                "max_connections_per_host must be greater than 0".into(),
            ));
        }
        if self.max_buffered_events == 0 {
            return Err(SpiderError::ConfigurationError(
                "max_buffered_events must be greater than 0".into(),
            ));
        }
        if self.download_timeout.is_zero() {
            return Err(SpiderError::ConfigurationError(
                "download_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
