//! Cluster guard for the TTN control plane.
//!
//! TTN partitions device registrations by cluster (`eu1`, `nam1`, ...).
//! Credentials and device identifiers are not portable across clusters, and a
//! device touched from the wrong cluster becomes a permanently orphaned
//! registration. Every outbound request must therefore be checked against the
//! single approved cluster before it is sent.

use thiserror::Error;
use url::Url;

/// A request was about to leave the approved cluster.
#[derive(Debug, Error)]
#[error("cluster violation: '{requested}' is not the approved cluster '{approved}'")]
pub struct ClusterViolation {
    /// The offending URL (or its authority) that was requested.
    pub requested: String,
    /// The approved cluster authority.
    pub approved: String,
}

/// Immutable single-cluster configuration, validated once at startup.
///
/// The guard itself is a pure function over this value and a requested URL;
/// there is no mutable global state.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    base_url: Url,
}

impl ClusterConfig {
    /// Parse and validate the approved base URL.
    ///
    /// The URL must be absolute, use `https`, and carry a host. Any path,
    /// query, or fragment is stripped so endpoint concatenation stays
    /// predictable.
    pub fn new(base_url: &str) -> Result<Self, ClusterConfigError> {
        let config = Self::new_allowing_http(base_url)?;
        if config.base_url.scheme() != "https" {
            return Err(ClusterConfigError::InsecureScheme(
                config.base_url.scheme().to_string(),
            ));
        }
        Ok(config)
    }

    /// Like [`ClusterConfig::new`] but permits plain `http`.
    ///
    /// Only for local mock servers in tests and development; production
    /// configuration goes through [`ClusterConfig::new`].
    pub fn new_allowing_http(base_url: &str) -> Result<Self, ClusterConfigError> {
        let mut url =
            Url::parse(base_url).map_err(|e| ClusterConfigError::InvalidUrl(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClusterConfigError::InsecureScheme(url.scheme().to_string()));
        }
        if url.host_str().is_none() {
            return Err(ClusterConfigError::MissingHost);
        }
        // Normalize: the base is a host root, never a sub-path.
        url.set_path("");
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { base_url: url })
    }

    /// The approved base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The approved cluster host, e.g. `nam1.cloud.thethings.network`.
    #[must_use]
    pub fn host(&self) -> &str {
        // Host presence is validated in the constructors.
        self.base_url.host_str().unwrap_or_default()
    }

    /// Host plus explicit port, when one is configured.
    #[must_use]
    pub fn authority(&self) -> String {
        match self.base_url.port() {
            Some(port) => format!("{}:{port}", self.host()),
            None => self.host().to_string(),
        }
    }

    /// The cluster short name (first host label), e.g. `nam1`.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        self.host().split('.').next().unwrap_or_default()
    }

    /// Build a full URL for an API path on the approved cluster.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}://{}{}{}",
            self.base_url.scheme(),
            self.authority(),
            if path.starts_with('/') { "" } else { "/" },
            path
        )
    }
}

/// Errors raised while validating the cluster configuration at startup.
#[derive(Debug, Error)]
pub enum ClusterConfigError {
    /// The base URL could not be parsed.
    #[error("invalid cluster base URL: {0}")]
    InvalidUrl(String),

    /// Only TLS endpoints are allowed for the control plane.
    #[error("cluster base URL must use https, got '{0}'")]
    InsecureScheme(String),

    /// The base URL has no host component.
    #[error("cluster base URL has no host")]
    MissingHost,
}

/// Assert that `url` targets the approved cluster.
///
/// Hard precondition for every call site, including retries and fallbacks:
/// the check fails closed before any network traffic is issued. Scheme, host,
/// and port must all match the approved base.
pub fn assert_single_cluster(config: &ClusterConfig, url: &str) -> Result<(), ClusterViolation> {
    let approved = config.authority();

    let parsed = Url::parse(url).map_err(|_| ClusterViolation {
        requested: url.to_string(),
        approved: approved.clone(),
    })?;

    let requested = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };

    if parsed.scheme() == config.base_url().scheme() && requested == approved {
        return Ok(());
    }

    Err(ClusterViolation {
        requested,
        approved,
    })
}
