//! Configuration validation

use super::schema::Config;
use crate::error::{Result, ValidationError};
use http::HeaderName;
use ipnet::IpNet;
use std::net::SocketAddr;
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration
    pub fn validate(config: &Config) -> Result<()> {
        Self::validate_server(config)?;
        Self::validate_upstream(config)?;
        Self::validate_tenancy(config)?;
        Self::validate_identity(config)?;
        Self::validate_membership(config)?;
        Ok(())
    }

    fn validate_server(config: &Config) -> Result<()> {
        if config.server.listen.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListen {
                addr: config.server.listen.clone(),
            }
            .into());
        }

        let mount = &config.server.mount_path;
        if !mount.starts_with('/') || mount.contains("//") {
            return Err(ValidationError::InvalidMountPath {
                path: mount.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Upstream must be a plain http URL with a host; TLS is handled elsewhere
    fn validate_upstream(config: &Config) -> Result<()> {
        let raw = &config.upstream.url;
        let invalid = |reason: &str| ValidationError::InvalidUpstream {
            url: raw.clone(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid("only http upstreams are supported").into());
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host").into());
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed").into());
        }

        if config.upstream.max_response_bytes == 0 {
            return Err(ValidationError::Empty {
                field: "upstream.max_response_bytes".to_string(),
            }
            .into());
        }

        Ok(())
    }

    fn validate_tenancy(config: &Config) -> Result<()> {
        if config.tenancy.default_index.is_empty() {
            return Err(ValidationError::Empty {
                field: "tenancy.default_index".to_string(),
            }
            .into());
        }
        if config.tenancy.bypass_principal.is_empty() {
            return Err(ValidationError::Empty {
                field: "tenancy.bypass_principal".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn validate_identity(config: &Config) -> Result<()> {
        if HeaderName::from_bytes(config.identity.header.as_bytes()).is_err() {
            return Err(ValidationError::InvalidHeader {
                name: config.identity.header.clone(),
            }
            .into());
        }

        for cidr in &config.identity.trusted_proxies {
            if cidr.parse::<IpNet>().is_err() {
                return Err(ValidationError::InvalidCidr { cidr: cidr.clone() }.into());
            }
        }

        Ok(())
    }

    fn validate_membership(config: &Config) -> Result<()> {
        for (principal, indices) in &config.membership {
            if indices.iter().any(|index| index.is_empty()) {
                return Err(ValidationError::EmptyIndex {
                    principal: principal.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}
