//! Tenant resolution: turns request attributes into a tenant id.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use sea_orm::DatabaseConnection;
use tracing::debug;

use crate::error::TenancyError;
use crate::repositories::CompanyRepository;
use crate::tenant::TenantId;

/// The request attributes resolvers may inspect.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    /// Route and query parameters, merged.
    pub params: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, ctx: &RequestContext) -> Result<TenantId, TenancyError>;
}

/// Always resolves to one configured tenant.
#[derive(Debug, Clone, Copy)]
pub struct SingleTenantResolver(pub TenantId);

#[async_trait]
impl TenantResolver for SingleTenantResolver {
    async fn resolve(&self, _ctx: &RequestContext) -> Result<TenantId, TenancyError> {
        Ok(self.0)
    }
}

/// Reads the tenant id from the request path, falling back to a `company_id`
/// parameter, and checks it against the control-plane directory.
pub struct PathTenantResolver {
    pattern: Regex,
    control_plane: DatabaseConnection,
}

pub const TENANT_PARAM: &str = "company_id";

impl PathTenantResolver {
    /// `pattern` must contain a named `tenant` capture group.
    pub fn new(pattern: Regex, control_plane: DatabaseConnection) -> Self {
        Self {
            pattern,
            control_plane,
        }
    }

    fn extract(&self, ctx: &RequestContext) -> Option<TenantId> {
        self.pattern
            .captures(&ctx.path)
            .and_then(|caps| caps.name("tenant"))
            .and_then(|m| m.as_str().parse().ok())
            .or_else(|| ctx.params.get(TENANT_PARAM).and_then(|v| v.parse().ok()))
    }
}

#[async_trait]
impl TenantResolver for PathTenantResolver {
    async fn resolve(&self, ctx: &RequestContext) -> Result<TenantId, TenancyError> {
        let tenant = self
            .extract(ctx)
            .ok_or_else(|| TenancyError::InvalidTenantReference(ctx.path.clone()))?;

        if !CompanyRepository::new(&self.control_plane)
            .exists(tenant)
            .await?
        {
            debug!(tenant_id = %tenant, path = %ctx.path, "unknown tenant");
            return Err(TenancyError::TenantNotFound(tenant));
        }
        Ok(tenant)
    }
}
