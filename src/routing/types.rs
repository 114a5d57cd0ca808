//! Shared routing types.
//!
//! `RoutingContext` is the closed set of things a turn can be addressed to.
//! `RoutingTarget` is what the metadata authority declares for an entity, and
//! `DispatchTarget` is what the selector finally hands to the transport.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Routing Context ────────────────────────────────────────────────────────

/// Reference to a routable entity (agent, workflow or tool).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// The typed routing selection for one turn.
///
/// Constructed once per turn by the context resolver and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingContext {
    #[default]
    None,
    Workflow(EntityRef),
    Agent(EntityRef),
    ToolSet { tools: Vec<EntityRef> },
}

impl RoutingContext {
    /// The kind of entity this context addresses, if any.
    pub fn kind(&self) -> Option<ContextKind> {
        match self {
            RoutingContext::None => None,
            RoutingContext::Workflow(_) => Some(ContextKind::Workflow),
            RoutingContext::Agent(_) => Some(ContextKind::Agent),
            RoutingContext::ToolSet { .. } => Some(ContextKind::Tool),
        }
    }

    /// Short label used in logs and wire payloads.
    pub fn label(&self) -> &'static str {
        match self {
            RoutingContext::None => "none",
            RoutingContext::Workflow(_) => "workflow",
            RoutingContext::Agent(_) => "agent",
            RoutingContext::ToolSet { .. } => "tool_set",
        }
    }
}

/// Entity kinds known to the metadata authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Workflow,
    Agent,
    Tool,
}

impl ContextKind {
    /// Path segment used when querying the metadata authority.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Workflow => "workflow",
            ContextKind::Agent => "agent",
            ContextKind::Tool => "tool",
        }
    }

    /// Fixed `(scheme, path)` used to compose a URL from a bare host name.
    pub fn canonical_scheme(&self) -> (&'static str, &'static str) {
        match self {
            ContextKind::Agent => ("http", "/a2a"),
            ContextKind::Workflow => ("https", "/chat"),
            ContextKind::Tool => ("http", "/invoke"),
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key for the routing-target cache: `(context type, entity id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub kind: ContextKind,
    pub id: String,
}

impl CacheKey {
    pub fn new(kind: ContextKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

// ─── Targets ────────────────────────────────────────────────────────────────

/// A routing endpoint declared by the metadata authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTarget {
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input_modes: Vec<String>,
    #[serde(default)]
    pub output_modes: Vec<String>,
    #[serde(default)]
    pub health_url: Option<String>,
    pub available: bool,
    /// When this target was fetched from the authority.
    pub cached_at: DateTime<Utc>,
}

/// Which rule of the fallback table produced a dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    Directory,
    ServiceAddress,
    DnsName,
    EntityUrl,
    DefaultWorkflow,
    StaticFallback,
}

impl TargetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSource::Directory => "directory",
            TargetSource::ServiceAddress => "service_address",
            TargetSource::DnsName => "dns_name",
            TargetSource::EntityUrl => "entity_url",
            TargetSource::DefaultWorkflow => "default_workflow",
            TargetSource::StaticFallback => "static_fallback",
        }
    }
}

/// The resolved endpoint a turn is sent to.
///
/// Always carries a non-empty URL; the selector guarantees that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTarget {
    pub url: String,
    pub source: TargetSource,
    /// Directory cache entry this target was served from, for eager invalidation.
    #[serde(default)]
    pub cache_key: Option<CacheKey>,
    /// Tool set carried along when a ToolSet context was folded into the
    /// default workflow.
    #[serde(default)]
    pub tools: Vec<EntityRef>,
    #[serde(default)]
    pub output_modes: Vec<String>,
}

impl DispatchTarget {
    pub fn new(url: impl Into<String>, source: TargetSource) -> Self {
        Self {
            url: url.into(),
            source,
            cache_key: None,
            tools: Vec::new(),
            output_modes: Vec::new(),
        }
    }
}

/// Whether `raw` is an absolute http(s)/ws(s) URL with a host.
pub fn is_well_formed_url(raw: &str) -> bool {
    match reqwest::Url::parse(raw.trim()) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https" | "ws" | "wss")
                && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_url_accepts_http_and_ws() {
        assert!(is_well_formed_url("http://svc.internal/a2a"));
        assert!(is_well_formed_url("https://example.com"));
        assert!(is_well_formed_url("wss://example.com/socket"));
    }

    #[test]
    fn test_well_formed_url_rejects_garbage() {
        assert!(!is_well_formed_url(""));
        assert!(!is_well_formed_url("not a url"));
        assert!(!is_well_formed_url("svc.internal"));
        assert!(!is_well_formed_url("ftp://files.example.com"));
        assert!(!is_well_formed_url("file:///etc/passwd"));
    }

    #[test]
    fn test_context_kind_and_label() {
        let ctx = RoutingContext::Agent(EntityRef::new("a1"));
        assert_eq!(ctx.kind(), Some(ContextKind::Agent));
        assert_eq!(ctx.label(), "agent");
        assert_eq!(RoutingContext::None.kind(), None);
        let tools = RoutingContext::ToolSet { tools: vec![EntityRef::new("t1")] };
        assert_eq!(tools.kind(), Some(ContextKind::Tool));
    }

    #[test]
    fn test_routing_context_serializes_tagged() {
        let ctx = RoutingContext::Workflow(EntityRef::named("wf-1", "Onboarding"));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["kind"], "workflow");
        assert_eq!(json["id"], "wf-1");
        assert_eq!(json["name"], "Onboarding");
    }
}
