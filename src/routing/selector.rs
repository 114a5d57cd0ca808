//! Dispatch target selector — the ordered, total fallback table.
//!
//! Rules, first match wins:
//! 1. Routing directory result (available and well-formed)
//! 2. Entity's explicit service address
//! 3. Entity's DNS name, composed with the kind's fixed scheme
//! 4. Entity's generic URL
//! 5. Tool sets: the platform default workflow, carrying the tools along
//! 6. Platform default workflow (resolved once, short TTL)
//! 7. Static last-resort address
//!
//! Gathering inputs is async (directory, entity store); applying the table is
//! the pure [`apply_fallback_table`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as TokioMutex;

use super::directory::RoutingDirectoryClient;
use super::entities::{EntityRouting, EntityStore};
use super::errors::RoutingError;
use super::types::{
    is_well_formed_url, CacheKey, ContextKind, DispatchTarget, EntityRef, RoutingContext,
    RoutingTarget, TargetSource,
};
use crate::config::RoutingConfig;

// ─── Pure fallback table ─────────────────────────────────────────────────────

/// Everything the fallback table looks at, gathered ahead of time.
#[derive(Debug, Clone, Default)]
pub struct FallbackInputs {
    /// Kind of the addressed entity; `None` for tool sets and empty contexts.
    pub kind: Option<ContextKind>,
    pub entity_id: Option<String>,
    pub directory: Option<RoutingTarget>,
    pub entity: Option<EntityRouting>,
    /// Supplementary tool set (only for tool-set contexts).
    pub tools: Vec<EntityRef>,
    pub default_workflow: Option<DispatchTarget>,
    pub static_fallback: String,
}

/// Rules 1–4: the addressed entity's own routing information.
fn entity_rules(inputs: &FallbackInputs) -> Option<DispatchTarget> {
    let kind = inputs.kind?;

    if let Some(dir) = inputs.directory.as_ref() {
        if dir.available && is_well_formed_url(&dir.url) {
            let mut target = DispatchTarget::new(dir.url.trim(), TargetSource::Directory);
            target.cache_key = inputs
                .entity_id
                .as_ref()
                .map(|id| CacheKey::new(kind, id.clone()));
            target.output_modes = dir.output_modes.clone();
            return Some(target);
        }
    }

    let entity = inputs.entity.as_ref()?;

    if let Some(url) = usable(entity.service_url.as_deref()) {
        return Some(DispatchTarget::new(url, TargetSource::ServiceAddress));
    }

    if let Some(host) = entity
        .dns_name
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
    {
        let (scheme, path) = kind.canonical_scheme();
        let composed = format!("{scheme}://{host}{path}");
        if is_well_formed_url(&composed) {
            return Some(DispatchTarget::new(composed, TargetSource::DnsName));
        }
    }

    if let Some(url) = usable(entity.url.as_deref()) {
        return Some(DispatchTarget::new(url, TargetSource::EntityUrl));
    }

    None
}

fn usable(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|u| is_well_formed_url(u))
        .map(str::to_string)
}

/// Apply the full fallback table. Total: the static fallback always matches.
pub fn apply_fallback_table(inputs: &FallbackInputs) -> DispatchTarget {
    if inputs.kind != Some(ContextKind::Tool) {
        if let Some(target) = entity_rules(inputs) {
            return target;
        }
    }

    let mut target = match inputs.default_workflow.as_ref() {
        Some(default) => default.clone(),
        None => DispatchTarget::new(inputs.static_fallback.clone(), TargetSource::StaticFallback),
    };
    target.tools = inputs.tools.clone();
    target
}

// ─── DispatchTargetSelector ─────────────────────────────────────────────────

/// Resolves a `RoutingContext` into a `DispatchTarget`. Never fails per turn.
pub struct DispatchTargetSelector {
    directory: Arc<RoutingDirectoryClient>,
    entities: Arc<dyn EntityStore>,
    default_workflow_id: Option<String>,
    default_workflow_ttl: Duration,
    static_fallback: String,
    /// Last default workflow resolution and when it happened. A `None`
    /// target is a remembered miss.
    default_workflow: TokioMutex<Option<(Option<DispatchTarget>, Instant)>>,
}

impl DispatchTargetSelector {
    /// Build a selector. Fails only if the static fallback is unusable.
    pub fn new(
        config: &RoutingConfig,
        directory: Arc<RoutingDirectoryClient>,
        entities: Arc<dyn EntityStore>,
    ) -> Result<Self, RoutingError> {
        let static_fallback = config.static_fallback_url.trim().to_string();
        if !is_well_formed_url(&static_fallback) {
            return Err(RoutingError::InvalidStaticFallback {
                url: config.static_fallback_url.clone(),
                reason: "expected an absolute http(s) or ws(s) URL".into(),
            });
        }

        Ok(Self {
            directory,
            entities,
            default_workflow_id: config
                .default_workflow_id
                .clone()
                .filter(|id| !id.trim().is_empty()),
            default_workflow_ttl: config.default_workflow_ttl(),
            static_fallback,
            default_workflow: TokioMutex::new(None),
        })
    }

    /// The always-available last-resort address.
    pub fn static_fallback(&self) -> &str {
        &self.static_fallback
    }

    /// Resolve the dispatch target for a turn.
    pub async fn select(&self, context: &RoutingContext) -> DispatchTarget {
        let mut inputs = FallbackInputs {
            static_fallback: self.static_fallback.clone(),
            ..Default::default()
        };

        let addressed = match context {
            RoutingContext::Workflow(entity) => Some((ContextKind::Workflow, entity)),
            RoutingContext::Agent(entity) => Some((ContextKind::Agent, entity)),
            RoutingContext::ToolSet { .. } | RoutingContext::None => None,
        };
        if let Some((kind, entity)) = addressed {
            self.gather_entity(kind, &entity.id, &mut inputs).await;
            if let Some(target) = entity_rules(&inputs) {
                self.log_selection(context, &target);
                return target;
            }
        }

        match context {
            RoutingContext::ToolSet { tools } => {
                inputs.kind = Some(ContextKind::Tool);
                inputs.tools = tools.clone();
            }
            RoutingContext::Workflow(_) | RoutingContext::Agent(_) | RoutingContext::None => {}
        }

        inputs.default_workflow = self.default_workflow_target().await;
        let target = apply_fallback_table(&inputs);
        self.log_selection(context, &target);
        target
    }

    /// Eagerly forget cached routing data behind a target whose dispatch failed.
    pub async fn report_failure(&self, target: &DispatchTarget) {
        if let Some(key) = target.cache_key.as_ref() {
            self.directory.invalidate(key);
        }
        if target.source == TargetSource::DefaultWorkflow {
            let mut cached = self.default_workflow.lock().await;
            if cached.take().is_some() {
                tracing::info!(url = %target.url, "dropped cached default workflow target");
            }
        }
    }

    async fn gather_entity(&self, kind: ContextKind, id: &str, inputs: &mut FallbackInputs) {
        inputs.kind = Some(kind);
        inputs.entity_id = Some(id.to_string());
        inputs.directory = self.directory.resolve(kind, id).await.into_target();
        if inputs.directory.is_none() {
            inputs.entity = self.entities.routing_fields(kind, id).await;
        }
    }

    /// Rule 6: the platform default workflow, resolved at most once per TTL.
    ///
    /// Misses are remembered for the same TTL. The lock is held across
    /// resolution so concurrent sessions share one lookup.
    async fn default_workflow_target(&self) -> Option<DispatchTarget> {
        let id = self.default_workflow_id.as_deref()?;
        let mut cached = self.default_workflow.lock().await;

        if let Some((target, resolved_at)) = cached.as_ref() {
            if resolved_at.elapsed() < self.default_workflow_ttl {
                return target.clone();
            }
        }

        let mut inputs = FallbackInputs::default();
        self.gather_entity(ContextKind::Workflow, id, &mut inputs).await;
        let resolved = entity_rules(&inputs).map(|mut target| {
            target.source = TargetSource::DefaultWorkflow;
            target
        });

        match &resolved {
            Some(target) => {
                tracing::info!(workflow_id = id, url = %target.url, "resolved platform default workflow");
            }
            None => {
                tracing::warn!(
                    workflow_id = id,
                    retry_after_secs = self.default_workflow_ttl.as_secs(),
                    "platform default workflow has no usable address"
                );
            }
        }
        *cached = Some((resolved.clone(), Instant::now()));
        resolved
    }

    fn log_selection(&self, context: &RoutingContext, target: &DispatchTarget) {
        tracing::info!(
            context = context.label(),
            source = target.source.as_str(),
            url = %target.url,
            tools = target.tools.len(),
            "dispatch target selected"
        );
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
