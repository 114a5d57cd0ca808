//! Context resolver — maps a loose user selection onto a `RoutingContext`.
//!
//! Pure and total: anything malformed or unknown resolves to
//! `RoutingContext::None`.

use serde::Deserialize;

use super::types::{EntityRef, RoutingContext};

/// The inbound shape of a context selection, as a UI or API sends it.
///
/// Every field is optional; the resolver decides what the combination means.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextSelection {
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Tool ids for tool-set selections.
    #[serde(default, alias = "tools", alias = "tool_ids")]
    pub ids: Option<Vec<String>>,
}

/// Resolve a selection into a routing context.
pub fn resolve_context(selection: &ContextSelection) -> RoutingContext {
    let kind = match selection.kind.as_deref() {
        Some(k) => k.trim().to_ascii_lowercase(),
        None => return RoutingContext::None,
    };

    match kind.as_str() {
        "workflow" => single_entity(selection).map_or(RoutingContext::None, RoutingContext::Workflow),
        "agent" => single_entity(selection).map_or(RoutingContext::None, RoutingContext::Agent),
        "tools" | "toolset" | "tool_set" | "tool" => {
            let mut tools: Vec<EntityRef> = selection
                .ids
                .iter()
                .flatten()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(EntityRef::new)
                .collect();
            // A single `tool` selection may carry its id in `id` instead of `ids`.
            if tools.is_empty() {
                if let Some(entity) = single_entity(selection) {
                    tools.push(entity);
                }
            }
            if tools.is_empty() {
                RoutingContext::None
            } else {
                let mut seen = std::collections::HashSet::new();
                tools.retain(|t| seen.insert(t.id.clone()));
                RoutingContext::ToolSet { tools }
            }
        }
        _ => RoutingContext::None,
    }
}

/// Resolve an arbitrary JSON payload. Non-objects and shape mismatches
/// resolve to `None`.
pub fn resolve_context_value(value: &serde_json::Value) -> RoutingContext {
    match serde_json::from_value::<ContextSelection>(value.clone()) {
        Ok(selection) => resolve_context(&selection),
        Err(e) => {
            tracing::debug!(error = %e, "malformed context selection, routing without context");
            RoutingContext::None
        }
    }
}

fn single_entity(selection: &ContextSelection) -> Option<EntityRef> {
    let id = selection.id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    let name = selection
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Some(EntityRef {
        id: id.to_string(),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sel(kind: &str, id: Option<&str>) -> ContextSelection {
        ContextSelection {
            kind: Some(kind.to_string()),
            id: id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_workflow() {
        let ctx = resolve_context(&sel("workflow", Some("wf-1")));
        assert_eq!(ctx, RoutingContext::Workflow(EntityRef::new("wf-1")));
    }

    #[test]
    fn test_resolve_agent_case_insensitive_with_name() {
        let mut s = sel("  Agent ", Some("a-7"));
        s.name = Some("Researcher".into());
        let ctx = resolve_context(&s);
        assert_eq!(ctx, RoutingContext::Agent(EntityRef::named("a-7", "Researcher")));
    }

    #[test]
    fn test_resolve_tool_set_drops_blank_ids() {
        let s = ContextSelection {
            kind: Some("tools".into()),
            ids: Some(vec!["t1".into(), "  ".into(), "t2".into()]),
            ..Default::default()
        };
        let ctx = resolve_context(&s);
        assert_eq!(
            ctx,
            RoutingContext::ToolSet {
                tools: vec![EntityRef::new("t1"), EntityRef::new("t2")]
            }
        );
    }

    #[test]
    fn test_resolve_missing_id_is_none() {
        assert_eq!(resolve_context(&sel("agent", None)), RoutingContext::None);
        assert_eq!(resolve_context(&sel("workflow", Some("   "))), RoutingContext::None);
    }

    #[test]
    fn test_resolve_unknown_kind_is_none() {
        assert_eq!(resolve_context(&sel("galaxy", Some("x"))), RoutingContext::None);
        assert_eq!(resolve_context(&ContextSelection::default()), RoutingContext::None);
    }

    #[test]
    fn test_resolve_empty_tool_set_is_none() {
        let s = ContextSelection {
            kind: Some("toolset".into()),
            ids: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(resolve_context(&s), RoutingContext::None);
    }

    #[test]
    fn test_resolve_value_shapes() {
        assert_eq!(
            resolve_context_value(&json!({"type": "agent", "id": "a1"})),
            RoutingContext::Agent(EntityRef::new("a1"))
        );
        assert_eq!(
            resolve_context_value(&json!({"kind": "tools", "tools": ["x"]})),
            RoutingContext::ToolSet { tools: vec![EntityRef::new("x")] }
        );
        assert_eq!(resolve_context_value(&json!("agent")), RoutingContext::None);
        assert_eq!(resolve_context_value(&json!({"kind": 5})), RoutingContext::None);
        assert_eq!(resolve_context_value(&json!(null)), RoutingContext::None);
    }
}
