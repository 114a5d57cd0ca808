//! Routing — from a user's context selection to a concrete dispatch target.
//!
//! This module handles:
//! - Mapping loose context selections onto a closed `RoutingContext`
//! - Querying the metadata authority for declared routing endpoints (TTL cached)
//! - Reading routing fields from the entity store
//! - Applying the ordered fallback table that always yields a usable target
//!
//! Nothing in here fails per turn. The only hard error is a misconfigured
//! static fallback, which is rejected at startup.

pub mod context;
pub mod directory;
pub mod entities;
pub mod errors;
pub mod selector;
pub mod types;

// Re-exports for convenience
pub use context::{resolve_context, resolve_context_value, ContextSelection};
pub use directory::{DirectoryLookup, RoutingDirectoryClient, UnresolvedReason};
pub use entities::{EntityRouting, EntityStore, StaticEntityStore};
pub use errors::RoutingError;
pub use selector::{apply_fallback_table, DispatchTargetSelector, FallbackInputs};
pub use types::{
    CacheKey, ContextKind, DispatchTarget, EntityRef, RoutingContext, RoutingTarget, TargetSource,
};
