//! Tool registry: name → tool definition, and the enabled set (spec §4.8).

use crate::types::{ToolDefinition, ToolListing};
use parking_lot::RwLock;
use std::collections::HashMap;

const EXCLUDED_PREFIXES: &[&str] = &["Test", "Mock", "Base", "Abstract", "Example", "_"];

/// Maps tool name to its immutable definition and tracks which tools are
/// currently enabled. Definitions never change after registration (spec §3
/// "Lifecycles"); only the enabled set is mutable.
pub struct ToolRegistry {
    definitions: RwLock<HashMap<String, ToolDefinition>>,
    enabled: RwLock<HashMap<String, bool>>,
    /// Bumped whenever the registry's membership changes, so concurrency
    /// gates created against a stale epoch are not silently reused.
    epoch: std::sync::atomic::AtomicU64,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            enabled: RwLock::new(HashMap::new()),
            epoch: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Registers a tool, skipping it if its name matches an excluded
    /// pattern (spec §4.8: prefixes `Test`, `Mock`, `Base`, `Abstract`,
    /// `Example`, or leading `_`). Returns `true` if registered.
    pub fn register(&self, def: ToolDefinition) -> bool {
        if is_excluded(&def.name) {
            tracing::debug!(tool = %def.name, "skipping excluded tool name during registration");
            return false;
        }
        let name = def.name.clone();
        self.definitions.write().insert(name.clone(), def);
        self.enabled.write().insert(name, true);
        self.epoch.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        true
    }

    /// Registers a tool only if its name passes the include/exclude CSV
    /// filters (spec §4.8 "optional filters `include`/`exclude`").
    pub fn register_filtered(
        &self,
        def: ToolDefinition,
        include: Option<&[String]>,
        exclude: Option<&[String]>,
    ) -> bool {
        if let Some(include) = include {
            if !include.iter().any(|n| n == &def.name) {
                return false;
            }
        }
        if let Some(exclude) = exclude {
            if exclude.iter().any(|n| n == &def.name) {
                return false;
            }
        }
        self.register(def)
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.definitions.read().get(name).cloned()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.read().get(name).copied().unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    /// Idempotent: enabling an already-enabled (or unknown) tool is a no-op
    /// that still returns success for unknown names being a caller error,
    /// surfaced by the orchestrator rather than here.
    pub fn enable(&self, name: &str) -> bool {
        if !self.definitions.read().contains_key(name) {
            return false;
        }
        self.enabled.write().insert(name.to_string(), true);
        true
    }

    pub fn disable(&self, name: &str) -> bool {
        if !self.definitions.read().contains_key(name) {
            return false;
        }
        self.enabled.write().insert(name.to_string(), false);
        true
    }

    /// Lists every registered tool regardless of enabled state — disabled
    /// tools are still listed (with `enabled: false`) but are not
    /// executable, per spec §4.8.
    pub fn list(&self) -> Vec<ToolListing> {
        let defs = self.definitions.read();
        let enabled = self.enabled.read();
        let mut listings: Vec<_> = defs
            .values()
            .map(|d| ToolListing {
                name: d.name.clone(),
                enabled: enabled.get(&d.name).copied().unwrap_or(false),
                command: d.command_name.clone(),
                description: d.description.clone(),
                concurrency: d.concurrency,
                timeout: d.default_timeout_sec,
                has_metrics: true,
                has_breaker: true,
            })
            .collect();
        listings.sort_by(|a, b| a.name.cmp(&b.name));
        listings
    }
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
}
