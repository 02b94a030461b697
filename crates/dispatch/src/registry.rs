//! Static name → handler table.
//!
//! Built once at startup and shared read-only by the dispatcher and every
//! queue worker. Only names registered here can ever be executed; a remote
//! message naming anything else is rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::DispatchError;
use crate::stage::StageHandler;

#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<String, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. Names are unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl StageHandler + 'static,
    ) -> Result<(), DispatchError> {
        let name = name.into();
        if self.stages.contains_key(&name) {
            return Err(DispatchError::DuplicateStage(name));
        }
        self.stages.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(
        mut self,
        name: impl Into<String>,
        handler: impl StageHandler + 'static,
    ) -> Result<Self, DispatchError> {
        self.register(name, handler)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StageHandler>, DispatchError> {
        self.stages
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownStage(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::stage::{stage_fn, StageError, StageOutcome};

    fn noop() -> impl StageHandler {
        stage_fn(|_item, _ctx| async { Ok::<StageOutcome, StageError>(None) })
    }

    #[test]
    fn registered_names_resolve() {
        let registry = StageRegistry::new()
            .with("process_lane", noop())
            .and_then(|r| r.with("process_sample", noop()))
            .unwrap();
        assert!(registry.get("process_lane").is_ok());
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            ["process_lane", "process_sample"]
        );
    }

    #[test]
    fn unknown_name_is_rejected() {
        let registry = StageRegistry::new();
        assert_matches!(
            registry.get("os.system"),
            Err(DispatchError::UnknownStage(name)) if name == "os.system"
        );
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = StageRegistry::new();
        registry.register("process_lane", noop()).unwrap();
        assert_matches!(
            registry.register("process_lane", noop()),
            Err(DispatchError::DuplicateStage(_))
        );
    }
}
