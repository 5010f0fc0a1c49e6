//! Append-only context threaded through one pipeline run
//!
//! Each stage adds exactly one key. Keys are never rewritten, and a stage can
//! only read the keys listed by `reads_for`.

use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::models::{
    ContextKey, Decision, Extracted, PerceptionRecord, PlanSet, Provenance, StageId, WorldModel,
};
use crate::Result;

#[derive(Debug, Clone)]
pub enum ContextEntry {
    Perception(Extracted<PerceptionRecord>),
    WorldModel(Extracted<WorldModel>),
    Plans(Extracted<PlanSet>),
    Decision(Extracted<Decision>),
}

impl ContextEntry {
    pub fn key(&self) -> ContextKey {
        match self {
            ContextEntry::Perception(_) => ContextKey::Perception,
            ContextEntry::WorldModel(_) => ContextKey::WorldModel,
            ContextEntry::Plans(_) => ContextKey::Plans,
            ContextEntry::Decision(_) => ContextKey::Decision,
        }
    }

    pub fn provenance(&self) -> &Provenance {
        match self {
            ContextEntry::Perception(e) => &e.provenance,
            ContextEntry::WorldModel(e) => &e.provenance,
            ContextEntry::Plans(e) => &e.provenance,
            ContextEntry::Decision(e) => &e.provenance,
        }
    }

    /// Pretty JSON of the record, as embedded into downstream prompts.
    pub fn render(&self) -> Result<String> {
        let text = match self {
            ContextEntry::Perception(e) => serde_json::to_string_pretty(&e.record)?,
            ContextEntry::WorldModel(e) => serde_json::to_string_pretty(&e.record)?,
            ContextEntry::Plans(e) => serde_json::to_string_pretty(&e.record)?,
            ContextEntry::Decision(e) => serde_json::to_string_pretty(&e.record)?,
        };
        Ok(text)
    }
}

/// Context keys a stage is allowed (and required) to read.
pub fn reads_for(stage: StageId) -> &'static [ContextKey] {
    match stage {
        StageId::Perception => &[],
        StageId::Modeling => &[ContextKey::Perception],
        StageId::Reasoning => &[ContextKey::WorldModel],
        StageId::Decision => &[ContextKey::WorldModel, ContextKey::Plans],
        StageId::Report => &[
            ContextKey::Perception,
            ContextKey::WorldModel,
            ContextKey::Decision,
        ],
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResearchContext {
    entries: BTreeMap<ContextKey, ContextEntry>,
}

impl ResearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage output. Writing a key twice is a sequencing bug.
    pub fn insert(&mut self, entry: ContextEntry) -> Result<()> {
        let key = entry.key();
        if self.entries.contains_key(&key) {
            return Err(PipelineError::DuplicateContextKey { key });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn get(&self, key: ContextKey) -> Option<&ContextEntry> {
        self.entries.get(&key)
    }

    pub fn keys(&self) -> Vec<ContextKey> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Restrict the context to what `stage` may read, failing on any absent key.
    pub fn view(&self, stage: StageId) -> Result<StageView<'_>> {
        let mut entries = BTreeMap::new();
        for &field in reads_for(stage) {
            let entry = self
                .entries
                .get(&field)
                .ok_or(PipelineError::MissingContextField { stage, field })?;
            entries.insert(field, entry);
        }
        Ok(StageView { stage, entries })
    }

    pub fn perception(&self) -> Option<&Extracted<PerceptionRecord>> {
        match self.get(ContextKey::Perception) {
            Some(ContextEntry::Perception(e)) => Some(e),
            _ => None,
        }
    }

    pub fn world_model(&self) -> Option<&Extracted<WorldModel>> {
        match self.get(ContextKey::WorldModel) {
            Some(ContextEntry::WorldModel(e)) => Some(e),
            _ => None,
        }
    }

    pub fn plans(&self) -> Option<&Extracted<PlanSet>> {
        match self.get(ContextKey::Plans) {
            Some(ContextEntry::Plans(e)) => Some(e),
            _ => None,
        }
    }

    pub fn decision(&self) -> Option<&Extracted<Decision>> {
        match self.get(ContextKey::Decision) {
            Some(ContextEntry::Decision(e)) => Some(e),
            _ => None,
        }
    }
}

/// The slice of context one stage is allowed to see.
#[derive(Debug)]
pub struct StageView<'a> {
    stage: StageId,
    entries: BTreeMap<ContextKey, &'a ContextEntry>,
}

impl<'a> StageView<'a> {
    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn keys(&self) -> Vec<ContextKey> {
        self.entries.keys().copied().collect()
    }

    /// Rendered text of an allowed key.
    pub fn render(&self, field: ContextKey) -> Result<String> {
        self.entries
            .get(&field)
            .ok_or(PipelineError::MissingContextField {
                stage: self.stage,
                field,
            })?
            .render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{sentinel, StageShape};
    use crate::models::SentinelCause;

    fn perception_entry() -> ContextEntry {
        ContextEntry::Perception(sentinel(SentinelCause::Malformed {
            detail: "test".into(),
        }))
    }

    #[test]
    fn test_insert_is_append_only() {
        let mut ctx = ResearchContext::new();
        ctx.insert(perception_entry()).unwrap();

        let err = ctx.insert(perception_entry()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateContextKey { key: ContextKey::Perception }
        ));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_view_requires_upstream_fields() {
        let ctx = ResearchContext::new();
        assert!(ctx.view(StageId::Perception).is_ok());

        let err = ctx.view(StageId::Modeling).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingContextField {
                stage: StageId::Modeling,
                field: ContextKey::Perception
            }
        ));
    }

    #[test]
    fn test_view_hides_unlisted_fields() {
        let mut ctx = ResearchContext::new();
        ctx.insert(perception_entry()).unwrap();
        ctx.insert(ContextEntry::WorldModel(Extracted {
            record: WorldModel::sentinel(),
            provenance: Provenance::Sentinel {
                cause: SentinelCause::Transport { message: "down".into() },
            },
        }))
        .unwrap();

        let view = ctx.view(StageId::Reasoning).unwrap();
        assert_eq!(view.keys(), vec![ContextKey::WorldModel]);
        assert!(view.render(ContextKey::Perception).is_err());
        assert!(view.render(ContextKey::WorldModel).unwrap().contains("[parse failed]"));
    }

    #[test]
    fn test_typed_accessors() {
        let mut ctx = ResearchContext::new();
        assert!(ctx.perception().is_none());
        ctx.insert(perception_entry()).unwrap();
        assert!(ctx.perception().is_some_and(|p| p.is_sentinel()));
        assert!(ctx.plans().is_none());
    }
}
