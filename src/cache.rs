use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::generator::GenerationRecord;
use crate::workflow::WorkflowPrompt;

/// In-memory result cache keyed by the content hash of a fully-instantiated
/// prompt (see [`WorkflowPrompt::content_hash`]).
///
/// Injected into the generator by whoever owns it; never process-global
/// state. Two instantiations with identical nodes hit the same entry even
/// though their correlation ids differ.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, GenerationRecord>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, prompt: &WorkflowPrompt) -> Option<GenerationRecord> {
        let key = prompt.content_hash();
        let hit = self
            .entries
            .lock()
            .expect("cache mutex poisoned")
            .get(&key)
            .cloned();
        if hit.is_some() {
            debug!(%key, "result cache hit");
        }
        hit
    }

    pub fn insert(&self, prompt: &WorkflowPrompt, record: GenerationRecord) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(prompt.content_hash(), record);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }
}
