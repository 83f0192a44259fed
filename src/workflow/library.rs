use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::template::WorkflowTemplate;
use crate::error::EaselError;

/// A directory of workflow template files.
///
/// Templates are JSON files; the template id is the file stem. Loaded
/// templates are cached behind `Arc` so repeated loads and concurrent
/// instantiations share one immutable copy.
#[derive(Debug)]
pub struct TemplateLibrary {
    dir: PathBuf,
    cache: HashMap<String, Arc<WorkflowTemplate>>,
}

impl TemplateLibrary {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EaselError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(EaselError::Config(format!(
                "template directory not found: {}",
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            cache: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All template ids in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>, EaselError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load a template by id, reading from disk on first use.
    pub fn load(&mut self, template_id: &str) -> Result<Arc<WorkflowTemplate>, EaselError> {
        if let Some(template) = self.cache.get(template_id) {
            return Ok(Arc::clone(template));
        }

        let path = self.dir.join(format!("{template_id}.json"));
        if !path.is_file() {
            return Err(EaselError::TemplateNotFound(template_id.to_string()));
        }

        debug!(template_id, path = %path.display(), "loading template");
        let template = Arc::new(WorkflowTemplate::from_file(&path)?);
        self.cache
            .insert(template_id.to_string(), Arc::clone(&template));
        Ok(template)
    }

    /// Template ids whose category matches, sorted. `None` matches templates
    /// with no category.
    pub fn by_category(&mut self, category: Option<&str>) -> Result<Vec<String>, EaselError> {
        let mut ids = Vec::new();
        for id in self.list()? {
            let template = self.load(&id)?;
            if template.category.as_deref() == category {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Drop cached templates so the next load reads fresh data from disk.
    pub fn reload(&mut self) {
        self.cache.clear();
    }
}
