//! Template Bootstrap Renderer
//!
//! Renders named bootstrap scripts with minijinja. Scripts see the snapshot's
//! value map merged with the injected cluster facts, so a node script can
//! reference `{{ INJECTEDMASTER }}`. Referencing an undefined value is an
//! error rather than an empty string.

use crate::cluster::ClusterSnapshot;
use crate::domain::ports::BootstrapRenderer;
use crate::error::{Error, Result};
use crate::reconciler::ClusterFacts;
use minijinja::{Environment, UndefinedBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Bootstrap renderer over a table of named script sources
pub struct TemplateRenderer {
    env: Environment<'static>,
    scripts: BTreeMap<String, String>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self {
            env,
            scripts: BTreeMap::new(),
        }
    }

    /// Add a script source under a name
    pub fn with_script(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.scripts.insert(name.into(), source.into());
        self
    }

    /// Load every regular file in `dir` as a script named after the file
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut renderer = Self::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let source = fs::read_to_string(entry.path())?;
            debug!(script = %name, "Loaded bootstrap script");
            renderer.scripts.insert(name, source);
        }
        Ok(renderer)
    }

    /// Names of the known scripts
    pub fn script_names(&self) -> Vec<&str> {
        self.scripts.keys().map(String::as_str).collect()
    }
}

impl BootstrapRenderer for TemplateRenderer {
    fn render(
        &self,
        scripts: &[String],
        snapshot: &ClusterSnapshot,
        facts: &ClusterFacts,
    ) -> Result<Vec<u8>> {
        let values = facts.template_values(snapshot);
        let mut payload = Vec::new();

        for name in scripts {
            let source = self
                .scripts
                .get(name)
                .ok_or_else(|| Error::Render(format!("unknown bootstrap script {}", name)))?;
            let rendered = self
                .env
                .render_str(source, &values)
                .map_err(|e| Error::Render(format!("{}: {}", name, e)))?;
            payload.extend_from_slice(rendered.as_bytes());
        }

        Ok(payload)
    }
}
