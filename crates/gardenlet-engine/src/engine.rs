//! Template engine based on MiniJinja
//!
//! An [`Engine`] owns its compiled templates. Components build one in their
//! constructor and keep it, so there is no process-wide template state and a
//! broken template surfaces as an error from the constructor.

use minijinja::Environment;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;

/// Template engine builder
pub struct EngineBuilder {
    templates: Vec<(String, String)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            templates: Vec::new(),
        }
    }

    /// Register a template under a name
    pub fn template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.push((name.into(), source.into()));
        self
    }

    /// Compile all registered templates
    pub fn build(self) -> Result<Engine> {
        let mut env = create_environment();
        let mut sources = BTreeMap::new();

        for (name, source) in self.templates {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, &name, &source))?;
            sources.insert(name, source);
        }

        Ok(Engine { env, sources })
    }
}

/// Strict environment with whitespace handling suited for YAML output
fn create_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

    // Block tags on their own line leave no trace in the output.
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);

    env.add_filter("toyaml", filters::toyaml);
    env.add_filter("quote", filters::quote);
    env.add_filter("indent", filters::indent);

    env
}

/// A set of compiled templates
pub struct Engine {
    env: Environment<'static>,
    sources: BTreeMap<String, String>,
}

impl Engine {
    /// Create a builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Render a compiled template with the given context
    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| EngineError::TemplateNotFound {
                name: name.to_string(),
            })?;

        let tmpl = self
            .env
            .get_template(name)
            .map_err(|e| TemplateError::from_minijinja(e, name, source))?;

        let rendered = tmpl
            .render(context)
            .map_err(|e| TemplateError::from_minijinja(e, name, source))?;

        Ok(rendered)
    }
}
