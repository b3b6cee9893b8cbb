//! Cloud-init rendering using Handlebars.
//!
//! A role's `template` names `<template_dir>/<template>.hbs`; roles without
//! one use the built-in default. Partials under `<template_dir>/partials` are
//! registered by file stem. Rendering is deterministic for a given context so
//! the output can be content-hashed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, UdoError};

const DEFAULT_TEMPLATE_NAME: &str = "default";
const DEFAULT_TEMPLATE: &str = include_str!("../templates/default.hbs");

/// Values available to cloud-init templates.
#[derive(Debug, Clone, Serialize)]
pub struct BootContext {
    pub cluster: String,
    pub role: String,
    pub region: String,
    pub vpc: Option<String>,
    pub image_id: String,
    pub instance_type: String,
    pub vars: BTreeMap<String, String>,
}

/// Renders boot scripts for roles.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    template_dir: Option<PathBuf>,
}

impl TemplateEngine {
    /// Create an engine, loading partials from `template_dir` when given.
    ///
    /// # Errors
    /// Returns `Template` if a partial cannot be read or parsed.
    pub fn new(template_dir: Option<&Path>) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_template_string(DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE)?;

        if let Some(dir) = template_dir {
            let partials_dir = dir.join("partials");
            if partials_dir.exists() {
                Self::load_partials(&mut handlebars, &partials_dir)?;
            }
        }

        Ok(Self {
            handlebars,
            template_dir: template_dir.map(Path::to_path_buf),
        })
    }

    fn load_partials(handlebars: &mut Handlebars<'static>, dir: &Path) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| UdoError::Template(format!("{}: {e}", dir.display())))?;

        for entry in entries {
            let path = entry
                .map_err(|e| UdoError::Template(format!("{}: {e}", dir.display())))?
                .path();

            if path.extension().is_some_and(|ext| ext == "hbs") {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| {
                        UdoError::Template(format!("Invalid partial filename: {}", path.display()))
                    })?
                    .to_string();

                let content = std::fs::read_to_string(&path).map_err(|e| {
                    UdoError::Template(format!("Failed to read partial {}: {e}", path.display()))
                })?;

                handlebars.register_partial(&name, content)?;
                debug!("Loaded partial: {name}");
            }
        }
        Ok(())
    }

    /// Render the boot script for a role.
    ///
    /// # Errors
    /// Returns `Template` if the named template is missing or fails to render.
    pub fn render(&self, template: Option<&str>, context: &BootContext) -> Result<String> {
        let Some(name) = template else {
            return Ok(self.handlebars.render(DEFAULT_TEMPLATE_NAME, context)?);
        };

        let dir = self.template_dir.as_ref().ok_or_else(|| {
            UdoError::Template(format!("Template {name} requested but no template directory set"))
        })?;
        let path = dir.join(format!("{name}.hbs"));
        let source = std::fs::read_to_string(&path)
            .map_err(|e| UdoError::Template(format!("Failed to read {}: {e}", path.display())))?;

        Ok(self.handlebars.render_template(&source, context)?)
    }
}
