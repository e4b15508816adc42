//! Placeholder substitution for topology and config templates.

use std::collections::BTreeMap;
use std::error::Error as _;

use tera::{Context, Tera};

use crate::error::OrchestratorError;
use crate::model::{Template, Workload};
use crate::secrets::Credentials;

/// Named values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    /// The full placeholder set of a workload topology.
    pub fn for_workload(
        workload: &Workload,
        template: &Template,
        credentials: &Credentials,
        data_path: &str,
    ) -> Self {
        Self::new()
            .with("SERVICE_ID", workload.id.slug())
            .with("DOMAIN", workload.domain.clone())
            .with("DATA_PATH", data_path)
            .with("DB_PASSWORD", credentials.db_password.clone())
            .with("DB_ROOT_PASSWORD", credentials.db_root_password.clone())
            .with("ADMIN_PASSWORD", credentials.admin_password.clone())
            .with("ENCRYPTION_KEY", credentials.encryption_key.clone())
            .with("RAM_LIMIT", format!("{}M", template.recommended.ram_mb.round()))
            .with("CPU_LIMIT", template.min.cpu_cores.to_string())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Render `text`, failing on unknown placeholders or syntax errors.
pub fn render(name: &str, text: &str, placeholders: &Placeholders) -> Result<String, OrchestratorError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_template(name, text).map_err(|e| render_error(name, &e))?;

    let mut context = Context::new();
    for (key, value) in &placeholders.values {
        context.insert(*key, value);
    }

    tera.render(name, &context).map_err(|e| render_error(name, &e))
}

fn render_error(name: &str, err: &tera::Error) -> OrchestratorError {
    let mut message = format!("{name}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    OrchestratorError::TemplateRender(message)
}
