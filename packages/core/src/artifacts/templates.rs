//! Embedded Tera templates for the build context
//!
//! Templates are compiled into the binary with `include_str!` so the CLI
//! works without any template files on disk.

use tera::{Context, Tera};
use tracing::debug;

pub const DOCKERFILE_TEMPLATE: &str = "Dockerfile.tera";
pub const HEALTHCHECK_TEMPLATE: &str = "healthcheck.sh.tera";

static DOCKERFILE: &str = include_str!("templates/Dockerfile.tera");
static HEALTHCHECK: &str = include_str!("templates/healthcheck.sh.tera");

/// All embedded templates as (name, content) pairs
pub const ALL_TEMPLATES: &[(&str, &str)] = &[
    (DOCKERFILE_TEMPLATE, DOCKERFILE),
    (HEALTHCHECK_TEMPLATE, HEALTHCHECK),
];

pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    pub fn from_embedded() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(ALL_TEMPLATES.iter().copied())?;
        debug!("Loaded {} embedded templates", ALL_TEMPLATES.len());
        Ok(Self { tera })
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        self.tera.render(name, context)
    }
}
