use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use form_spec::{
    FormConfig, FormTemplate, IntegrityIssue, LabelContext, LinkageMode, ParentLink, ResolvedForm,
};

/// A configuration that points at template elements which do not exist,
/// refused because `strict_integrity` is on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration references {} missing template element(s)", .0.len())]
pub struct IntegrityError(pub Vec<IntegrityIssue>);

fn default_label_slugs() -> Vec<String> {
    vec!["root".into()]
}

/// Runtime knobs of the form engine, read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub linkage: LinkageMode,
    /// Index of the checkbox the label strategy matches against.
    #[serde(default)]
    pub source_block_index: usize,
    /// Templates whose conditional blocks are linked by label.
    #[serde(default = "default_label_slugs")]
    pub label_slugs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,
    #[serde(default)]
    pub strict_integrity: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            linkage: LinkageMode::default(),
            source_block_index: 0,
            label_slugs: default_label_slugs(),
            product_title: None,
            strict_integrity: false,
        }
    }
}

impl RuntimeConfig {
    /// Parses a runtime config; blank input yields the defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    pub fn parent_link(&self) -> Arc<dyn ParentLink> {
        Arc::from(
            self.linkage
                .build(self.source_block_index, &self.label_slugs),
        )
    }

    pub fn label_context(&self) -> LabelContext {
        LabelContext {
            product_title: self.product_title.clone(),
        }
    }

    /// Resolves a template under a configuration, enforcing the integrity
    /// policy.
    pub fn resolve(
        &self,
        template: Arc<FormTemplate>,
        config: Arc<FormConfig>,
    ) -> Result<ResolvedForm, IntegrityError> {
        let linkage = self.parent_link();
        let form = ResolvedForm::new(template, config, linkage.as_ref());
        let issues = form.visibility().integrity_issues();
        if self.strict_integrity && !issues.is_empty() {
            return Err(IntegrityError(issues.to_vec()));
        }
        Ok(form)
    }
}
