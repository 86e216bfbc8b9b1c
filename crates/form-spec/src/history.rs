use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::config::{ConfigOverlay, ConfigStatus, FormConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("form has no draft configuration to publish")]
    NoDraft,
    #[error("configuration version {0} does not exist")]
    UnknownVersion(u32),
}

/// Published configuration snapshots of one form plus its editor draft.
///
/// Versions start at 1 and never change once published; version 0 stands for
/// the unconfigured form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigHistory {
    #[serde(default)]
    pub published: Vec<FormConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<FormConfig>,
}

impl ConfigHistory {
    pub fn latest_published(&self) -> Option<&FormConfig> {
        self.published.last()
    }

    /// Latest published config, or the unconfigured form.
    pub fn active(&self) -> FormConfig {
        self.latest_published()
            .cloned()
            .unwrap_or_else(FormConfig::unconfigured)
    }

    pub fn version(&self, version: u32) -> Result<FormConfig, HistoryError> {
        if version == 0 {
            return Ok(FormConfig::unconfigured());
        }
        self.published
            .iter()
            .find(|config| config.version == version)
            .cloned()
            .ok_or(HistoryError::UnknownVersion(version))
    }

    /// Config that was live at the given instant.
    pub fn active_at(&self, at: DateTime<Utc>) -> FormConfig {
        self.published
            .iter()
            .rev()
            .find(|config| config.created_at <= at)
            .cloned()
            .unwrap_or_else(FormConfig::unconfigured)
    }

    pub fn save_draft(&mut self, overlay: ConfigOverlay, now: DateTime<Utc>) {
        self.draft = Some(FormConfig::draft(overlay, now));
    }

    /// Snapshots the draft into a new published version.
    pub fn publish(&mut self, now: DateTime<Utc>) -> Result<u32, HistoryError> {
        let draft = self.draft.take().ok_or(HistoryError::NoDraft)?;
        Ok(self.push_published(draft.overlay, now))
    }

    fn push_published(&mut self, overlay: ConfigOverlay, now: DateTime<Utc>) -> u32 {
        let version = self
            .published
            .last()
            .map(|config| config.version + 1)
            .unwrap_or(1);
        self.published.push(FormConfig {
            version,
            status: ConfigStatus::Published,
            created_at: now,
            overlay,
        });
        tracing::info!(version, "published form configuration");
        version
    }
}
