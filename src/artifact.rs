use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certification::{GateDecision, PromotionPolicy};
use crate::error::{Result, SpilloverError};
use crate::model::CertificationReport;
use crate::predictor::HybridModel;

/// A certified model bundled with the report and gate decision that approved it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: Uuid,
    pub created_at: DateTime<Utc>,
    pub model: HybridModel,
    pub report: CertificationReport,
    pub gate: GateDecision,
}

impl ModelArtifact {
    /// Bundle a model only if the policy approves its report.
    pub fn package(
        model: HybridModel,
        report: CertificationReport,
        policy: &PromotionPolicy,
    ) -> Result<Self> {
        let gate = policy.evaluate(&report);
        if !gate.approved {
            return Err(SpilloverError::PromotionRejected(gate.reasons));
        }
        model.validate()?;
        let artifact = Self {
            version: Uuid::new_v4(),
            created_at: Utc::now(),
            model,
            report,
            gate,
        };
        tracing::info!(version = %artifact.version, "model artifact packaged");
        Ok(artifact)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and re-check an artifact: the gate must have approved it and the
    /// corrector must still match its linear state.
    pub fn from_json(s: &str) -> Result<Self> {
        let artifact: Self = serde_json::from_str(s)?;
        if !artifact.gate.approved {
            return Err(SpilloverError::PromotionRejected(artifact.gate.reasons));
        }
        artifact.model.validate()?;
        Ok(artifact)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
