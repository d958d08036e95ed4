use serde::{Deserialize, Serialize};

use crate::shared::{ExtractionConfig, ValidationError};

/// Settings of a sync run across objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Objects processed at the same time. Objects sharing a destination table never overlap.
    #[serde(default = "default_max_concurrent_objects")]
    pub max_concurrent_objects: usize,
}

impl PipelineConfig {
    pub const DEFAULT_MAX_CONCURRENT_OBJECTS: usize = 1;

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.extraction.validate()?;

        if self.max_concurrent_objects == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.max_concurrent_objects".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            max_concurrent_objects: default_max_concurrent_objects(),
        }
    }
}

fn default_max_concurrent_objects() -> usize {
    PipelineConfig::DEFAULT_MAX_CONCURRENT_OBJECTS
}
