//! Aggregated configuration of the tools: simulation parameters, pipeline
//! constants, target layout and calibration settings in one YAML document.

use crate::calibration::{CalibrationConfig, CalibrationOrchestrator};
use crate::simulation::{ImagePipeline, ParameterError, PipelineConstants, SimulationParameters};
use crate::target::{TargetConfig, TargetGenerator};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Failed to write JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid simulation parameters: {0}")]
    InvalidParameters(#[from] ParameterError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub simulation: SimulationParameters,
    pub constants: PipelineConstants,
    pub target: TargetConfig,
    pub calibration: CalibrationConfig,
}

impl ToolConfig {
    /// Parses a YAML document. Missing sections keep their defaults; the
    /// simulation parameters are validated.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ToolConfig = serde_yaml::from_str(yaml)?;
        config.simulation.validate()?;
        Ok(config)
    }

    pub fn load_from_yaml(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn save_to_yaml(&self, path: &str) -> Result<(), ConfigError> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn pipeline(&self) -> ImagePipeline {
        ImagePipeline::new(self.constants.clone())
    }

    pub fn target_generator(&self) -> TargetGenerator {
        TargetGenerator::new(self.target.clone())
    }

    pub fn orchestrator(&self) -> CalibrationOrchestrator {
        CalibrationOrchestrator::new(self.calibration.clone())
    }
}
