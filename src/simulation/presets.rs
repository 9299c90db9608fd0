use super::params::SimulationParameters;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named lens-distortion settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistortionPreset {
    SlightBarrel,
    StrongBarrel,
    SlightPincushion,
    StrongPincushion,
}

impl DistortionPreset {
    pub const ALL: [DistortionPreset; 4] = [
        DistortionPreset::SlightBarrel,
        DistortionPreset::StrongBarrel,
        DistortionPreset::SlightPincushion,
        DistortionPreset::StrongPincushion,
    ];

    /// Signed distortion coefficient, positive for barrel.
    pub fn value(self) -> f64 {
        match self {
            DistortionPreset::SlightBarrel => 0.2,
            DistortionPreset::StrongBarrel => 0.5,
            DistortionPreset::SlightPincushion => -0.2,
            DistortionPreset::StrongPincushion => -0.5,
        }
    }

    /// Sets both the distortion type and its intensity.
    pub fn apply(self, params: &mut SimulationParameters) {
        params.set_signed_distortion(self.value());
    }
}

impl fmt::Display for DistortionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistortionPreset::SlightBarrel => "Slight Barrel",
            DistortionPreset::StrongBarrel => "Strong Barrel",
            DistortionPreset::SlightPincushion => "Slight Pincushion",
            DistortionPreset::StrongPincushion => "Strong Pincushion",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DistortionPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s.chars().filter(|c| c.is_alphanumeric()).collect();
        Self::ALL
            .into_iter()
            .find(|preset| {
                let name: String = preset.to_string().chars().filter(|c| c.is_alphanumeric()).collect();
                name.eq_ignore_ascii_case(&wanted)
            })
            .ok_or_else(|| format!("Unknown distortion preset: {s}"))
    }
}
