// Space-level configuration

use glam::Vec2;

/// Default number of substeps per rendered frame
pub const DEFAULT_SUBSTEPS: u32 = 8;

/// Default seconds of rest before a body may fall asleep
pub const DEFAULT_SLEEP_TIME: f32 = 5.0;

/// Configuration errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Substep count must be at least 1, got {0}")]
    InvalidSubsteps(u32),

    #[error("Gravity must be finite")]
    NonFiniteGravity,
}

/// Settings shared by every body in a physics space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceConfig {
    /// Gravity acceleration (default: -9.81 m/s² in y-axis)
    pub gravity: Vec2,

    /// Fixed substeps per frame; each advances `frame_duration / substeps`
    pub substeps: u32,

    /// Rest time before bodies sleep, `None` keeps every body awake
    pub sleep_time_threshold: Option<f32>,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -9.81),
            substeps: DEFAULT_SUBSTEPS,
            sleep_time_threshold: Some(DEFAULT_SLEEP_TIME),
        }
    }
}

impl SpaceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gravity(mut self, gravity: Vec2) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_substeps(mut self, substeps: u32) -> Self {
        self.substeps = substeps;
        self
    }

    pub fn with_sleep_time_threshold(mut self, threshold: Option<f32>) -> Self {
        self.sleep_time_threshold = threshold;
        self
    }

    /// Check the configuration before a space is built from it
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.substeps == 0 {
            return Err(ConfigError::InvalidSubsteps(self.substeps));
        }
        if !self.gravity.is_finite() {
            return Err(ConfigError::NonFiniteGravity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SpaceConfig::default();
        assert_eq!(config.gravity, Vec2::new(0.0, -9.81));
        assert_eq!(config.substeps, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            SpaceConfig::new().with_substeps(0).validate(),
            Err(ConfigError::InvalidSubsteps(0))
        );
        assert_eq!(
            SpaceConfig::new()
                .with_gravity(Vec2::new(f32::NAN, 0.0))
                .validate(),
            Err(ConfigError::NonFiniteGravity)
        );
    }
}
