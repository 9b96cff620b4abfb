// Data-driven simulation configuration.
//
// Every tunable the robot, the planner and the messaging endpoints read lives
// in `SimConfig`. It is loaded from an optional JSON file at startup and then
// overridden by command-line flags (see `main.rs`). Missing JSON fields fall
// back to their defaults, so a config file only needs the values it changes.
//
// See also: `context.rs` which owns the `SimConfig` for one peer instance,
// `drive.rs` for the distance thresholds, `pathfinding.rs` for `grid_step`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Size;

/// Speed used when the configured speed is zero.
pub const FALLBACK_SPEED: f32 = 10.0;

/// How incoming wall/goal sections are folded into the local world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Skip walls equal to an existing wall (either endpoint order) and
    /// goals at an existing goal's position.
    #[default]
    DedupeByGeometry,
    /// Insert every received entry; replaying a sync duplicates geometry.
    Additive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Name of the local robot created by `World::populate`.
    pub name: String,
    /// Port the local server binds. 0 picks a free port.
    pub local_port: u16,
    pub remote_ip: String,
    pub remote_port: u16,
    /// Path vertices advanced per drive step.
    pub speed: f32,
    pub robot_size: Size,
    pub goal_size: Size,
    /// Another robot closer than this triggers the near-collision response.
    pub warning_distance: f64,
    /// Driving resumes once every other robot is farther than this.
    pub restart_distance: f64,
    pub step_interval_ms: u64,
    pub world_width: i32,
    pub world_height: i32,
    /// Planner cell size in pixels.
    pub grid_step: i32,
    /// Goal the robot drives to; the first goal is used if absent.
    pub goal_name: String,
    pub merge_policy: MergePolicy,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "Robot".into(),
            local_port: 12345,
            remote_ip: "localhost".into(),
            remote_port: 12345,
            speed: FALLBACK_SPEED,
            robot_size: Size::new(20, 20),
            goal_size: Size::new(20, 20),
            warning_distance: 100.0,
            restart_distance: 115.0,
            step_interval_ms: 100,
            world_width: 500,
            world_height: 500,
            grid_step: 2,
            goal_name: "Goal".into(),
            merge_policy: MergePolicy::default(),
            connect_timeout_ms: 2000,
            io_timeout_ms: 5000,
        }
    }
}

impl SimConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SimConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.restart_distance <= self.warning_distance {
            return Err(ConfigError::Invalid(format!(
                "restart_distance ({}) must exceed warning_distance ({})",
                self.restart_distance, self.warning_distance
            )));
        }
        if self.robot_size.width <= 0 || self.robot_size.height <= 0 {
            return Err(ConfigError::Invalid("robot_size must be positive".into()));
        }
        if self.goal_size.width <= 0 || self.goal_size.height <= 0 {
            return Err(ConfigError::Invalid("goal_size must be positive".into()));
        }
        if self.grid_step <= 0 {
            return Err(ConfigError::Invalid("grid_step must be positive".into()));
        }
        if self.world_width <= 0 || self.world_height <= 0 {
            return Err(ConfigError::Invalid("world size must be positive".into()));
        }
        if self.speed < 0.0 || !self.speed.is_finite() {
            return Err(ConfigError::Invalid(format!("bad speed {}", self.speed)));
        }
        if self.speed > 0.0 && self.speed < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "speed {} is below one path vertex per step",
                self.speed
            )));
        }
        Ok(())
    }

    /// Configured speed, with zero replaced by `FALLBACK_SPEED`.
    pub fn effective_speed(&self) -> f32 {
        if self.speed.abs() <= f32::EPSILON {
            FALLBACK_SPEED
        } else {
            self.speed
        }
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = SimConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "name": "Scout",
            "local_port": 23456,
            "merge_policy": "Additive",
            "robot_size": { "width": 10, "height": 30 }
        }"#;
        let config: SimConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "Scout");
        assert_eq!(config.local_port, 23456);
        assert_eq!(config.merge_policy, MergePolicy::Additive);
        assert_eq!(config.robot_size, Size::new(10, 30));
        assert_eq!(config.remote_port, 12345);
        assert_eq!(config.goal_name, "Goal");
    }

    #[test]
    fn zero_speed_falls_back() {
        let config = SimConfig {
            speed: 0.0,
            ..SimConfig::default()
        };
        assert_eq!(config.effective_speed(), FALLBACK_SPEED);
    }

    #[test]
    fn restart_must_exceed_warning() {
        let config = SimConfig {
            warning_distance: 120.0,
            restart_distance: 115.0,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn fractional_speed_below_one_rejected() {
        for speed in [0.5, 0.99] {
            let config = SimConfig {
                speed,
                ..SimConfig::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{speed}");
        }
        let config = SimConfig {
            speed: 1.0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_grid_step_rejected() {
        let config = SimConfig {
            grid_step: 0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SimConfig::load("/nonexistent/robot_world.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
