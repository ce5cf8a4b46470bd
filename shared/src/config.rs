/// Gameplay constants both sides of the wire agree on.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct GameplayConfig {
    /// Radius of a freshly spawned player
    pub player_start_radius: f64,
    /// Player speed (units per second)
    pub player_speed: f64,
    /// Server-side movement extrapolation rate (Hz)
    pub movement_tick_hz: u32,
    /// Slack added to the touching distance when checking a consumption claim
    pub consume_buffer: f64,
    /// A player may only eat another whose mass is less than its own divided by this
    pub player_mass_ratio: f64,
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            player_start_radius: 20.0,
            player_speed: 150.0,
            movement_tick_hz: 20,
            consume_buffer: 10.0,
            player_mass_ratio: 1.5,
        }
    }
}

impl GameplayConfig {
    /// Seconds between two movement ticks.
    pub fn movement_tick_secs(&self) -> f64 {
        1.0 / self.movement_tick_hz as f64
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.player_start_radius.is_finite() || self.player_start_radius <= 0.0 {
            return Err("player_start_radius must be finite and > 0".to_string());
        }
        if !self.player_speed.is_finite() || self.player_speed < 0.0 {
            return Err("player_speed must be finite and >= 0".to_string());
        }
        if self.movement_tick_hz == 0 {
            return Err("movement_tick_hz must be > 0".to_string());
        }
        if !self.consume_buffer.is_finite() || self.consume_buffer < 0.0 {
            return Err("consume_buffer must be finite and >= 0".to_string());
        }
        if !self.player_mass_ratio.is_finite() || self.player_mass_ratio < 1.0 {
            return Err("player_mass_ratio must be finite and >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gameplay_config_is_valid() {
        let config = GameplayConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.movement_tick_secs() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn zero_radius_invalid() {
        let config = GameplayConfig {
            player_start_radius: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mass_ratio_below_one_invalid() {
        let config = GameplayConfig {
            player_mass_ratio: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
