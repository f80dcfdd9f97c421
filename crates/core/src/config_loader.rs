use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

/// Default config path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default TOML file merged with `ORB_` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, a required field is missing,
    /// or validation fails.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from `path`. Nested keys come from the environment as
    /// `ORB_SECTION__FIELD`, e.g. `ORB_CONNECTION__PORT=4002`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, a required field is missing,
    /// or validation fails.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ORB_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {path}"))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {path}"))?;

        tracing::debug!(path, ticker = %config.instrument.ticker, "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration from an in-memory TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or validation fails.
    pub fn from_toml_str(toml: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .context("Failed to parse configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GexProviderKind;
    use figment::Jail;
    use rust_decimal_macros::dec;

    const VALID: &str = r#"
        [connection]
        host = "127.0.0.1"
        port = 7497
        client_id = 1

        [instrument]
        ticker = "SPX"
        exchange = "CBOE"
        currency = "USD"
        exchange_timezone = "America/New_York"

        [opening_range]
        market_open_time = "09:30:00"
        duration_minutes = 30
        bar_size = "1 min"
        wait_buffer_seconds = 5
        historical_data_timeout_seconds = 20

        [breakout]
        bar_size_seconds = 300

        [gex]
        provider = "ib"
        days_to_expiration = 0
        strikes_quantity = 120
        option_multiplier = 100

        [trade_management]
        take_profit_pct = 50.0
        stop_loss_pct = 20.0

        [trade_management.trailing_stop]
        activation_profit_pct = 10.0
        trail_pct = 10.0

        [trade_execution]
        total_quantity = 1

        [trade_execution.order_defaults]
        entry_order_type = "LMT"
    "#;

    #[test]
    fn loads_valid_file() {
        Jail::expect_with(|jail| {
            jail.create_file("Config.toml", VALID)?;
            let config = ConfigLoader::load_from("Config.toml").map_err(|e| e.to_string())?;

            assert_eq!(config.connection.host, "127.0.0.1");
            assert_eq!(config.instrument.ticker, "SPX");
            assert_eq!(config.gex.provider, GexProviderKind::Ib);
            assert_eq!(config.trade_management.take_profit_pct, dec!(50));
            assert_eq!(config.trade_management.trailing_stop.trail_pct, dec!(10));
            assert_eq!(config.breakout.realtime_bar_seconds, 5);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("Config.toml", VALID)?;
            jail.set_env("ORB_CONNECTION__PORT", "4002");
            let config = ConfigLoader::load_from("Config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.connection.port, 4002);
            Ok(())
        });
    }

    #[test]
    fn missing_required_field_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file("Config.toml", &VALID.replace("client_id = 1", ""))?;
            assert!(ConfigLoader::load_from("Config.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn parses_in_memory_document() {
        let config = ConfigLoader::from_toml_str(VALID).unwrap();
        assert_eq!(config.opening_range.duration_minutes, 30);
        assert!(ConfigLoader::from_toml_str("[connection]").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        Jail::expect_with(|_jail| {
            assert!(ConfigLoader::load_from("nonexistent.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn validation_runs_on_load() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                &VALID.replace("activation_profit_pct = 10.0", "activation_profit_pct = 0.0"),
            )?;
            assert!(ConfigLoader::load_from("Config.toml").is_err());
            Ok(())
        });
    }
}
