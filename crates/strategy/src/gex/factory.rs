use std::sync::Arc;

use orb_broker::BrokerClient;
use orb_core::{AppConfig, Clock, ConfigError, GexProviderKind};
use tracing::info;

use super::{GexError, GexResolver, GexbotProvider, IbChainProvider, MassiveDataProvider};

/// Builds the resolver selected by `gex.provider`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingProvider`] when a REST provider is selected
/// without its `[gex.providers]` section, or any provider construction error.
pub fn create_resolver(
    config: &AppConfig,
    broker: Arc<BrokerClient>,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn GexResolver>, GexError> {
    let kind = config.gex.provider;
    let providers = &config.gex.providers;
    let resolver: Box<dyn GexResolver> = match kind {
        GexProviderKind::Ib => Box::new(IbChainProvider::new(broker, config, clock)?),
        GexProviderKind::Gexbot => {
            let rest = providers
                .gexbot
                .as_ref()
                .ok_or(ConfigError::MissingProvider(kind))?;
            let tz = config.instrument.timezone()?;
            Box::new(GexbotProvider::new(rest, &config.gex, tz, clock)?)
        }
        GexProviderKind::MassiveData => {
            let rest = providers
                .massive_data
                .as_ref()
                .ok_or(ConfigError::MissingProvider(kind))?;
            Box::new(MassiveDataProvider::new(rest, &config.gex)?)
        }
    };
    info!(provider = %kind, "GEX resolver created");
    Ok(resolver)
}
