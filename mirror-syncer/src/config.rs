use mirror_config::load_config;
use mirror_config::shared::SyncConfig;

use crate::error::{SyncerError, SyncerResult};

/// Loads the sync configuration and validates it.
pub fn load_sync_config() -> SyncerResult<SyncConfig> {
    let config = load_config::<SyncConfig>().map_err(SyncerError::config)?;
    config.validate().map_err(SyncerError::config)?;

    Ok(config)
}
