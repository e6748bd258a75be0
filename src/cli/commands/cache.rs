//! Cache command - manage cached responses

use crate::cache::ResponseCache;
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::{Config, ConfigManager};
use crate::error::CardkeepResult;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> CardkeepResult<()> {
    let cache = ResponseCache::new(ConfigManager::cache_dir(config), config.cache.ttl());

    match args.action {
        CacheAction::Clear { namespace } => {
            let removed = cache.clear(namespace.as_deref()).await?;
            let scope = namespace.as_deref().unwrap_or("all namespaces");
            println!(
                "{} Removed {} cached response(s) from {}",
                style("✓").green(),
                removed,
                style(scope).cyan()
            );
        }
        CacheAction::Purge => {
            let removed = cache.purge_expired().await?;
            println!(
                "{} Purged {} expired file(s) (TTL {} day(s))",
                style("✓").green(),
                removed,
                config.cache.ttl_days
            );
        }
    }

    Ok(())
}
