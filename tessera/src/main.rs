use std::str::FromStr;
use std::time::Duration;

use tessera_assets::prelude::*;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Preloads every path given on the command line, relative to `TESSERA_ROOT`
fn main() -> anyhow::Result<()> {
    let level = std::env::var("TESSERA_LOG")
        .ok()
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = std::env::var("TESSERA_ROOT").unwrap_or_else(|_| "./assets".to_string());
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: tessera <path>...");
    }

    let manager = ResourceManager::new(FileSource::new(&root));
    tessera_loaders::register_defaults(&manager);

    let mut keys = Vec::with_capacity(paths.len());
    for path in &paths {
        keys.push(manager.request_path(path)?);
    }

    while manager.is_loading() {
        tracing::info!(
            "Loading {:.0}% ({}/{} done, {} failed)",
            manager.progress() * 100.0,
            manager.loaded() + manager.failed(),
            manager.requested(),
            manager.failed()
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    let mut failures = 0;
    for key in &keys {
        match manager.get(key) {
            Ok(_) => tracing::info!("{key} loaded as {}", key.resource_type()),
            Err(e) => {
                failures += 1;
                tracing::error!("{e}");
            }
        }
    }
    tracing::info!(
        "Loaded {} of {} from {root} using {} workers",
        keys.len() - failures,
        keys.len(),
        manager.pool_size()
    );

    if failures > 0 {
        anyhow::bail!("{failures} resource(s) failed to load");
    }
    Ok(())
}
