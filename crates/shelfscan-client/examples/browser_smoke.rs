/// Smoke-test for `ChromiumContextProvider`.
///
/// Launches a headless Chromium, collects one product page through the full
/// page lifecycle and prints the extracted fields.
///
/// Run with:
///   cargo run --example browser_smoke --features browser -- <product-url>
use std::sync::Arc;

use shelfscan_client::{ChromiumContextProvider, default_registry};
use shelfscan_core::lifecycle::{LifecycleConfig, PageLifecycle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let locator = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());

    println!("Launching headless browser…");
    let provider = ChromiumContextProvider::launch().await?;
    let registry = default_registry()?;
    let resolution = registry.resolve(&locator);
    println!(
        "Platform: {} (capability {}, degraded: {})",
        resolution.platform,
        resolution.capability.name(),
        resolution.degraded
    );

    let lifecycle = PageLifecycle::new(provider, LifecycleConfig::default());
    let result = lifecycle
        .run_job(&locator, &resolution.platform, Arc::clone(&resolution.capability))
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
