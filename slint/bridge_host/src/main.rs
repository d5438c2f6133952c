mod app;
mod native;

use std::process;
use std::sync::Arc;

use callbridge_runtime::{BridgeConfig, BridgeError, ChannelTransport, Driver, PumpHost, UiTask};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::app::{Counter, Heartbeat, Shell};

slint::include_modules!();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!("callbridge host fatal error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::from_env();
    let ui = AppWindow::new()?;

    let (transport, native_rx) = ChannelTransport::bounded(config.ui_queue_capacity);
    let driver = Driver::new(config, Arc::new(transport));
    driver.run(PumpHost::EventLoop(Arc::new(
        |job: UiTask| -> Result<(), BridgeError> {
            slint::invoke_from_event_loop(job).map_err(|err| BridgeError::Transport(err.to_string()))
        },
    )))?;

    native::install_callbacks(&ui, &driver);
    let dispatcher = native::spawn_dispatcher(native_rx, ui.as_weak(), driver.clone())?;

    let counter = Arc::new(Counter::new(driver.clone()));
    let shell = Arc::new(Shell::new(driver.clone()));
    let counter_id = driver.registry().create_named("counter", &counter)?;
    let shell_id = driver.registry().create_named("shell", &shell)?;
    driver.post(
        "Window.BindElements",
        json!({"counter": counter_id, "shell": shell_id}),
    )?;

    let heartbeat = Heartbeat::spawn(driver.clone(), app::tick_from_env())?;

    ui.run()?;

    tracing::info!(clicks = counter.clicks(), "window closed");
    heartbeat.stop();
    driver.shutdown();

    // Other driver clones keep the transport alive, so the dispatcher may still be parked.
    if dispatcher.is_finished() {
        if let Err(err) = dispatcher.join() {
            tracing::error!("native dispatcher join failed: {err:?}");
        }
    } else {
        tracing::debug!("native dispatcher still active during shutdown; skipping join");
    }

    Ok(())
}
