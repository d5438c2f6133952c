//! The native half of the bridge: Slint widgets and the event loop.

use std::io;
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use callbridge_runtime::{CallKind, Driver, RETURN_SELECTOR, codec};
use serde_json::{Value, json};

use crate::AppWindow;

/// Outbound calls the window understands.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowCommand {
    SetHeading(String),
    SetStatus(String),
    BindElements { counter: String, shell: String },
    Close,
    /// Result of a correlated UI call we raised earlier.
    Return(Value),
}

impl WindowCommand {
    pub fn parse(selector: &str, payload: Value) -> Result<Self, String> {
        match selector {
            "Window.SetHeading" => text_arg(selector, payload).map(WindowCommand::SetHeading),
            "Window.SetStatus" => text_arg(selector, payload).map(WindowCommand::SetStatus),
            "Window.BindElements" => {
                let counter = payload.pointer("/counter").and_then(Value::as_str);
                let shell = payload.pointer("/shell").and_then(Value::as_str);
                match (counter, shell) {
                    (Some(counter), Some(shell)) => Ok(WindowCommand::BindElements {
                        counter: counter.to_string(),
                        shell: shell.to_string(),
                    }),
                    _ => Err(format!("{selector} expects {{counter, shell}} ids")),
                }
            }
            "Window.Close" => Ok(WindowCommand::Close),
            RETURN_SELECTOR => Ok(WindowCommand::Return(payload)),
            other => Err(format!("unknown window call: {other}")),
        }
    }

    fn apply(self, ui: &AppWindow) -> Result<Value, String> {
        match self {
            WindowCommand::SetHeading(text) => ui.set_heading(text.into()),
            WindowCommand::SetStatus(text) => ui.set_status(text.into()),
            WindowCommand::BindElements { counter, shell } => {
                ui.set_counter_id(counter.into());
                ui.set_shell_id(shell.into());
            }
            WindowCommand::Close => {
                slint::quit_event_loop().map_err(|err| err.to_string())?;
                return Ok(json!("ok"));
            }
            WindowCommand::Return(payload) => {
                tracing::debug!(%payload, "ui call result");
            }
        }

        Ok(Value::Null)
    }
}

fn text_arg(selector: &str, payload: Value) -> Result<String, String> {
    match payload {
        Value::String(text) => Ok(text),
        other => Err(format!("{selector} expects a string, got {other}")),
    }
}

/// Wires Slint callbacks to inbound bridge calls. Both run on the UI thread.
pub fn install_callbacks(ui: &AppWindow, driver: &Driver) {
    let click_driver = driver.clone();
    ui.on_element_clicked(move |element_id| {
        let call = codec::encode(&format!("{element_id}.Click"), &Value::Null, None);
        if let Err(err) = click_driver.handle_inbound(&call, CallKind::UiAffine) {
            tracing::warn!(element = %element_id, "click not delivered: {err}");
        }
    });

    let close_driver = driver.clone();
    ui.on_close_requested(move |element_id| {
        let call = codec::encode(&format!("{element_id}.CloseRequested"), &Value::Null, None);
        match close_driver.handle_inbound(&call, CallKind::Inline) {
            Ok(reply) => tracing::debug!(?reply, "close request handled"),
            Err(err) => tracing::warn!(element = %element_id, "close request failed: {err}"),
        }
    });
}

/// Consumes outbound calls and applies them on the Slint event loop, resolving
/// correlated ones once applied.
pub fn spawn_dispatcher(
    calls: Receiver<String>,
    ui: slint::Weak<AppWindow>,
    driver: Driver,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("callbridge-native".to_string())
        .spawn(move || {
            for raw in calls {
                let call = match codec::decode(&raw) {
                    Ok(call) => call,
                    Err(err) => {
                        tracing::warn!("dropping malformed outbound call: {err}");
                        continue;
                    }
                };

                let correlation = call.correlation.clone();
                let command = WindowCommand::parse(&call.selector, call.payload);
                let resolver = driver.clone();

                let scheduled = ui.upgrade_in_event_loop(move |ui| {
                    let outcome = command.and_then(|command| command.apply(&ui));
                    finish(&resolver, correlation, outcome);
                });

                if let Err(err) = scheduled {
                    tracing::warn!(selector = %call.selector, "event loop unavailable: {err}");
                    // The closure was dropped unrun; answer anyway so no caller hangs.
                    if let Some(id) = call.correlation {
                        let outcome = Err(format!("event loop unavailable: {err}"));
                        if let Err(resolve_err) = driver.resolve(&id, outcome) {
                            tracing::warn!(correlation = %id, "resolve failed: {resolve_err}");
                        }
                    }
                }
            }

            tracing::debug!("native dispatcher stopped");
        })
}

fn finish(driver: &Driver, correlation: Option<String>, outcome: Result<Value, String>) {
    match (correlation, outcome) {
        (Some(id), outcome) => {
            if let Err(err) = driver.resolve(&id, outcome) {
                tracing::warn!(correlation = %id, "resolve failed: {err}");
            }
        }
        (None, Err(err)) => tracing::warn!("window call failed: {err}"),
        (None, Ok(_)) => {}
    }
}
