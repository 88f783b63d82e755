//! Console commands and custom requests for choosing the default breakpoint type and mode.
//!
//! Only supported entries are registered, so an unsupported type simply has no
//! command. `setBreakpointMode` takes the mode as an argument and therefore
//! validates it itself.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{BreakpointDefaults, BreakpointError, BreakpointMode, BreakpointType};
use crate::command_registry::{
    json_guard, CommandError, ConsoleCommandRegistry, CustomRequestRegistry,
};
use crate::outbound::EventSink;

pub const BREAKPOINT_MODES_CHANGED_EVENT: &str = "breakpointModesChanged";

#[derive(Debug, Deserialize)]
struct SetBreakpointModeArguments {
    mode: String,
}

fn now_using(label: &str) -> String {
    format!("Now using {label} breakpoints (only applies to new breakpoints)")
}

fn type_request_name(ty: BreakpointType) -> String {
    format!("use{}Breakpoints", ty.label())
}

fn mode_entry(mode: BreakpointMode) -> Value {
    json!({
        "mode": mode.id(),
        "label": mode.label(),
        "appliesTo": ["source"],
    })
}

/// Every mode the adapter knows, for the `initialize` capabilities.
pub fn initialize_breakpoint_modes() -> Value {
    Value::Array(BreakpointMode::ALL.into_iter().map(mode_entry).collect())
}

pub fn breakpoint_modes_changed_body(defaults: &BreakpointDefaults) -> Value {
    json!({
        "modes": defaults.supported_modes().iter().copied().map(mode_entry).collect::<Vec<_>>(),
        "currentMode": defaults.selection().mode.id(),
    })
}

/// Register the type and mode commands for the session's driver and announce the initial mode.
pub fn register_breakpoint_extensions(
    defaults: Arc<BreakpointDefaults>,
    sink: EventSink,
    console: &mut ConsoleCommandRegistry,
    custom: &mut CustomRequestRegistry,
) {
    for &ty in defaults.supported_types() {
        let console_defaults = defaults.clone();
        console.register_command(format!("__breakpoints_set_type_{}", ty.id()), move |()| {
            let result = console_defaults
                .set_default_type(ty)
                .map(|()| now_using(ty.label()))
                .map_err(|err| CommandError::Failed(err.to_string()));
            async move { result }
        });

        let request_defaults = defaults.clone();
        let request_sink = sink.clone();
        custom.register_command(type_request_name(ty), move |_args: Value| {
            let result = request_defaults
                .set_default_type(ty)
                .map(|()| {
                    request_sink.output(now_using(ty.label()));
                    Value::Null
                })
                .map_err(|err| CommandError::Failed(err.to_string()));
            async move { result }
        });
    }

    let types_defaults = defaults.clone();
    custom.register_command("getBreakpointTypes", move |_args: Value| {
        let body = json!({
            "types": types_defaults.supported_types().iter().map(|ty| ty.id()).collect::<Vec<_>>(),
            "current": types_defaults.selection().ty.id(),
        });
        async move { Ok(body) }
    });

    for &mode in defaults.supported_modes() {
        let console_defaults = defaults.clone();
        let console_sink = sink.clone();
        console.register_command(format!("__breakpoints_set_mode_{}", mode.id()), move |()| {
            let result = set_mode(&console_defaults, &console_sink, mode)
                .map(|()| now_using(mode.label()))
                .map_err(|err| CommandError::Failed(err.to_string()));
            async move { result }
        });
    }

    let mode_defaults = defaults.clone();
    let mode_sink = sink.clone();
    custom.register_command_with_type_check(
        "setBreakpointMode",
        json_guard::<SetBreakpointModeArguments>(),
        move |args: SetBreakpointModeArguments| {
            let result = BreakpointMode::from_id(&args.mode)
                .ok_or_else(|| BreakpointError::UnknownMode(args.mode.clone()))
                .and_then(|mode| set_mode(&mode_defaults, &mode_sink, mode).map(|()| mode));
            let result = match result {
                Ok(mode) => {
                    mode_sink.output(now_using(mode.label()));
                    Ok(Value::Null)
                }
                Err(err) => {
                    mode_sink.output("Cannot set breakpoint mode (not supported by driver)");
                    Err(CommandError::Failed(err.to_string()))
                }
            };
            async move { result }
        },
    );

    let modes_defaults = defaults.clone();
    custom.register_command("getBreakpointModes", move |_args: Value| {
        let body = json!({
            "modes": modes_defaults.supported_modes().iter().map(|mode| mode.id()).collect::<Vec<_>>(),
            "current": modes_defaults.selection().mode.id(),
        });
        async move { Ok(body) }
    });

    let initial = defaults.selection().mode;
    sink.output(format!("Using '{}' breakpoint mode.", initial.id()));
    sink.send_event(
        BREAKPOINT_MODES_CHANGED_EVENT,
        Some(breakpoint_modes_changed_body(&defaults)),
    );
}

fn set_mode(
    defaults: &BreakpointDefaults,
    sink: &EventSink,
    mode: BreakpointMode,
) -> Result<(), BreakpointError> {
    let previous = defaults.selection().mode;
    defaults.set_default_mode(mode)?;
    if previous != mode {
        sink.send_event(
            BREAKPOINT_MODES_CHANGED_EVENT,
            Some(breakpoint_modes_changed_body(defaults)),
        );
    }
    Ok(())
}
