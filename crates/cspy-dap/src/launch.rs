//! Launch arguments and their resolution into a backend session descriptor.

use std::path::PathBuf;

use cspy_rpc::SessionDescriptor;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::breakpoints::{BreakpointMode, BreakpointType};
use crate::run_control::ENTRY_LOCATION;

const CORE_COUNT_OPTION: &str = "--multicore_nr_of_cores=";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Missing required field '{0}'.")]
    MissingField(&'static str),

    #[error("The program '{}' does not exist.", .0.display())]
    ProgramNotFound(PathBuf),

    #[error("Invalid value for '{field}': {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    #[error("Malformed launch arguments: {0}")]
    Malformed(String),
}

/// `stopOnSymbol` is either a flag or the symbol to stop at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StopOnSymbol {
    Enabled(bool),
    Symbol(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: Option<PathBuf>,
    pub target: Option<String>,
    pub driver: Option<String>,
    pub driver_options: Option<Vec<String>>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub setup_macros: Vec<PathBuf>,
    #[serde(default)]
    pub device_macros: Vec<PathBuf>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub stop_on_symbol: Option<StopOnSymbol>,
    #[serde(default)]
    pub breakpoint_type: Option<String>,
    #[serde(default)]
    pub breakpoint_mode: Option<String>,
    #[serde(default)]
    pub multicore_lockstep_mode_enabled: Option<bool>,
    #[serde(default)]
    pub backend_address: Option<String>,
    /// Log every DAP request at info level.
    #[serde(default)]
    pub trace: bool,
}

/// How the program is brought to its first stop after configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialRun {
    /// Report a stop right away without running.
    StopImmediately,
    RunTo(String),
    Continue,
}

impl LaunchArguments {
    pub fn from_value(value: &Value) -> Result<Self, LaunchError> {
        serde_json::from_value(value.clone()).map_err(|err| LaunchError::Malformed(err.to_string()))
    }

    pub fn initial_run(&self) -> InitialRun {
        match &self.stop_on_symbol {
            Some(StopOnSymbol::Symbol(symbol)) if !symbol.is_empty() => {
                InitialRun::RunTo(symbol.clone())
            }
            Some(StopOnSymbol::Enabled(true)) => InitialRun::StopImmediately,
            _ if self.stop_on_entry => InitialRun::RunTo(ENTRY_LOCATION.to_owned()),
            _ => InitialRun::Continue,
        }
    }

    pub fn lockstep(&self) -> bool {
        self.multicore_lockstep_mode_enabled.unwrap_or(true)
    }

    pub fn requested_breakpoint_type(&self) -> Option<BreakpointType> {
        let id = self.breakpoint_type.as_deref()?;
        let ty = BreakpointType::from_id(id);
        if ty.is_none() {
            tracing::warn!(target: "cspy.dap.breakpoints", breakpoint_type = id, "ignoring unknown breakpoint type");
        }
        ty
    }

    pub fn requested_breakpoint_mode(&self) -> Option<BreakpointMode> {
        let id = self.breakpoint_mode.as_deref()?;
        let mode = BreakpointMode::from_id(id);
        if mode.is_none() {
            tracing::warn!(target: "cspy.dap.breakpoints", breakpoint_mode = id, "ignoring unknown breakpoint mode");
        }
        mode
    }
}

/// Turns launch arguments into what the backend needs to start a session.
pub trait LaunchResolver: Send + Sync {
    fn resolve(&self, args: &LaunchArguments) -> Result<SessionDescriptor, LaunchError>;
}

/// Validates required fields and the program path; derives the core count from
/// the driver options.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLaunchResolver;

impl LaunchResolver for DefaultLaunchResolver {
    fn resolve(&self, args: &LaunchArguments) -> Result<SessionDescriptor, LaunchError> {
        let program = args
            .program
            .clone()
            .ok_or(LaunchError::MissingField("program"))?;
        let target = args
            .target
            .clone()
            .ok_or(LaunchError::MissingField("target"))?;
        let driver = args
            .driver
            .clone()
            .ok_or(LaunchError::MissingField("driver"))?;
        let driver_options = args
            .driver_options
            .clone()
            .ok_or(LaunchError::MissingField("driverOptions"))?;

        if !program.is_file() {
            return Err(LaunchError::ProgramNotFound(program));
        }

        let n_cores = core_count(&driver_options)?;

        Ok(SessionDescriptor {
            program,
            target,
            driver,
            driver_options,
            project_path: args.project_path.clone(),
            setup_macros: args.setup_macros.clone(),
            device_macros: args.device_macros.clone(),
            plugins: args.plugins.clone(),
            n_cores,
            backend_address: args.backend_address.clone(),
        })
    }
}

fn core_count(driver_options: &[String]) -> Result<u32, LaunchError> {
    let Some(value) = driver_options
        .iter()
        .rev()
        .find_map(|opt| opt.strip_prefix(CORE_COUNT_OPTION))
    else {
        return Ok(1);
    };
    match value.trim().parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(LaunchError::InvalidArgument {
            field: "driverOptions",
            message: format!("'{CORE_COUNT_OPTION}{value}' is not a valid core count"),
        }),
    }
}
