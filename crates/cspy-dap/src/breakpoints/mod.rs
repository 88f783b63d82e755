//! Breakpoint capability negotiation and source breakpoint management.

mod capability;
mod extension;
mod manager;

use cspy_rpc::RpcError;
use parking_lot::Mutex;
use thiserror::Error;

pub use capability::{
    driver_from_name, BreakpointCapability, BreakpointMode, BreakpointType, Driver, DriverFamily,
    DRIVERS,
};
pub use extension::{
    breakpoint_modes_changed_body, initialize_breakpoint_modes, register_breakpoint_extensions,
};
pub use manager::{source_ule, BreakpointManager};

#[derive(Debug, Error)]
pub enum BreakpointError {
    #[error("Breakpoint type '{0}' is not supported by the driver")]
    UnsupportedType(BreakpointType),

    #[error("Breakpoint mode '{0}' is not supported by the driver")]
    UnsupportedMode(BreakpointMode),

    #[error("Unknown breakpoint mode '{0}'")]
    UnknownMode(String),

    #[error("The driver does not specify any supported breakpoint types")]
    NoSupportedTypes,

    #[error("The driver does not specify any supported breakpoint modes")]
    NoSupportedModes,

    #[error("Breakpoint source has no path")]
    MissingSourcePath,

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// The type and mode used for breakpoints that do not name their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultBreakpointSelection {
    pub ty: BreakpointType,
    pub mode: BreakpointMode,
}

/// Per-session breakpoint capability plus the mutable default selection.
#[derive(Debug)]
pub struct BreakpointDefaults {
    capability: BreakpointCapability,
    selection: Mutex<DefaultBreakpointSelection>,
}

impl BreakpointDefaults {
    /// Adopt the requested initial type/mode where supported, otherwise the first supported entry.
    pub fn new(
        capability: BreakpointCapability,
        requested_type: Option<BreakpointType>,
        requested_mode: Option<BreakpointMode>,
    ) -> Self {
        let selection = DefaultBreakpointSelection {
            ty: capability.initial_type(requested_type),
            mode: capability.initial_mode(requested_mode),
        };
        Self {
            capability,
            selection: Mutex::new(selection),
        }
    }

    pub fn capability(&self) -> &BreakpointCapability {
        &self.capability
    }

    pub fn selection(&self) -> DefaultBreakpointSelection {
        *self.selection.lock()
    }

    pub fn supported_types(&self) -> &[BreakpointType] {
        self.capability.supported_types()
    }

    pub fn supported_modes(&self) -> &[BreakpointMode] {
        self.capability.supported_modes()
    }

    pub fn set_default_type(&self, ty: BreakpointType) -> Result<(), BreakpointError> {
        if !self.capability.supports_type(ty) {
            return Err(BreakpointError::UnsupportedType(ty));
        }
        self.selection.lock().ty = ty;
        tracing::debug!(target: "cspy.dap.breakpoints", %ty, "default breakpoint type changed");
        Ok(())
    }

    pub fn set_default_mode(&self, mode: BreakpointMode) -> Result<(), BreakpointError> {
        if !self.capability.supports_mode(mode) {
            return Err(BreakpointError::UnsupportedMode(mode));
        }
        self.selection.lock().mode = mode;
        tracing::debug!(target: "cspy.dap.breakpoints", %mode, "default breakpoint mode changed");
        Ok(())
    }
}
