use cspy_rpc::RpcError;
use thiserror::Error;

use crate::breakpoints::BreakpointError;
use crate::command_registry::CommandError;
use crate::launch::LaunchError;
use crate::run_control::RunControlError;
use crate::session::SessionPhase;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session")]
    NoActiveSession,

    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },

    #[error("invalid arguments for '{command}': {message}")]
    InvalidArguments { command: String, message: String },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    RunControl(#[from] RunControlError),

    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl SessionError {
    fn rpc(&self) -> Option<&RpcError> {
        match self {
            SessionError::Rpc(err) => Some(err),
            SessionError::RunControl(RunControlError::Rpc(err)) => Some(err),
            SessionError::Breakpoint(BreakpointError::Rpc(err)) => Some(err),
            _ => None,
        }
    }

    /// The component the backend blamed, if any.
    pub fn culprit(&self) -> Option<&str> {
        self.rpc().and_then(RpcError::culprit)
    }

    pub fn is_connection_lost(&self) -> bool {
        self.rpc().is_some_and(RpcError::is_connection_lost)
    }

    /// Message for a failed launch response: the error, plus the culprit in parentheses.
    pub fn launch_message(&self) -> String {
        match self.culprit() {
            Some(culprit) => format!("{self} ({culprit})"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_message_names_the_culprit() {
        let err = SessionError::from(RpcError::Remote {
            message: "Failed to load flash loader".to_owned(),
            culprit: Some("flashloader.board".to_owned()),
        });
        assert_eq!(
            err.launch_message(),
            "Failed to load flash loader (flashloader.board)"
        );

        let plain = SessionError::from(RpcError::remote("Target not responding"));
        assert_eq!(plain.launch_message(), "Target not responding");
    }

    #[test]
    fn connection_loss_is_seen_through_wrappers() {
        let err = SessionError::from(RunControlError::Rpc(RpcError::ConnectionClosed));
        assert!(err.is_connection_lost());
        assert!(!SessionError::NoActiveSession.is_connection_lost());
    }
}
