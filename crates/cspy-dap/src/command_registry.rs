//! Named command tables.
//!
//! Custom DAP requests and debug-console commands are both served from a
//! [`CommandRegistry`]. Subsystems register their commands while a session starts,
//! so the request dispatcher never needs to know their names.

use std::fmt;
use std::future::Future;

use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("No such command '{0}'")]
    NoSuchCommand(String),

    #[error("Invalid argument for command '{0}'")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),
}

type Callback<A, R> = Box<dyn Fn(A) -> BoxFuture<'static, Result<R, CommandError>> + Send + Sync>;

struct Command<A, R> {
    name: String,
    callback: Callback<A, R>,
}

/// Dispatch table from command name to an async callback taking `A` and producing `R`.
pub struct CommandRegistry<A, R> {
    commands: Vec<Command<A, R>>,
}

impl<A, R> Default for CommandRegistry<A, R> {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
        }
    }
}

impl<A: 'static, R: Send + 'static> fmt::Debug for CommandRegistry<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.command_names())
            .finish()
    }
}

impl<A: 'static, R: Send + 'static> CommandRegistry<A, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, replacing any earlier command of that name.
    pub fn register_command<F, Fut>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CommandError>> + Send + 'static,
    {
        self.insert(
            name.into(),
            Box::new(move |arg: A| callback(arg).boxed()),
        );
    }

    /// Register a command whose argument is narrowed by `guard` before the callback runs.
    ///
    /// Arguments the guard rejects resolve to [`CommandError::InvalidArgument`].
    pub fn register_command_with_type_check<T, G, F, Fut>(
        &mut self,
        name: impl Into<String>,
        guard: G,
        callback: F,
    ) where
        G: Fn(&A) -> Option<T> + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CommandError>> + Send + 'static,
    {
        let name = name.into();
        let command_name = name.clone();
        self.insert(
            name,
            Box::new(move |arg: A| match guard(&arg) {
                Some(narrowed) => callback(narrowed).boxed(),
                None => future::ready(Err(CommandError::InvalidArgument(command_name.clone())))
                    .boxed(),
            }),
        );
    }

    fn insert(&mut self, name: String, callback: Callback<A, R>) {
        match self.commands.iter_mut().find(|command| command.name == name) {
            Some(existing) => existing.callback = callback,
            None => self.commands.push(Command { name, callback }),
        }
    }

    /// Names in registration order.
    pub fn command_names(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub async fn run_command(&self, name: &str, arg: A) -> Result<R, CommandError> {
        let Some(command) = self.commands.iter().find(|c| c.name == name) else {
            return Err(CommandError::NoSuchCommand(name.to_owned()));
        };
        (command.callback)(arg).await
    }
}

/// Guard for JSON-argument commands: accepts any value that deserializes into `T`.
pub fn json_guard<T: DeserializeOwned + 'static>() -> impl Fn(&Value) -> Option<T> + Send + Sync + 'static {
    |value: &Value| serde_json::from_value(value.clone()).ok()
}

/// Custom DAP requests: JSON arguments in, JSON body out.
pub type CustomRequestRegistry = CommandRegistry<Value, Value>;

/// Debug-console commands: no argument, console text out.
pub type ConsoleCommandRegistry = CommandRegistry<(), String>;
