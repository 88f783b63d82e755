use std::collections::HashMap;
use std::sync::Arc;

use cspy_rpc::{BreakpointClient, BreakpointRequest, RpcError};
use futures::future::join_all;

use super::{BreakpointDefaults, BreakpointError, BreakpointMode};
use crate::dap::types::{Breakpoint, SetBreakpointsArguments, Source, SourceBreakpoint};

/// Location expression for a source position: `{path}.line.column`, columns default to 1.
pub fn source_ule(path: &str, line: i64, column: Option<i64>) -> String {
    format!("{{{path}}}.{line}.{}", column.unwrap_or(1))
}

#[derive(Debug, Clone)]
struct InstalledEntry {
    requested: SourceBreakpoint,
    reported: Breakpoint,
    backend_id: Option<u64>,
}

/// Source breakpoints installed in the backend, grouped by source path.
pub struct BreakpointManager {
    client: Arc<dyn BreakpointClient>,
    defaults: Arc<BreakpointDefaults>,
    installed: HashMap<String, Vec<InstalledEntry>>,
}

impl std::fmt::Debug for BreakpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakpointManager")
            .field("sources", &self.installed.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BreakpointManager {
    pub fn new(client: Arc<dyn BreakpointClient>, defaults: Arc<BreakpointDefaults>) -> Self {
        Self {
            client,
            defaults,
            installed: HashMap::new(),
        }
    }

    /// Replace the breakpoints of one source.
    ///
    /// Breakpoints identical to an installed one keep their backend breakpoint;
    /// the rest of the old set is removed and the new ones are set.
    pub async fn set_breakpoints(
        &mut self,
        args: &SetBreakpointsArguments,
    ) -> Result<Vec<Breakpoint>, BreakpointError> {
        let path = args
            .source
            .path
            .clone()
            .ok_or(BreakpointError::MissingSourcePath)?;

        let mut previous: Vec<Option<InstalledEntry>> = self
            .installed
            .remove(&path)
            .unwrap_or_default()
            .into_iter()
            .map(Some)
            .collect();

        let mut kept: Vec<Option<InstalledEntry>> = Vec::with_capacity(args.breakpoints.len());
        for requested in &args.breakpoints {
            let reused = previous
                .iter_mut()
                .find(|slot| matches!(slot, Some(entry) if entry.requested == *requested))
                .and_then(Option::take);
            kept.push(reused);
        }

        let stale: Vec<u64> = previous
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.backend_id)
            .collect();
        self.remove_all(&stale).await;

        let this = &*self;
        let source = &args.source;
        let source_path = path.as_str();
        let pending = args
            .breakpoints
            .iter()
            .zip(kept.iter())
            .map(|(requested, kept)| async move {
                match kept {
                    Some(entry) => Ok(entry.clone()),
                    None => this.install(source, source_path, requested).await,
                }
            });
        let entries = join_all(pending)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, RpcError>>()?;

        tracing::debug!(
            target: "cspy.dap.breakpoints",
            path = %path,
            count = entries.len(),
            removed = stale.len(),
            "breakpoints updated"
        );

        let reported = entries.iter().map(|entry| entry.reported.clone()).collect();
        if !entries.is_empty() {
            self.installed.insert(path, entries);
        }
        Ok(reported)
    }

    async fn install(
        &self,
        source: &Source,
        path: &str,
        requested: &SourceBreakpoint,
    ) -> Result<InstalledEntry, RpcError> {
        let unverified = |message: String| InstalledEntry {
            requested: requested.clone(),
            reported: Breakpoint {
                id: None,
                verified: false,
                message: Some(message),
                source: Some(source.clone()),
                line: requested.line,
                column: requested.column,
            },
            backend_id: None,
        };

        let request = match self.backend_request(path, requested) {
            Ok(request) => request,
            Err(message) => return Ok(unverified(message)),
        };

        match self.client.set_breakpoint(&request).await {
            Ok(installed) => Ok(InstalledEntry {
                requested: requested.clone(),
                reported: Breakpoint {
                    id: Some(installed.id),
                    verified: installed.valid,
                    message: installed.message,
                    source: Some(source.clone()),
                    line: requested.line,
                    column: requested.column,
                },
                backend_id: Some(installed.id),
            }),
            Err(err) if err.is_connection_lost() => Err(err),
            Err(err) => {
                tracing::debug!(
                    target: "cspy.dap.breakpoints",
                    ule = %request.ule,
                    error = %err,
                    "backend rejected breakpoint"
                );
                Ok(unverified(err.to_string()))
            }
        }
    }

    /// The backend request for `requested`, or the reason it cannot be set.
    fn backend_request(
        &self,
        path: &str,
        requested: &SourceBreakpoint,
    ) -> Result<BreakpointRequest, String> {
        let selection = self.defaults.selection();
        let mode = match requested.mode.as_deref() {
            None => selection.mode,
            Some(id) => {
                let mode = BreakpointMode::from_id(id)
                    .ok_or_else(|| BreakpointError::UnknownMode(id.to_owned()).to_string())?;
                if !self.defaults.capability().supports_mode(mode) {
                    return Err(BreakpointError::UnsupportedMode(mode).to_string());
                }
                mode
            }
        };

        let skip_count = match requested.hit_condition.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(hit) => hit
                .parse::<u32>()
                .map_err(|_| format!("Hit condition '{hit}' is not a non-negative integer"))?,
        };

        Ok(BreakpointRequest {
            ule: source_ule(path, requested.line, requested.column),
            category: self
                .defaults
                .capability()
                .category(mode, selection.ty)
                .to_owned(),
            condition: requested.condition.clone().filter(|c| !c.trim().is_empty()),
            skip_count,
            log_message: requested.log_message.clone(),
        })
    }

    async fn remove_all(&self, ids: &[u64]) {
        let results = join_all(ids.iter().map(|&id| self.client.remove_breakpoint(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(
                    target: "cspy.dap.breakpoints",
                    id,
                    error = %err,
                    "failed to remove breakpoint"
                );
            }
        }
    }

    /// Number of breakpoints tracked for `path`.
    pub fn installed_count(&self, path: &str) -> usize {
        self.installed.get(path).map_or(0, Vec::len)
    }

    /// Forget all tracked breakpoints. The backend drops them with the session.
    pub fn dispose(&mut self) {
        self.installed.clear();
    }
}
