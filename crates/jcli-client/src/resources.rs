//! Teardown bookkeeping for everything a session acquires.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use jcli_core::{CliError, CliResult};

/// Something that must be released when the session ends.
pub trait Closable: Send {
    /// Short label used in diagnostics.
    fn name(&self) -> &str;

    fn close(&mut self) -> CliResult<()>;
}

impl Closable for tokio::task::AbortHandle {
    fn name(&self) -> &str {
        "background task"
    }

    fn close(&mut self) -> CliResult<()> {
        self.abort();
        Ok(())
    }
}

/// Every failure from one [`ResourceSet::close_all`] pass.
#[derive(Debug, Error)]
#[error("{} resource(s) failed to close: {}", .0.len(), describe(.0))]
pub struct CloseFailures(pub Vec<(String, CliError)>);

fn describe(failures: &[(String, CliError)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resources acquired during a session, released in reverse order exactly
/// once.
pub struct ResourceSet {
    // `None` once drained.
    entries: Mutex<Option<Vec<Box<dyn Closable>>>>,
}

impl Default for ResourceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSet {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(Vec::new())),
        }
    }

    /// Track `resource`. Registering after the set was drained closes it
    /// on the spot.
    pub fn register(&self, resource: impl Closable + 'static) {
        let mut resource: Box<dyn Closable> = Box::new(resource);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = entries.as_mut() {
            list.push(resource);
            return;
        }
        drop(entries);
        if let Err(e) = resource.close() {
            tracing::debug!(resource = resource.name(), error = %e, "late close failed");
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Close everything, newest first. Every resource is attempted; all
    /// failures are reported together. A second call does nothing.
    pub fn close_all(&self) -> Result<(), CloseFailures> {
        let taken = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(list) = taken else {
            return Ok(());
        };

        let mut failures = Vec::new();
        for mut resource in list.into_iter().rev() {
            tracing::debug!(resource = resource.name(), "closing");
            if let Err(e) = resource.close() {
                failures.push((resource.name().to_string(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseFailures(failures))
        }
    }
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            tracing::warn!("{e}");
        }
    }
}
