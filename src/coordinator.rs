//! Operation coordinator.
//!
//! Every operation walks the same phases:
//!
//! ```text
//! Idle -> Locking -> SyncingIn -> Running -> SyncingOut -> Released
//! ```
//!
//! `SyncingOut` only happens for mutating commands. A failed pull releases
//! the lock because nothing has run yet. A failed tool run or push keeps
//! the lock so nobody else builds on a half-applied change; the operator
//! clears it with a forced run once things are consistent again.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Scope;
use crate::error::{ConfigError, LockError, Result, StateError, TerrascopeError};
use crate::lock::{LockRecord, LockToken, ScopeLock};
use crate::state::{
    LocalStateSlot, RemoteStateStore, StateDocument, StateSync, migrate_to_local, migrate_to_remote,
};
use crate::tool::{ToolCommand, ToolInvocation, ToolRunner};

/// Step of an operation's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// Taking the scope lock.
    Locking,
    /// Pulling the authoritative state into the working directory.
    SyncingIn,
    /// Running the tool or the migration.
    Running,
    /// Publishing the state after a mutating run.
    SyncingOut,
    /// The lock has been released.
    Released,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Locking => "locking",
            Self::SyncingIn => "syncing-in",
            Self::Running => "running",
            Self::SyncingOut => "syncing-out",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

/// Summary of a successful operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    /// Operation name.
    pub operation: String,
    /// Scope the operation ran against.
    pub scope: Scope,
    /// Phases passed through, in order.
    pub phases: Vec<Phase>,
    /// Digest of the document pulled or migrated, if any.
    pub state_digest: Option<String>,
    /// Whether the state was published.
    pub pushed: bool,
    /// Whether the lock was released.
    pub lock_released: bool,
    /// Lock strategy used.
    pub lock_kind: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Where `show_state` found the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateView {
    /// Store the document was read from.
    pub source: String,
    /// The document, if one exists.
    pub document: Option<StateDocument>,
}

/// Runs operations under the scope lock with state hand-off.
pub struct Coordinator {
    /// Lock strategy.
    lock: Arc<dyn ScopeLock>,
    /// State synchronisation strategy.
    sync: Arc<dyn StateSync>,
    /// Remote store used by migrations and `show_state`.
    store: Option<Arc<dyn RemoteStateStore>>,
    /// Operator's local state file.
    home: LocalStateSlot,
    /// Tool runner.
    runner: Arc<dyn ToolRunner>,
    /// Steal instead of acquire.
    force: bool,
    /// Resource addresses passed to the tool.
    targets: Vec<String>,
    /// Lock timeout passed to the tool.
    tool_lock_timeout: Option<Duration>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("lock", &self.lock.kind())
            .field("remote_sync", &self.sync.is_remote())
            .field("store", &self.store.as_ref().map(|s| s.backend_type()))
            .field("home", &self.home)
            .field("force", &self.force)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        lock: Arc<dyn ScopeLock>,
        sync: Arc<dyn StateSync>,
        runner: Arc<dyn ToolRunner>,
        home: LocalStateSlot,
    ) -> Self {
        Self {
            lock,
            sync,
            store: None,
            home,
            runner,
            force: false,
            targets: Vec::new(),
            tool_lock_timeout: None,
        }
    }

    /// Sets the remote store used by migrations and `show_state`.
    #[must_use]
    pub fn with_store(mut self, store: Option<Arc<dyn RemoteStateStore>>) -> Self {
        self.store = store;
        self
    }

    /// Steals the lock instead of waiting for it.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Restricts tool runs to `targets`.
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Passes a lock timeout through to the tool.
    #[must_use]
    pub const fn with_tool_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_lock_timeout = timeout;
        self
    }

    /// Runs `plan` in `workdir`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn plan(&self, scope: &Scope, workdir: &Path) -> Result<OperationReport> {
        self.run(scope, ToolCommand::Plan, workdir).await
    }

    /// Runs `graph` in `workdir`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn graph(&self, scope: &Scope, workdir: &Path) -> Result<OperationReport> {
        self.run(scope, ToolCommand::Graph, workdir).await
    }

    /// Runs `validate` in `workdir`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn validate(&self, scope: &Scope, workdir: &Path) -> Result<OperationReport> {
        self.run(scope, ToolCommand::Validate, workdir).await
    }

    /// Runs `apply` in `workdir`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn apply(&self, scope: &Scope, workdir: &Path) -> Result<OperationReport> {
        self.run(scope, ToolCommand::Apply, workdir).await
    }

    /// Runs `destroy` in `workdir`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn destroy(&self, scope: &Scope, workdir: &Path) -> Result<OperationReport> {
        self.run(scope, ToolCommand::Destroy, workdir).await
    }

    /// Imports the existing resource `id` as `address`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn import(&self, scope: &Scope, workdir: &Path, address: &str, id: &str) -> Result<OperationReport> {
        let command = ToolCommand::Import {
            address: address.to_string(),
            id: id.to_string(),
        };
        self.run(scope, command, workdir).await
    }

    /// Runs one tool command under the lock.
    ///
    /// # Errors
    ///
    /// - Lock errors if the scope cannot be locked; nothing else runs.
    /// - State read errors if the pull fails; the lock is released.
    /// - Tool errors if the run fails; the lock is kept.
    /// - State write errors flagged as a consistency warning if the push
    ///   fails; the lock is kept.
    /// - [`LockError::ReleaseFailed`] naming the token if the final release
    ///   fails.
    pub async fn run(&self, scope: &Scope, command: ToolCommand, workdir: &Path) -> Result<OperationReport> {
        let started = Instant::now();
        let operation = command.name();
        let slot = LocalStateSlot::in_dir(workdir);
        let mut phases = vec![Phase::Idle];

        phases.push(Phase::Locking);
        let token = self.lock_scope(scope, operation).await?;

        phases.push(Phase::SyncingIn);
        let pulled = match self.sync.pull(scope, &slot).await {
            Ok(pulled) => pulled,
            Err(err) => {
                self.release_after_failure(scope, &token).await;
                return Err(err);
            }
        };

        phases.push(Phase::Running);
        let invocation = ToolInvocation::new(command.clone(), workdir)
            .with_targets(self.targets.clone())
            .with_lock_timeout(self.tool_lock_timeout);
        if let Err(err) = self.runner.run(&invocation).await {
            self.report_retained(scope, &token, &err);
            return Err(err);
        }

        let mut pushed = false;
        if command.is_mutating() {
            phases.push(Phase::SyncingOut);
            if let Err(err) = self.sync.push(scope, &slot).await {
                let err = into_consistency_warning(scope, err);
                error!("{operation} succeeded but its state was not saved; local and remote state for {scope} now differ");
                self.report_retained(scope, &token, &err);
                return Err(err);
            }
            pushed = true;
        }

        self.release_completed(scope, &token, operation).await?;
        phases.push(Phase::Released);
        info!("{operation} for {scope} finished");

        Ok(self.report(operation, scope, phases, pulled.as_ref(), pushed, started))
    }

    /// Moves the operator's local state into the remote store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no remote store is configured, and
    /// lock or state errors otherwise. The lock is kept if the remote write
    /// or the local delete fails.
    pub async fn use_remote_state(&self, scope: &Scope) -> Result<OperationReport> {
        let store = self.require_store()?;
        let started = Instant::now();
        let operation = "use-remote-state";

        let token = self.lock_scope(scope, operation).await?;
        let result = migrate_to_remote(scope, &self.home, store.as_ref()).await;
        let moved = self.finish_migration(scope, &token, result).await?;

        let phases = vec![Phase::Idle, Phase::Locking, Phase::Running, Phase::Released];
        let pushed = moved.is_some();
        Ok(self.report(operation, scope, phases, moved.as_ref(), pushed, started))
    }

    /// Copies the remote state into the operator's local state file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no remote store is configured, and
    /// lock or state errors otherwise.
    pub async fn use_local_state(&self, scope: &Scope) -> Result<OperationReport> {
        let store = self.require_store()?;
        let started = Instant::now();
        let operation = "use-local-state";

        let token = self.lock_scope(scope, operation).await?;
        let result = migrate_to_local(scope, &self.home, store.as_ref()).await;
        let copied = self.finish_migration(scope, &token, result).await?;

        let phases = vec![Phase::Idle, Phase::Locking, Phase::Running, Phase::Released];
        Ok(self.report(operation, scope, phases, copied.as_ref(), false, started))
    }

    /// Reads the authoritative state document without locking.
    ///
    /// # Errors
    ///
    /// Returns a state read error if the document cannot be read.
    pub async fn show_state(&self, scope: &Scope) -> Result<StateView> {
        match &self.store {
            Some(store) if self.sync.is_remote() => Ok(StateView {
                source: store.backend_type().to_string(),
                document: store.get(scope).await?,
            }),
            _ => {
                let document = self.home.read().await.map_err(|e| {
                    StateError::read(scope.as_str(), "local", format!("{}: {e}", self.home.path().display()))
                })?;
                Ok(StateView {
                    source: self.home.path().display().to_string(),
                    document,
                })
            }
        }
    }

    /// Returns the current lock holder, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend is unavailable.
    pub async fn lock_status(&self, scope: &Scope) -> Result<Option<LockRecord>> {
        self.lock.holder(scope).await
    }

    /// Takes the lock away from its holder and releases it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend is unavailable.
    pub async fn clear_lock(&self, scope: &Scope) -> Result<LockToken> {
        let token = self.lock.steal(scope, "clear-lock").await?;
        self.lock.release(scope, &token).await?;
        Ok(token)
    }

    /// Releases the lock held under `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend is unavailable.
    pub async fn release_lock(&self, scope: &Scope, token: &LockToken) -> Result<()> {
        self.lock.release(scope, token).await
    }

    async fn lock_scope(&self, scope: &Scope, operation: &str) -> Result<LockToken> {
        if self.force {
            self.lock.steal(scope, operation).await
        } else {
            self.lock.acquire(scope, operation).await
        }
    }

    async fn release_after_failure(&self, scope: &Scope, token: &LockToken) {
        if let Err(e) = self.lock.release(scope, token).await {
            warn!("Failed to release lock for {scope} after error: {e}");
        }
    }

    async fn release_completed(&self, scope: &Scope, token: &LockToken, operation: &str) -> Result<()> {
        self.lock.release(scope, token).await.map_err(|e| {
            error!("{operation} for {scope} completed but its lock is still held under token {token}: {e}");
            LockError::release_failed(scope.as_str(), token.to_string(), &e).into()
        })
    }

    fn report_retained(&self, scope: &Scope, token: &LockToken, err: &TerrascopeError) {
        warn!("Keeping lock for {scope} ({} backend, token {token}) after failure: {err}", self.lock.kind());
    }

    async fn finish_migration(
        &self,
        scope: &Scope,
        token: &LockToken,
        result: Result<Option<StateDocument>>,
    ) -> Result<Option<StateDocument>> {
        match result {
            Ok(doc) => {
                self.release_completed(scope, token, "migration").await?;
                Ok(doc)
            }
            Err(err) => {
                if err.lock_retained() {
                    self.report_retained(scope, token, &err);
                } else {
                    self.release_after_failure(scope, token).await;
                }
                Err(err)
            }
        }
    }

    fn require_store(&self) -> Result<&Arc<dyn RemoteStateStore>> {
        self.store.as_ref().ok_or_else(|| {
            ConfigError::validation("No remote state backend is configured", "state.backend").into()
        })
    }

    fn report(
        &self,
        operation: &str,
        scope: &Scope,
        phases: Vec<Phase>,
        doc: Option<&StateDocument>,
        pushed: bool,
        started: Instant,
    ) -> OperationReport {
        OperationReport {
            operation: operation.to_string(),
            scope: scope.clone(),
            phases,
            state_digest: doc.map(StateDocument::digest),
            pushed,
            lock_released: true,
            lock_kind: self.lock.kind().to_string(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Marks a push failure as leaving local and remote state inconsistent.
fn into_consistency_warning(scope: &Scope, err: TerrascopeError) -> TerrascopeError {
    match err {
        TerrascopeError::State(state) => TerrascopeError::State(state.into_consistency_warning()),
        other => StateError::write(scope.as_str(), "remote", other.to_string())
            .into_consistency_warning()
            .into(),
    }
}
