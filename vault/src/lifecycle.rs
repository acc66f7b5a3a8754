//! Run lifecycle: configure, authenticate, bind, renew, revoke.
//!
//! The controller is an explicit state machine. Every path out of
//! [`RunState::Active`] or [`RunState::Renewing`] passes through
//! [`RunState::Revoking`], so leases acquired during a run are revoked on
//! success, on fatal read errors, on job failure and on cancellation.

use crate::{
    binding::{BindingReport, BoundSecret, MissingBinding, SecretBinding, group_by_path},
    client::AccessClient,
    config::{ClientSettings, Configuration, ScopeChain},
    credentials::CredentialSource,
    error::{RequestFailure, VaultError, VaultResult},
    log_sink::LogSink,
    secrets::Lease,
    transport::{ConnectOptions, Transport},
};
use futures::FutureExt;
use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc, time::Duration};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Signal that aborts the job of a run when it completes.
pub type Cancellation = Pin<Box<dyn Future<Output = ()> + Send>>;

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Nothing happened yet
    Idle,
    /// Resolving the effective configuration
    Configuring,
    /// Logging in
    Authenticating,
    /// Session established; secrets may be read
    Active,
    /// Renewing the session token
    Renewing,
    /// Revoking leases
    Revoking,
    /// Done; no further operation is possible
    Terminated,
}

impl RunState {
    /// Whether the controller may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Configuring | Self::Terminated)
                | (Self::Configuring, Self::Authenticating | Self::Terminated)
                | (Self::Authenticating, Self::Active | Self::Terminated)
                | (Self::Active, Self::Renewing | Self::Revoking)
                | (Self::Renewing, Self::Active | Self::Revoking)
                | (Self::Revoking, Self::Terminated)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Renewing => "renewing",
            Self::Revoking => "revoking",
            Self::Terminated => "terminated",
        })
    }
}

/// Everything a run needs besides the job itself.
pub struct RunRequest {
    /// Scopes from innermost to outermost
    pub scopes: ScopeChain,
    /// Secrets to bind, in order
    pub bindings: Vec<SecretBinding>,
    /// Interval of renewal ticks while the job runs
    pub renewal_period: Option<Duration>,
    /// Aborts the job when it completes
    pub cancellation: Option<Cancellation>,
}

impl RunRequest {
    /// Request for a run in the given scopes.
    #[must_use]
    pub const fn new(scopes: ScopeChain) -> Self {
        Self {
            scopes,
            bindings: Vec::new(),
            renewal_period: None,
            cancellation: None,
        }
    }

    /// Secrets to bind before the job starts.
    #[must_use]
    pub fn with_bindings(mut self, bindings: Vec<SecretBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Renew the token every `period` while the job runs.
    #[must_use]
    pub const fn with_renewal_period(mut self, period: Duration) -> Self {
        self.renewal_period = Some(period);
        self
    }

    /// Cancel the job when `signal` completes.
    #[must_use]
    pub fn with_cancellation(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.cancellation = Some(Box::pin(signal));
        self
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("scopes", &self.scopes)
            .field("bindings", &self.bindings)
            .field("renewal_period", &self.renewal_period)
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

/// Primary outcome of a run.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// The job finished successfully
    Completed(T),
    /// The run failed before or while binding secrets
    Failed(VaultError),
    /// The job returned an error
    JobFailed(anyhow::Error),
    /// The cancellation signal fired before the job finished
    Cancelled,
}

/// Result of [`RunLifecycleController::execute`].
#[derive(Debug)]
pub struct RunReport<T> {
    /// Primary outcome
    pub outcome: RunOutcome<T>,
    /// Leases that could not be revoked; never overrides `outcome`
    pub revoke_errors: Vec<VaultError>,
    /// Lease ids a revoke was attempted for, in order
    pub revoke_attempts: Vec<String>,
    /// Final state
    pub state: RunState,
}

impl<T> RunReport<T> {
    /// Whether the job completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed(_))
    }

    /// The job's value, or the error that ended the run.
    ///
    /// # Errors
    ///
    /// Fails for every outcome except [`RunOutcome::Completed`].
    pub fn into_result(self) -> anyhow::Result<T> {
        match self.outcome {
            RunOutcome::Completed(value) => Ok(value),
            RunOutcome::Failed(e) => Err(e.into()),
            RunOutcome::JobFailed(e) => Err(e),
            RunOutcome::Cancelled => Err(anyhow::anyhow!("run cancelled")),
        }
    }
}

/// Drives one run from configuration to lease cleanup.
pub struct RunLifecycleController {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    log: Arc<dyn LogSink>,
    settings: ClientSettings,
    state: RunState,
    scope: String,
    configuration: Option<Configuration>,
    client: Option<AccessClient>,
    leases: Vec<Lease>,
    revoke_attempts: Vec<String>,
    revoke_errors: Vec<VaultError>,
}

impl RunLifecycleController {
    /// Controller in [`RunState::Idle`].
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            transport,
            credentials,
            log,
            settings: ClientSettings::default(),
            state: RunState::Idle,
            scope: String::new(),
            configuration: None,
            client: None,
            leases: Vec::new(),
            revoke_attempts: Vec::new(),
            revoke_errors: Vec::new(),
        }
    }

    /// Use custom client settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Effective configuration, once configured.
    #[must_use]
    pub const fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    /// Access client, once authenticated.
    #[must_use]
    pub const fn client(&self) -> Option<&AccessClient> {
        self.client.as_ref()
    }

    /// Leases acquired so far.
    #[must_use]
    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    /// Lease ids a revoke was attempted for.
    #[must_use]
    pub fn revoke_attempts(&self) -> &[String] {
        &self.revoke_attempts
    }

    /// Revoke failures collected during cleanup.
    #[must_use]
    pub fn revoke_errors(&self) -> &[VaultError] {
        &self.revoke_errors
    }

    fn transition(&mut self, next: RunState) -> VaultResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(VaultError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "Run state changed");
        self.state = next;
        Ok(())
    }

    fn require(&self, expected: RunState) -> VaultResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VaultError::IllegalTransition {
                from: self.state,
                to: expected,
            })
        }
    }

    fn print_stack_trace(&self) -> bool {
        self.configuration
            .as_ref()
            .and_then(Configuration::print_stack_trace)
            .unwrap_or(false)
    }

    fn report_error(&self, err: &VaultError) {
        error!(error = %err, state = %self.state, "Vault run failed");

        let mut message = err.to_string();
        if self.print_stack_trace() {
            let mut source = std::error::Error::source(err);
            while let Some(cause) = source {
                message.push_str("\nCaused by: ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }
        }
        self.log.error(&message);
    }

    /// Resolve the effective configuration from `scopes`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] and terminates the run when no
    /// server URL or credential id is resolvable.
    #[instrument(skip(self, scopes), fields(scope = scopes.innermost_name().unwrap_or_default()))]
    pub fn configure(&mut self, scopes: &ScopeChain) -> VaultResult<()> {
        self.transition(RunState::Configuring)?;
        self.scope = scopes.innermost_name().unwrap_or_default().to_string();

        match validate(scopes.resolve()) {
            Ok(configuration) => {
                debug!(
                    server_url = configuration.server_url().unwrap_or_default(),
                    "Configuration resolved"
                );
                self.configuration = Some(configuration);
                Ok(())
            }
            Err(e) => {
                self.report_error(&e);
                self.transition(RunState::Terminated)?;
                Err(e)
            }
        }
    }

    /// Build the access client and log in with the configured credential.
    ///
    /// # Errors
    ///
    /// Terminates the run and returns the connection, configuration or
    /// authentication error. No read or revoke is attempted afterwards.
    #[instrument(skip(self), fields(scope = %self.scope))]
    pub async fn authenticate(&mut self) -> VaultResult<()> {
        self.transition(RunState::Authenticating)?;

        match self.connect_and_login().await {
            Ok(client) => {
                self.client = Some(client);
                self.transition(RunState::Active)
            }
            Err(e) => {
                self.report_error(&e);
                self.transition(RunState::Terminated)?;
                Err(e)
            }
        }
    }

    async fn connect_and_login(&self) -> VaultResult<AccessClient> {
        let configuration = self
            .configuration
            .as_ref()
            .ok_or_else(|| VaultError::configuration("run was not configured"))?;
        let (Some(address), Some(credential_id)) =
            (configuration.server_url(), configuration.credential_id())
        else {
            return Err(VaultError::configuration("run was not configured"));
        };

        let payload = self.credentials.resolve(credential_id, &self.scope).await?;
        let strategy = payload.into_strategy();

        let options = ConnectOptions::new(address)
            .with_skip_tls_verification(configuration.skip_tls_verification())
            .with_timeout(configuration.timeout().unwrap_or(self.settings.timeout))
            .with_namespace(configuration.namespace().map(str::to_string));

        let mut client =
            AccessClient::init(Arc::clone(&self.transport), options, Arc::clone(&self.log))?
                .with_retry(self.settings.retry.clone());
        client.authenticate(strategy.as_ref()).await?;
        Ok(client)
    }

    /// Read every binding's secret, each distinct path once, in order.
    ///
    /// Bindings whose path or key is missing fall back to their default.
    /// Without one they are fatal when `fail_if_not_found` is set and skipped
    /// with a warning otherwise. A path that cannot be read is fatal when
    /// `fail_if_not_found` is set; otherwise it is logged once and its
    /// bindings take their defaults or are skipped. A fatal error revokes the
    /// leases acquired so far and terminates the run before it is returned.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`VaultError`].
    #[instrument(skip(self, bindings), fields(scope = %self.scope, count = bindings.len()))]
    pub async fn read_bindings(&mut self, bindings: &[SecretBinding]) -> VaultResult<BindingReport> {
        self.require(RunState::Active)?;

        match self.bind_all(bindings).await {
            Ok(report) => {
                info!(
                    bound = report.bound.len(),
                    missing = report.missing.len(),
                    leases = self.leases.len(),
                    "Secrets bound"
                );
                Ok(report)
            }
            Err(e) => {
                self.report_error(&e);
                self.revoke_leases().await?;
                Err(e)
            }
        }
    }

    async fn bind_all(&mut self, bindings: &[SecretBinding]) -> VaultResult<BindingReport> {
        let client = self.client.as_ref().ok_or(VaultError::Unauthenticated)?;
        let configuration = self
            .configuration
            .as_ref()
            .ok_or_else(|| VaultError::configuration("run was not configured"))?;
        let fail_if_not_found = configuration.fail_if_not_found();
        let engine = configuration.engine_version().unwrap_or_default();

        let mut report = BindingReport::default();
        for group in group_by_path(bindings, engine) {
            let mut unreadable = None;
            let secret = match client.read_kv(group.path, group.engine).await {
                Ok(secret) => {
                    if let Some(lease) = &secret.lease {
                        debug!(lease_id = %lease.id, path = group.path, "Lease acquired");
                        self.leases.push(lease.clone());
                    }
                    Some(secret)
                }
                Err(e) if e.is_not_found() => None,
                Err(VaultError::SecretRead { path, cause }) if !fail_if_not_found => {
                    let message = match &cause {
                        RequestFailure::PermissionDenied(_) => {
                            format!("Access denied to Vault Secrets at '{path}'")
                        }
                        other => format!("Could not read Vault secrets at '{path}': {other}"),
                    };
                    warn!(path = %path, error = %cause, "Secret path unreadable");
                    self.log.warn(&message);
                    unreadable = Some(cause.to_string());
                    None
                }
                Err(e) => return Err(e),
            };

            for binding in group.bindings {
                if let Some(value) = secret.as_ref().and_then(|s| s.get(&binding.key)) {
                    report.bound.push(BoundSecret {
                        env_var: binding.env_var.clone(),
                        value: value.clone(),
                        path: binding.path.clone(),
                        key: binding.key.clone(),
                        from_default: false,
                    });
                    continue;
                }

                if let Some(default) = &binding.default_value {
                    report.bound.push(BoundSecret {
                        env_var: binding.env_var.clone(),
                        value: default.clone(),
                        path: binding.path.clone(),
                        key: binding.key.clone(),
                        from_default: true,
                    });
                    continue;
                }

                if let Some(reason) = &unreadable {
                    report.missing.push(MissingBinding {
                        env_var: binding.env_var.clone(),
                        path: binding.path.clone(),
                        key: binding.key.clone(),
                        reason: reason.clone(),
                    });
                    continue;
                }

                let cause = if secret.is_some() {
                    RequestFailure::KeyNotFound(binding.key.clone())
                } else {
                    RequestFailure::NotFound
                };
                if fail_if_not_found {
                    return Err(VaultError::secret_read(&binding.path, cause));
                }

                let message = if secret.is_some() {
                    format!("Vault key '{}' not found at '{}'", binding.key, binding.path)
                } else {
                    format!("Vault credentials not found for '{}'", binding.path)
                };
                warn!(env_var = %binding.env_var, path = %binding.path, "Binding left unset");
                self.log.warn(&message);
                report.missing.push(MissingBinding {
                    env_var: binding.env_var.clone(),
                    path: binding.path.clone(),
                    key: binding.key.clone(),
                    reason: cause.to_string(),
                });
            }
        }

        Ok(report)
    }

    /// Renew the session token when renewal is configured.
    ///
    /// A no-op outside [`RunState::Active`] or without renewal settings.
    /// Failures are logged and never end the run.
    pub async fn renew(&mut self) -> Option<Duration> {
        let hours = self
            .configuration
            .as_ref()
            .and_then(Configuration::renewal_hours)?;
        if self.state != RunState::Active {
            debug!(state = %self.state, "Renewal skipped");
            return None;
        }

        self.transition(RunState::Renewing).ok()?;
        let lease = match self.client.as_mut() {
            Some(client) => client.renew_token(hours).await,
            None => None,
        };
        if let Err(e) = self.transition(RunState::Active) {
            warn!(error = %e, "Could not return to active state after renewal");
        }
        lease
    }

    /// Revoke every recorded lease, one attempt each, and terminate.
    ///
    /// Failures are collected (see [`Self::revoke_errors`]) and summarised in
    /// the run log; they never stop the remaining revokes. A cleanup that was
    /// interrupted resumes with the leases not attempted yet. Calling this
    /// again after termination does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IllegalTransition`] before authentication.
    #[instrument(skip(self), fields(scope = %self.scope, leases = self.leases.len()))]
    pub async fn revoke_leases(&mut self) -> VaultResult<()> {
        if self.state == RunState::Terminated {
            return Ok(());
        }
        if self.state != RunState::Revoking {
            self.transition(RunState::Revoking)?;
        }

        let mut failed = Vec::new();
        if let Some(client) = self.client.as_ref() {
            for lease in &self.leases {
                if self.revoke_attempts.contains(&lease.id) {
                    continue;
                }
                self.revoke_attempts.push(lease.id.clone());
                if let Err(e) = client.revoke_lease(&lease.id).await {
                    warn!(lease_id = %lease.id, error = %e, "Lease revoke failed");
                    failed.push(e);
                }
            }
        }

        if !failed.is_empty() {
            for e in &failed {
                self.log.error(&e.to_string());
            }
            self.log.warn(&format!(
                "{} of {} vault leases could not be revoked",
                failed.len(),
                self.leases.len()
            ));
        }
        self.revoke_errors.extend(failed);

        debug!(attempts = self.revoke_attempts.len(), "Leases revoked");
        self.transition(RunState::Terminated)
    }

    /// Run `job` with bound secrets, guaranteeing lease cleanup.
    ///
    /// Configures, authenticates, renews once when renewal is enabled, binds
    /// the requested secrets and runs the job. While the job runs the token
    /// is renewed on every `renewal_period` tick. The cancellation signal is
    /// watched from the start; once it fires nothing new is started and the
    /// run goes straight to cleanup. A panicking job is reported as
    /// [`RunOutcome::JobFailed`]. Leases are revoked on every exit.
    pub async fn execute<T, F, Fut>(&mut self, request: RunRequest, job: F) -> RunReport<T>
    where
        F: FnOnce(BindingReport) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let RunRequest {
            scopes,
            bindings,
            renewal_period,
            mut cancellation,
        } = request;

        let prepared = tokio::select! {
            biased;
            () = cancelled(&mut cancellation) => None,
            result = self.prepare(&scopes, &bindings) => Some(result),
        };

        let outcome = match prepared {
            Some(Ok(report)) => {
                self.run_job(job, report, renewal_period, &mut cancellation)
                    .await
            }
            Some(Err(e)) => RunOutcome::Failed(e),
            None => {
                info!(state = %self.state, "Run cancelled before the job started");
                RunOutcome::Cancelled
            }
        };

        self.finish().await;

        RunReport {
            outcome,
            revoke_errors: std::mem::take(&mut self.revoke_errors),
            revoke_attempts: self.revoke_attempts.clone(),
            state: self.state,
        }
    }

    async fn prepare(
        &mut self,
        scopes: &ScopeChain,
        bindings: &[SecretBinding],
    ) -> VaultResult<BindingReport> {
        self.configure(scopes)?;
        self.authenticate().await?;
        self.renew().await;
        self.read_bindings(bindings).await
    }

    async fn run_job<T, F, Fut>(
        &mut self,
        job: F,
        bound: BindingReport,
        renewal_period: Option<Duration>,
        cancellation: &mut Option<Cancellation>,
    ) -> RunOutcome<T>
    where
        F: FnOnce(BindingReport) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let renewing = self
            .configuration
            .as_ref()
            .and_then(Configuration::renewal_hours)
            .is_some();
        let mut ticker = renewal_period.filter(|p| renewing && !p.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let job = AssertUnwindSafe(async move { job(bound).await }).catch_unwind();
        tokio::pin!(job);
        loop {
            tokio::select! {
                biased;
                () = cancelled(cancellation) => {
                    info!("Run cancelled");
                    return RunOutcome::Cancelled;
                }
                result = &mut job => {
                    return match result {
                        Ok(Ok(value)) => RunOutcome::Completed(value),
                        Ok(Err(e)) => {
                            warn!(error = %e, "Run job failed");
                            RunOutcome::JobFailed(e)
                        }
                        Err(panic) => {
                            let message = panic_message(&*panic);
                            error!(panic = message, "Run job panicked");
                            RunOutcome::JobFailed(anyhow::anyhow!("run job panicked: {message}"))
                        }
                    };
                }
                () = tick(&mut ticker) => {
                    tokio::select! {
                        biased;
                        () = cancelled(cancellation) => {
                            info!("Run cancelled during renewal");
                            return RunOutcome::Cancelled;
                        }
                        _ = self.renew() => {}
                    }
                }
            }
        }
    }

    async fn finish(&mut self) {
        match self.state {
            RunState::Terminated => {}
            // nothing can be leased before the run is active
            RunState::Idle | RunState::Configuring | RunState::Authenticating => {
                if let Err(e) = self.transition(RunState::Terminated) {
                    warn!(error = %e, "Could not terminate run");
                }
            }
            RunState::Active | RunState::Renewing | RunState::Revoking => {
                if let Err(e) = self.revoke_leases().await {
                    warn!(error = %e, "Cleanup skipped");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn validate(resolved: Option<Configuration>) -> VaultResult<Configuration> {
    let configuration = resolved
        .ok_or_else(|| VaultError::configuration("no Vault configuration found in any scope"))?;
    if configuration
        .server_url()
        .is_none_or(|url| url.trim().is_empty())
    {
        return Err(VaultError::configuration(
            "no Vault server URL resolvable through the scope chain",
        ));
    }
    if configuration
        .credential_id()
        .is_none_or(|id| id.trim().is_empty())
    {
        return Err(VaultError::configuration(
            "no Vault credential resolvable through the scope chain",
        ));
    }
    Ok(configuration)
}

async fn cancelled(signal: &mut Option<Cancellation>) {
    match signal {
        Some(signal) => signal.await,
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
