//! Registration lifecycle with the server directory.
//!
//! States move `Unregistered -> Registering -> Registered`, with `Updating`
//! and `Deregistering` as the in-flight states of the other two exchanges.
//! At most one exchange is in flight per controller: any operation requested
//! while one is pending is rejected with [`RegistrationError::Busy`] and never
//! queued.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::watch;
use shared::types::{
    Credentials, FormFields, RegistrationState, ServerRecord, ServerStatus, StatusReport,
};
use crate::directory::{DirectoryClient, Endpoint};
use crate::error::RegistrationError;
use crate::scheduler::{RepeatingTask, ScheduleHandle, Scheduler};

/// Policy knobs consumed by the controller.
#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    /// After a failed `add`, try one `update` in case the directory already knows us
    pub retry_registration_as_update_on_fail: bool,
    pub update_server_periodically: bool,
    pub update_server_period: Duration,
    pub register_on_start: bool,
    pub deregister_on_stop: bool,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            retry_registration_as_update_on_fail: true,
            update_server_periodically: true,
            update_server_period: Duration::from_secs(300),
            register_on_start: true,
            deregister_on_stop: true,
        }
    }
}

struct Inner {
    state: RegistrationState,
    record: ServerRecord,
    schedule: Option<ScheduleHandle>,
    registered_at: Option<chrono::DateTime<Utc>>,
    last_refresh_at: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
}

impl Inner {
    fn report(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            record: self.record.clone(),
            refresh_armed: self.schedule.as_ref().is_some_and(|h| !h.is_cancelled()),
            registered_at: self.registered_at,
            last_refresh_at: self.last_refresh_at,
            last_error: self.last_error.clone(),
        }
    }

    fn cancel_schedule(&mut self) -> bool {
        match self.schedule.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// An exchange that passed the busy guard.
struct Begun {
    prior: RegistrationState,
    fields: FormFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Caller,
    Periodic,
}

pub struct RegistrationController {
    client: Arc<dyn DirectoryClient>,
    scheduler: Arc<dyn Scheduler>,
    credentials: Credentials,
    settings: RegistrationSettings,
    inner: Mutex<Inner>,
    report_tx: watch::Sender<StatusReport>,
    weak_self: Weak<Self>,
}

impl RegistrationController {
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        scheduler: Arc<dyn Scheduler>,
        credentials: Credentials,
        record: ServerRecord,
        settings: RegistrationSettings,
    ) -> Arc<Self> {
        let inner = Inner {
            state: RegistrationState::Unregistered,
            record,
            schedule: None,
            registered_at: None,
            last_refresh_at: None,
            last_error: None,
        };
        let (report_tx, _) = watch::channel(inner.report());

        Arc::new_cyclic(|weak_self| Self {
            client,
            scheduler,
            credentials,
            settings,
            inner: Mutex::new(inner),
            report_tx,
            weak_self: weak_self.clone(),
        })
    }

    /// Watch the published status. A new snapshot is sent on every transition.
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.report_tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn report(&self) -> StatusReport {
        self.report_tx.borrow().clone()
    }

    pub fn state(&self) -> RegistrationState {
        self.report_tx.borrow().state
    }

    pub fn settings(&self) -> &RegistrationSettings {
        &self.settings
    }

    /// Lifecycle hook for the embedding application's startup.
    pub async fn on_start(&self) -> Result<(), RegistrationError> {
        if !self.settings.register_on_start {
            tracing::debug!("register_on_start disabled; waiting for an explicit register");
            return Ok(());
        }
        self.register().await
    }

    /// Lifecycle hook for the embedding application's shutdown.
    pub async fn on_stop(&self) -> Result<(), RegistrationError> {
        self.cancel_schedule();

        if self.settings.deregister_on_stop && self.state() == RegistrationState::Registered {
            return self.deregister().await;
        }
        Ok(())
    }

    /// Announce the server with a full `add` exchange.
    pub async fn register(&self) -> Result<(), RegistrationError> {
        let begun = self
            .begin(Endpoint::Add, false)
            .inspect_err(|e| tracing::warn!("Ignoring register request: {}", e))?;

        match self.client.send(Endpoint::Add, begun.fields).await {
            Ok(status) => {
                let mut inner = self.lock();
                inner.state = RegistrationState::Registered;
                inner.registered_at = Some(Utc::now());
                inner.last_error = None;
                self.arm_refresh(&mut inner);
                self.publish(&inner);

                tracing::info!(
                    "Registered server {} on port {} (status {})",
                    inner.record.uuid,
                    inner.record.port,
                    status
                );
                Ok(())
            }
            Err(failure) => {
                tracing::warn!("Registration failed: {}", failure);

                let fallback = {
                    let mut inner = self.lock();
                    inner.state = RegistrationState::Unregistered;
                    inner.last_error = Some(failure.to_string());
                    self.publish(&inner);

                    // Go straight to Updating so nothing can slip in before the fallback
                    if self.settings.retry_registration_as_update_on_fail {
                        inner.state = RegistrationState::Updating;
                        self.publish(&inner);
                        Some(inner.record.update_fields(&self.credentials))
                    } else {
                        None
                    }
                };

                match fallback {
                    Some(fields) => {
                        tracing::info!("Retrying registration as an update");
                        self.finish_update(RegistrationState::Unregistered, fields, Trigger::Caller)
                            .await
                    }
                    None => Err(RegistrationError::Transport {
                        endpoint: Endpoint::Add,
                        failure,
                    }),
                }
            }
        }
    }

    /// Refresh the mutable fields of an existing registration.
    pub async fn update(&self) -> Result<(), RegistrationError> {
        self.run_update(Trigger::Caller).await
    }

    /// Remove the server from the directory.
    pub async fn deregister(&self) -> Result<(), RegistrationError> {
        self.remove(None).await
    }

    /// Send a `remove`. On success the port moves to `relocate_to`, committed
    /// under the same lock that returns the controller to `Unregistered`.
    async fn remove(&self, relocate_to: Option<u16>) -> Result<(), RegistrationError> {
        let begun = self
            .begin(Endpoint::Remove, false)
            .inspect_err(|e| tracing::warn!("Ignoring deregister request: {}", e))?;

        match self.client.send(Endpoint::Remove, begun.fields).await {
            Ok(status) => {
                let mut inner = self.lock();
                inner.state = RegistrationState::Unregistered;
                inner.registered_at = None;
                inner.last_error = None;
                inner.cancel_schedule();
                if let Some(port) = relocate_to {
                    tracing::info!("Changing server port {} -> {}", inner.record.port, port);
                    inner.record.port = port;
                }
                self.publish(&inner);

                tracing::info!("Deregistered server {} (status {})", inner.record.uuid, status);
                Ok(())
            }
            Err(failure) => {
                tracing::warn!("Deregistration failed: {}", failure);

                let mut inner = self.lock();
                inner.state = begun.prior;
                inner.last_error = Some(failure.to_string());
                self.publish(&inner);

                Err(RegistrationError::Transport {
                    endpoint: Endpoint::Remove,
                    failure,
                })
            }
        }
    }

    /// Stop the periodic refresh. Safe to call when nothing is armed.
    pub fn cancel_schedule(&self) {
        let mut inner = self.lock();
        if inner.cancel_schedule() {
            tracing::debug!("Periodic refresh cancelled");
            self.publish(&inner);
        }
    }

    /// Edit the mutable part of the record. Nothing is sent until the next update.
    pub fn edit_status(&self, edit: impl FnOnce(&mut ServerStatus)) -> StatusReport {
        let mut inner = self.lock();
        edit(&mut inner.record.status);
        self.publish(&inner);
        inner.report()
    }

    /// Move the server to a new port.
    ///
    /// The directory keys entries on address+port, so a registered server is
    /// removed and re-added rather than updated.
    pub async fn change_port(&self, port: u16) -> Result<(), RegistrationError> {
        {
            let mut inner = self.lock();
            if !inner.state.is_quiescent() {
                tracing::warn!("Ignoring port change: {}", RegistrationError::Busy);
                return Err(RegistrationError::Busy);
            }
            if inner.record.port == port {
                return Ok(());
            }
            if inner.state == RegistrationState::Unregistered {
                tracing::info!("Changing server port {} -> {}", inner.record.port, port);
                inner.record.port = port;
                self.publish(&inner);
                return Ok(());
            }
        }

        self.remove(Some(port)).await?;
        self.register().await
    }

    async fn run_update(&self, trigger: Trigger) -> Result<(), RegistrationError> {
        let begun = match self.begin(Endpoint::Update, true) {
            Ok(begun) => begun,
            Err(e) => {
                match (&e, trigger) {
                    (RegistrationError::Busy, Trigger::Caller) => {
                        tracing::warn!("Ignoring update request: {}", e)
                    }
                    _ => tracing::debug!("Skipping update: {}", e),
                }
                return Err(e);
            }
        };

        self.finish_update(begun.prior, begun.fields, trigger).await
    }

    /// Send an update whose state has already been moved to `Updating`.
    /// `prior` is where a failure rolls back to.
    async fn finish_update(
        &self,
        prior: RegistrationState,
        fields: FormFields,
        trigger: Trigger,
    ) -> Result<(), RegistrationError> {
        match self.client.send(Endpoint::Update, fields).await {
            Ok(status) => {
                let mut inner = self.lock();
                let now = Utc::now();
                inner.state = RegistrationState::Registered;
                inner.last_refresh_at = Some(now);
                inner.last_error = None;
                if prior == RegistrationState::Unregistered {
                    // Override path: the directory already had us
                    inner.registered_at = Some(now);
                    self.arm_refresh(&mut inner);
                }
                self.publish(&inner);

                match trigger {
                    Trigger::Caller => tracing::info!("Updated server {} (status {})", inner.record.uuid, status),
                    Trigger::Periodic => tracing::debug!("Periodic refresh of {} done (status {})", inner.record.uuid, status),
                }
                Ok(())
            }
            Err(failure) => {
                tracing::warn!("Update failed: {}", failure);

                let mut inner = self.lock();
                inner.state = prior;
                inner.last_error = Some(failure.to_string());
                self.publish(&inner);

                Err(RegistrationError::Transport {
                    endpoint: Endpoint::Update,
                    failure,
                })
            }
        }
    }

    /// Busy guard: check-and-set of the in-flight state under one lock.
    fn begin(&self, endpoint: Endpoint, require_registered: bool) -> Result<Begun, RegistrationError> {
        let mut inner = self.lock();
        let prior = inner.state;

        if !prior.is_quiescent() {
            return Err(RegistrationError::Busy);
        }
        if require_registered && prior != RegistrationState::Registered {
            return Err(RegistrationError::NotRegistered);
        }

        let (state, fields) = match endpoint {
            Endpoint::Add => (
                RegistrationState::Registering,
                inner.record.add_fields(&self.credentials),
            ),
            Endpoint::Update => (
                RegistrationState::Updating,
                inner.record.update_fields(&self.credentials),
            ),
            Endpoint::Remove => (
                RegistrationState::Deregistering,
                inner.record.remove_fields(&self.credentials),
            ),
        };
        inner.state = state;
        self.publish(&inner);

        Ok(Begun { prior, fields })
    }

    fn arm_refresh(&self, inner: &mut Inner) {
        if !self.settings.update_server_periodically {
            return;
        }
        if inner.schedule.as_ref().is_some_and(|h| !h.is_cancelled()) {
            return;
        }

        let period = self.settings.update_server_period;
        if period.is_zero() {
            tracing::warn!("Periodic refresh enabled with a zero period; not arming");
            return;
        }

        let weak = self.weak_self.clone();
        let task: RepeatingTask = Arc::new(move || -> BoxFuture<'static, ControlFlow<()>> {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(controller) => {
                        let _ = controller.run_update(Trigger::Periodic).await;
                        ControlFlow::Continue(())
                    }
                    // Controller is gone; end the schedule
                    None => ControlFlow::Break(()),
                }
            })
        });

        inner.schedule = Some(self.scheduler.schedule_repeating(period, period, task));
        tracing::info!("Periodic refresh armed every {:?}", period);
    }

    fn publish(&self, inner: &Inner) {
        self.report_tx.send_replace(inner.report());
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
