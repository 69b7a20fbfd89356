//! CRUD orchestrator
//!
//! One call to [`Orchestrator::reconcile`] runs one reconciliation cycle for
//! one resource:
//!
//! ```text
//!  refresh (Read by stored ID)
//!     │
//!     ├─ absent  + desired ──► Create ─► poll until ready ─► persist
//!     ├─ present + changes ──► Update per group ─► poll ─► Read ─► persist
//!     ├─ present + replace ──► Delete ─► poll absent ─► Create ─► ...
//!     ├─ present + no desired ► Delete step(s) ─► poll absent ─► drop state
//!     └─ otherwise ──────────► no-op
//! ```
//!
//! Calls within a cycle are strictly sequential. The orchestrator holds no
//! lock: callers must not reconcile the same address concurrently.

use crate::definition::{DeleteWait, ResourceDefinition, UpdateStyle};
use crate::diff::{ChangeSet, Drift, detect_drift, diff, diff_map};
use crate::error::{EngineError, Phase, RemoteError, Result};
use crate::mapper::{from_response, plain_json, to_request, to_request_subset};
use crate::plan::{Action, ActionType};
use crate::poll::{PollDecision, Poller, StatusWait};
use crate::remote::{RemoteApi, RemoteCall, RequestPayload, ResponsePayload};
use crate::retry::{BackoffPolicy, RetryExecutor};
use crate::state::{Lifecycle, ObservedState, ResourceAddress, StateStore};
use crate::value::{Attributes, DesiredConfig, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Non-fatal findings of a reconciliation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    /// An immutable attribute changed out-of-band
    Drift(Drift),
    /// The stored remote ID no longer exists
    Vanished { id: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Drift(drift) => write!(f, "drift: {}", drift),
            Warning::Vanished { id } => {
                write!(f, "{} no longer exists remotely; dropped from state", id)
            }
        }
    }
}

/// Result of one reconciliation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub address: ResourceAddress,
    pub action: ActionType,
    /// `Stable` or `Absent`
    pub lifecycle: Lifecycle,
    pub observed: Option<ObservedState>,
    pub changes: ChangeSet,
    /// Remote actions issued, in order (retries not repeated)
    pub calls: Vec<String>,
    pub warnings: Vec<Warning>,
    pub duration_ms: u64,
}

/// Drives resources toward their desired configuration
pub struct Orchestrator<R, S> {
    remote: Arc<R>,
    store: Arc<S>,
    backoff: BackoffPolicy,
    poll_interval: Duration,
    owner: Option<String>,
}

impl<R, S> Clone for Orchestrator<R, S> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            store: Arc::clone(&self.store),
            backoff: self.backoff.clone(),
            poll_interval: self.poll_interval,
            owner: self.owner.clone(),
        }
    }
}

impl<R: RemoteApi, S: StateStore> Orchestrator<R, S> {
    pub fn new(remote: Arc<R>, store: Arc<S>) -> Self {
        Self {
            remote,
            store,
            backoff: BackoffPolicy::default(),
            poll_interval: Duration::from_secs(1),
            owner: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Recorded as the owner of every state this orchestrator persists
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one reconciliation cycle for `address`
    ///
    /// `desired = None` means the resource should not exist. Errors carry the
    /// phase and last remote action; the stored state is left at its last
    /// successfully persisted value (or at what a final Read reported).
    pub async fn reconcile(
        &self,
        definition: &ResourceDefinition,
        address: &ResourceAddress,
        desired: Option<&DesiredConfig>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        if let Some(config) = desired {
            definition.schema.validate_config(config)?;
        }

        let start = Instant::now();
        let mut cycle = Cycle::new(self, definition, address, cancel);

        match cycle.run(desired).await {
            Ok(mut outcome) => {
                outcome.duration_ms = elapsed_ms(start);
                tracing::info!(
                    "{} {} in {}ms ({} call(s))",
                    address,
                    outcome.action,
                    outcome.duration_ms,
                    outcome.calls.len()
                );
                Ok(outcome)
            }
            Err(e) if e.is_cancelled() => {
                cycle.settle_after_cancel().await;
                tracing::warn!("{} cancelled during {}", address, cycle.phase);
                Err(EngineError::Cancelled {
                    address: address.to_string(),
                    phase: cycle.phase,
                })
            }
            Err(e) => {
                tracing::error!("{} failed during {}: {}", address, cycle.phase, e);
                Err(e.in_phase(address.to_string(), cycle.phase, cycle.last_call.as_deref()))
            }
        }
    }

    /// Refresh and diff without changing anything, remote or local
    pub async fn plan(
        &self,
        definition: &ResourceDefinition,
        address: &ResourceAddress,
        desired: Option<&DesiredConfig>,
    ) -> Result<Action> {
        if let Some(config) = desired {
            definition.schema.validate_config(config)?;
        }

        let cancel = CancellationToken::new();
        let mut cycle = Cycle::new(self, definition, address, &cancel);
        let prior = self.store.load(address).await?;

        let current = match &prior {
            Some(state) => cycle
                .observe(state, desired)
                .await
                .map_err(|e| e.in_phase(address.to_string(), Phase::Refresh, Some(definition.read.as_str())))?,
            None => None,
        };

        let (action_type, changes) = decide(current.as_ref(), desired, definition);
        Ok(Action {
            address: address.clone(),
            action_type,
            remote_id: prior.filter(|_| current.is_some()).map(|s| s.id),
            changes,
            warnings: cycle.warnings.iter().map(Warning::to_string).collect(),
        })
    }

    /// Adopt an existing remote resource by ID
    pub async fn import(
        &self,
        definition: &ResourceDefinition,
        address: &ResourceAddress,
        remote_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        if let Some(existing) = self.store.load(address).await? {
            return Err(EngineError::InvalidConfig(format!(
                "{} is already managed (id {})",
                address, existing.id
            )));
        }

        let mut cycle = Cycle::new(self, definition, address, cancel);
        cycle.phase = Phase::Import;

        let fail = |e: EngineError| e.in_phase(address.to_string(), Phase::Import, Some(definition.read.as_str()));
        let payload = cycle.read(remote_id).await.map_err(fail)?.ok_or_else(|| {
            fail(EngineError::Remote(RemoteError::not_found(format!(
                "{} {} does not exist",
                definition.type_name(),
                remote_id
            ))))
        })?;

        let attributes = from_response(&payload, &definition.schema, None).map_err(fail)?;
        let state = ObservedState::new(remote_id, definition.type_name(), attributes)
            .with_owner(self.owner.clone());
        self.store.save(address, &state).await?;

        tracing::info!("Imported {} as {}", remote_id, address);
        Ok(state)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Choose the action for a refreshed resource
fn decide(
    current: Option<&Attributes>,
    desired: Option<&DesiredConfig>,
    definition: &ResourceDefinition,
) -> (ActionType, ChangeSet) {
    match (current, desired) {
        (None, None) => (ActionType::NoOp, ChangeSet::default()),
        (None, Some(d)) => (ActionType::Create, diff(d, &Attributes::new(), &definition.schema)),
        (Some(_), None) => (ActionType::Delete, ChangeSet::default()),
        (Some(observed), Some(d)) => {
            let changes = diff(d, observed, &definition.schema);
            let action_type = if changes.is_empty() {
                ActionType::NoOp
            } else if changes.requires_replace {
                ActionType::Replace
            } else {
                ActionType::Update
            };
            (action_type, changes)
        }
    }
}

/// State of one reconciliation cycle
struct Cycle<'a, R, S> {
    orchestrator: &'a Orchestrator<R, S>,
    definition: &'a ResourceDefinition,
    address: &'a ResourceAddress,
    retry: RetryExecutor,
    poller: Poller,
    cancel: CancellationToken,
    phase: Phase,
    lifecycle: Lifecycle,
    calls: Vec<String>,
    last_call: Option<String>,
    warnings: Vec<Warning>,
    /// A mutating call was issued during this cycle
    mutated: bool,
    /// Deleting and creating as halves of one replacement
    replacing: bool,
    /// Resource the cycle is currently acting on
    target: Option<ObservedState>,
    target_id: Option<String>,
}

impl<'a, R: RemoteApi, S: StateStore> Cycle<'a, R, S> {
    fn new(
        orchestrator: &'a Orchestrator<R, S>,
        definition: &'a ResourceDefinition,
        address: &'a ResourceAddress,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            definition,
            address,
            retry: RetryExecutor::new(orchestrator.backoff.clone()).with_cancellation(cancel.clone()),
            poller: Poller::new(orchestrator.poll_interval).with_cancellation(cancel.clone()),
            cancel: cancel.clone(),
            phase: Phase::Refresh,
            lifecycle: Lifecycle::Stable,
            calls: Vec::new(),
            last_call: None,
            warnings: Vec::new(),
            mutated: false,
            replacing: false,
            target: None,
            target_id: None,
        }
    }

    fn store(&self) -> &S {
        &self.orchestrator.store
    }

    async fn run(&mut self, desired: Option<&DesiredConfig>) -> Result<ReconcileOutcome> {
        let prior = self.store().load(self.address).await?;

        let current = match prior {
            Some(state) => match self.refresh(state, desired).await? {
                Some(fresh) => Some(self.resume(fresh, desired).await?),
                None => None,
            },
            None => None,
        };

        let (mut action, changes) =
            decide(current.as_ref().map(|s| &s.attributes), desired, self.definition);
        // a half-finished delete is finished before anything else
        if desired.is_some()
            && current
                .as_ref()
                .is_some_and(|s| self.delete_in_progress(s, desired))
        {
            action = ActionType::Replace;
        }

        let observed = match (action, current, desired) {
            (ActionType::Create, None, Some(d)) => Some(self.create(d).await?),
            (ActionType::Update, Some(state), Some(d)) => Some(self.update(state, d, &changes).await?),
            (ActionType::Replace, Some(state), Some(d)) => {
                let reasons = changes.replace_reasons();
                if reasons.is_empty() {
                    tracing::info!("{} finishing an interrupted delete", self.address);
                } else {
                    tracing::info!("{} must be replaced: {}", self.address, reasons.join(", "));
                }
                self.replacing = true;
                self.delete(state).await?;
                Some(self.create(d).await?)
            }
            (ActionType::Delete, Some(state), None) => {
                self.delete(state).await?;
                None
            }
            (_, current, _) => current,
        };

        Ok(ReconcileOutcome {
            address: self.address.clone(),
            action,
            lifecycle: if observed.is_some() {
                Lifecycle::Stable
            } else {
                Lifecycle::Absent
            },
            observed,
            changes,
            calls: std::mem::take(&mut self.calls),
            warnings: std::mem::take(&mut self.warnings),
            duration_ms: 0,
        })
    }

    /// Read the stored resource and persist what the remote reports
    async fn refresh(
        &mut self,
        state: ObservedState,
        desired: Option<&DesiredConfig>,
    ) -> Result<Option<ObservedState>> {
        self.phase = Phase::Refresh;
        match self.observe(&state, desired).await? {
            Some(attributes) => {
                let lifecycle = state.lifecycle;
                let fresh = state.refreshed(attributes, lifecycle);
                self.store().save(self.address, &fresh).await?;
                Ok(Some(fresh))
            }
            None => {
                self.store().delete(self.address).await?;
                Ok(None)
            }
        }
    }

    /// Pick up where an interrupted cycle left the resource
    ///
    /// `Creating` and `Reconciling` resources are polled until ready. A
    /// `Replacing` resource that already matches the desired config is the
    /// new half and is polled too; the old half is left for the delete path.
    async fn resume(
        &mut self,
        state: ObservedState,
        desired: Option<&DesiredConfig>,
    ) -> Result<ObservedState> {
        let pending_create = match state.lifecycle {
            Lifecycle::Creating | Lifecycle::Reconciling => true,
            Lifecycle::Replacing => !self.delete_in_progress(&state, desired),
            Lifecycle::Stable | Lifecycle::Absent | Lifecycle::Deleting => false,
        };
        if !pending_create {
            return Ok(state);
        }

        tracing::info!(
            "{} ({}) was left {}; waiting for it to settle",
            self.address,
            state.id,
            state.lifecycle
        );
        self.phase = Phase::Poll;
        self.lifecycle = state.lifecycle;
        self.target_id = Some(state.id.clone());
        self.target = Some(state.clone());

        let payload = self.wait_until_ready(&state.id).await?;
        let attributes = from_response(&payload, &self.definition.schema, Some(&state.attributes))?;
        let fresh = state.refreshed(attributes, Lifecycle::Stable);
        self.store().save(self.address, &fresh).await?;
        self.lifecycle = Lifecycle::Stable;
        self.target = None;
        self.target_id = None;
        Ok(fresh)
    }

    /// The stored resource is the old half of a delete that was interrupted
    fn delete_in_progress(&self, state: &ObservedState, desired: Option<&DesiredConfig>) -> bool {
        match state.lifecycle {
            Lifecycle::Deleting => true,
            Lifecycle::Replacing => match desired {
                Some(d) => diff(d, &state.attributes, &self.definition.schema).requires_replace,
                None => true,
            },
            _ => false,
        }
    }

    /// First delete step to run for `state`, and whether that step's call was
    /// already issued so only its wait remains
    fn delete_resume_point(&self, state: &ObservedState) -> (usize, bool) {
        if !matches!(state.lifecycle, Lifecycle::Deleting | Lifecycle::Replacing) {
            return (0, false);
        }
        let status = self
            .definition
            .status
            .as_ref()
            .and_then(|s| state.attributes.get(&s.attribute))
            .and_then(Value::as_str);
        let Some(status) = status else {
            return (0, false);
        };

        let mut point = (0, false);
        for (i, step) in self.definition.delete.iter().enumerate() {
            if let DeleteWait::Status(wait) = &step.wait {
                if wait.target.iter().any(|t| t == status) {
                    point = (i + 1, false);
                } else if wait.pending.iter().any(|p| p == status) {
                    point = (i, true);
                }
            }
        }
        point
    }

    /// Read by stored ID, recording drift and disappearance as warnings
    async fn observe(
        &mut self,
        state: &ObservedState,
        desired: Option<&DesiredConfig>,
    ) -> Result<Option<Attributes>> {
        let definition = self.definition;
        let schema = &definition.schema;
        let Some(payload) = self.read(&state.id).await? else {
            tracing::warn!("{} ({}) no longer exists remotely", self.address, state.id);
            self.warnings.push(Warning::Vanished {
                id: state.id.clone(),
            });
            return Ok(None);
        };

        let attributes = from_response(&payload, schema, Some(&state.attributes))?;
        for drift in detect_drift(&state.attributes, &attributes, desired, schema) {
            tracing::warn!("{}: {}", self.address, drift);
            self.warnings.push(Warning::Drift(drift));
        }
        Ok(Some(attributes))
    }

    fn id_payload(&self, id: &str) -> RequestPayload {
        let mut payload = RequestPayload::new();
        payload.insert(self.definition.id_field.clone(), serde_json::Value::String(id.to_string()));
        payload
    }

    /// Issue one remote call through the retry executor
    async fn invoke(&mut self, call: RemoteCall, timeout: Duration) -> Result<ResponsePayload> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }

        self.calls.push(call.action.clone());
        self.last_call = Some(call.action.clone());
        if call.action != self.definition.read {
            self.mutated = true;
        }

        let started = Instant::now();
        let remote = &*self.orchestrator.remote;
        let call_ref = &call;
        let result = self.retry.execute(timeout, || remote.invoke(call_ref)).await;
        tracing::debug!(
            "{} {} took {:?}",
            self.address,
            call.action,
            started.elapsed()
        );
        result
    }

    /// Read by ID; `None` when the remote reports it absent
    async fn read(&mut self, id: &str) -> Result<Option<ResponsePayload>> {
        let call = RemoteCall::new(self.definition.read.clone(), self.id_payload(id));
        match self.invoke(call, self.definition.timeouts.read).await {
            Ok(payload) => Ok(Some(payload)),
            Err(EngineError::Remote(e)) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Poll reads until `decide` is satisfied. Absence is passed as `None`.
    async fn poll<D>(&mut self, id: &str, mut decide: D) -> Result<Option<ResponsePayload>>
    where
        D: FnMut(Option<&ResponsePayload>) -> PollDecision<()>,
    {
        let previous_phase = self.phase;
        self.phase = Phase::Poll;
        if self.cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }

        let call = RemoteCall::new(self.definition.read.clone(), self.id_payload(id));
        let remote = &*self.orchestrator.remote;
        let call_ref = &call;
        let mut reads: usize = 0;
        let started = Instant::now();

        let result = self
            .poller
            .poll_until(
                self.definition.timeouts.poll,
                || {
                    reads += 1;
                    async move {
                        match remote.invoke(call_ref).await {
                            Ok(payload) => Ok(Some(payload)),
                            Err(e) if e.is_not_found() => Ok(None),
                            Err(e) => Err(e),
                        }
                    }
                },
                |observed: Option<ResponsePayload>| match decide(observed.as_ref()) {
                    PollDecision::Ready(()) => PollDecision::Ready(observed),
                    PollDecision::Pending(reason) => PollDecision::Pending(reason),
                    PollDecision::Failed(reason) => PollDecision::Failed(reason),
                },
            )
            .await;

        self.calls
            .extend(std::iter::repeat_n(call.action.clone(), reads));
        self.last_call = Some(call.action);
        tracing::debug!(
            "{} polled {} time(s) in {:?}",
            self.address,
            reads,
            started.elapsed()
        );

        if result.is_ok() {
            self.phase = previous_phase;
        }
        result
    }

    /// Wait for the status attribute to settle. With `absent_ok`, a
    /// disappeared resource also ends the wait.
    async fn wait_for_status(
        &mut self,
        id: &str,
        wait: &StatusWait,
        absent_ok: bool,
    ) -> Result<Option<ResponsePayload>> {
        let definition = self.definition;
        let status_wire = definition.status.as_ref().map(|s| {
            definition
                .schema
                .get(&s.attribute)
                .map_or(s.attribute.clone(), |attr| {
                    attr.wire_name_or(&s.attribute).to_string()
                })
        });

        self.poll(id, |observed| match observed {
            None if absent_ok => PollDecision::Ready(()),
            None => PollDecision::Pending("not visible yet".to_string()),
            Some(payload) => wait.decide(
                status_wire
                    .as_deref()
                    .and_then(|w| payload.get(w))
                    .and_then(serde_json::Value::as_str),
            ),
        })
        .await
    }

    /// Wait until the resource can be read, and is ready if it has a status
    async fn wait_until_ready(&mut self, id: &str) -> Result<ResponsePayload> {
        let payload = match self.definition.status.clone() {
            Some(status) => self.wait_for_status(id, &status.wait, false).await?,
            None => {
                self.poll(id, |observed| match observed {
                    Some(_) => PollDecision::Ready(()),
                    None => PollDecision::Pending("not visible yet".to_string()),
                })
                .await?
            }
        };

        payload.ok_or_else(|| {
            EngineError::Remote(RemoteError::fatal(format!("{} disappeared while polling", id)))
        })
    }

    async fn wait_until_absent(&mut self, id: &str) -> Result<()> {
        self.poll(id, |observed| match observed {
            None => PollDecision::Ready(()),
            Some(_) => PollDecision::Pending("still present".to_string()),
        })
        .await
        .map(|_| ())
    }

    async fn create(&mut self, desired: &DesiredConfig) -> Result<ObservedState> {
        self.phase = Phase::Create;
        self.lifecycle = if self.replacing {
            Lifecycle::Replacing
        } else {
            Lifecycle::Creating
        };
        self.target = None;
        self.target_id = None;

        let definition = self.definition;
        let payload = to_request(desired, &definition.schema);
        let call = RemoteCall::non_idempotent(definition.create.clone(), payload);
        let response = self.invoke(call, definition.timeouts.create).await?;

        let id = match response.get(&definition.id_field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(EngineError::Mapping(format!(
                    "{} response has no '{}'",
                    definition.create, definition.id_field
                )));
            }
        };
        tracing::info!("{} created as {}", self.address, id);
        self.target_id = Some(id.clone());

        let payload = self.wait_until_ready(&id).await?;
        let attributes = from_response(&payload, &definition.schema, None)?;
        let state = ObservedState::new(id, definition.type_name(), attributes)
            .with_owner(self.orchestrator.owner.clone());

        self.store().save(self.address, &state).await?;
        self.lifecycle = Lifecycle::Stable;
        Ok(state)
    }

    fn update_payload(
        &self,
        group: &str,
        style: &UpdateStyle,
        state: &ObservedState,
        desired: &DesiredConfig,
    ) -> RequestPayload {
        let schema = &self.definition.schema;
        let mut payload = self.id_payload(&state.id);

        match style {
            UpdateStyle::Replace => {
                let values: Vec<(&str, Value)> = schema
                    .iter()
                    .filter(|(_, attr)| {
                        attr.is_settable() && !attr.force_replace && attr.group_name() == group
                    })
                    .filter_map(|(name, attr)| {
                        let value = desired
                            .get(name)
                            .or(attr.default.as_ref())
                            .cloned()
                            .or_else(|| {
                                // removed by the user: clear it remotely
                                state
                                    .attributes
                                    .get(name)
                                    .filter(|v| !v.is_zero() && !attr.remote_fills())
                                    .map(|_| Value::zero_for(&attr.kind))
                            })?;
                        Some((name.as_str(), value))
                    })
                    .collect();
                payload.extend(to_request_subset(values.iter().map(|(n, v)| (*n, v)), schema));
            }
            UpdateStyle::MapDelta { attribute } => {
                let delta = diff_map(
                    state.attributes.get(attribute).and_then(Value::as_map),
                    desired.get(attribute).and_then(Value::as_map),
                );
                let upsert = delta
                    .upsert
                    .iter()
                    .map(|(k, v)| (k.clone(), plain_json(v)))
                    .collect();
                payload.insert("upsert".to_string(), serde_json::Value::Object(upsert));
                payload.insert(
                    "remove".to_string(),
                    serde_json::Value::Array(
                        delta.remove.into_iter().map(serde_json::Value::String).collect(),
                    ),
                );
            }
        }
        payload
    }

    async fn update(
        &mut self,
        state: ObservedState,
        desired: &DesiredConfig,
        changes: &ChangeSet,
    ) -> Result<ObservedState> {
        self.phase = Phase::Update;
        self.lifecycle = Lifecycle::Reconciling;
        self.target_id = Some(state.id.clone());
        self.target = Some(state.clone());

        let definition = self.definition;
        for group in changes.update_groups() {
            let Some(update) = definition.update_action(group) else {
                return Err(EngineError::Schema(format!(
                    "{}: no update action for group '{}'",
                    definition.type_name(),
                    group
                )));
            };

            let payload = self.update_payload(group, &update.style, &state, desired);
            let call = RemoteCall::new(update.action.clone(), payload);
            if let Err(e) = self.invoke(call, definition.timeouts.update).await {
                if !e.is_cancelled() {
                    self.persist_after_failed_update(&state).await;
                }
                return Err(e);
            }
            tracing::info!("{} updated group {}", self.address, group);
        }

        let payload = self.wait_until_ready(&state.id).await?;
        let attributes = from_response(&payload, &definition.schema, Some(&state.attributes))?;
        let fresh = state.refreshed(attributes, Lifecycle::Stable);
        self.store().save(self.address, &fresh).await?;
        self.lifecycle = Lifecycle::Stable;
        Ok(fresh)
    }

    /// Re-derive state from the remote after a partially applied update
    async fn persist_after_failed_update(&mut self, state: &ObservedState) {
        let last_call = self.last_call.clone();
        match self.read(&state.id).await {
            Ok(Some(payload)) => {
                match from_response(&payload, &self.definition.schema, Some(&state.attributes)) {
                    Ok(attributes) => {
                        let fresh = state.refreshed(attributes, Lifecycle::Reconciling);
                        if let Err(e) = self.store().save(self.address, &fresh).await {
                            tracing::warn!("{}: failed to persist state: {}", self.address, e);
                        }
                    }
                    Err(e) => tracing::warn!("{}: {}", self.address, e),
                }
            }
            Ok(None) => {
                if let Err(e) = self.store().delete(self.address).await {
                    tracing::warn!("{}: failed to drop state: {}", self.address, e);
                }
            }
            Err(e) => tracing::warn!("{}: re-read after failed update failed: {}", self.address, e),
        }
        self.last_call = last_call;
    }

    async fn delete(&mut self, state: ObservedState) -> Result<()> {
        self.phase = Phase::Delete;
        self.lifecycle = if self.replacing {
            Lifecycle::Replacing
        } else {
            Lifecycle::Deleting
        };
        self.target_id = Some(state.id.clone());
        self.target = Some(state.clone());

        let definition = self.definition;
        let (start, mut issued) = self.delete_resume_point(&state);
        if start > 0 || issued {
            tracing::info!(
                "{} resuming delete at {}",
                self.address,
                definition.delete.get(start).map_or("absence check", |s| s.action.as_str())
            );
        }

        for step in definition.delete.iter().skip(start) {
            self.phase = Phase::Delete;
            if !std::mem::take(&mut issued) {
                let call = RemoteCall::new(step.action.clone(), self.id_payload(&state.id));
                match self.invoke(call, definition.timeouts.delete).await {
                    Ok(_) => {}
                    Err(EngineError::Remote(e)) if e.is_not_found() => {
                        tracing::debug!("{} already gone", state.id);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            match &step.wait {
                DeleteWait::Status(wait) => {
                    if self.wait_for_status(&state.id, wait, true).await?.is_none() {
                        break;
                    }
                }
                DeleteWait::Absent => self.wait_until_absent(&state.id).await?,
            }
        }

        self.store().delete(self.address).await?;
        tracing::info!("{} ({}) deleted", self.address, state.id);
        self.target = None;
        self.target_id = None;
        Ok(())
    }

    /// After cancellation following a mutating call, persist exactly what a
    /// final Read reports
    async fn settle_after_cancel(&mut self) {
        if !self.mutated {
            return;
        }
        let Some(id) = self.target_id.clone() else {
            return;
        };

        let executor = RetryExecutor::new(self.orchestrator.backoff.clone());
        let call = RemoteCall::new(self.definition.read.clone(), self.id_payload(&id));
        let remote = &*self.orchestrator.remote;
        let call_ref = &call;
        self.calls.push(call.action.clone());

        let result = executor
            .execute(self.definition.timeouts.read, || remote.invoke(call_ref))
            .await;

        let schema = &self.definition.schema;
        let prior = self.target.as_ref().map(|s| &s.attributes);
        let outcome = match result {
            Ok(payload) => match from_response(&payload, schema, prior) {
                Ok(attributes) => {
                    let state = match &self.target {
                        Some(existing) => existing.refreshed(attributes, self.lifecycle),
                        None => ObservedState::new(id.clone(), self.definition.type_name(), attributes)
                            .with_lifecycle(self.lifecycle)
                            .with_owner(self.orchestrator.owner.clone()),
                    };
                    self.store().save(self.address, &state).await
                }
                Err(e) => Err(e),
            },
            Err(EngineError::Remote(e)) if e.is_not_found() => self.store().delete(self.address).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            tracing::warn!("{}: could not settle state after cancel: {}", self.address, e);
        }
    }
}
