//! In-memory remote for tests
//!
//! [`FakeCloud`] serves the actions of registered [`ResourceDefinition`]s:
//! creates echo their payload back on reads, statuses progress through a
//! scripted sequence, deletes take a few reads to disappear, and faults can
//! be injected per action.

use crate::definition::{DeleteWait, ResourceDefinition, UpdateStyle};
use crate::error::RemoteError;
use crate::remote::{RemoteApi, RemoteCall, ResponsePayload};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// When an injected fault fires
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the next call only
    Once(RemoteError),
    /// Fail the next `n` calls
    Times(u32, RemoteError),
    /// Fail every call
    Always(RemoteError),
}

#[derive(Debug, Clone)]
enum Handler {
    Create,
    Read,
    Update { style: FakeUpdate },
    /// `settle` is the (pending, target) status an intermediate step leads to
    Delete { settle: Option<(String, String)>, last: bool },
}

#[derive(Debug, Clone)]
enum FakeUpdate {
    Merge,
    MapDelta { wire: String },
}

#[derive(Debug, Clone)]
struct TypeInfo {
    id_field: String,
    status_wire: Option<String>,
    pending: String,
    ready: String,
}

#[derive(Debug)]
struct FakeResource {
    fields: ResponsePayload,
    statuses: VecDeque<String>,
    settled: Option<String>,
    /// Reads left before a deleted resource disappears
    vanishing_in: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    handlers: HashMap<String, (String, Handler)>,
    types: HashMap<String, TypeInfo>,
    resources: HashMap<String, FakeResource>,
    faults: HashMap<String, Fault>,
    log: Vec<RemoteCall>,
    next_id: u64,
    cancel_on: Option<(String, CancellationToken)>,
}

/// Scriptable in-memory remote API
#[derive(Debug)]
pub struct FakeCloud {
    inner: Mutex<Inner>,
    create_polls: u32,
    delete_polls: u32,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            create_polls: 1,
            delete_polls: 1,
        }
    }

    /// Reads reporting the pending status after create (and after
    /// intermediate delete steps) before the ready status shows
    pub fn create_polls(mut self, reads: u32) -> Self {
        self.create_polls = reads;
        self
    }

    /// Reads that still find a deleted resource before it disappears
    pub fn delete_polls(mut self, reads: u32) -> Self {
        self.delete_polls = reads;
        self
    }

    /// Serve the actions of `definition`
    pub fn register(self, definition: &ResourceDefinition) -> Self {
        let type_name = definition.type_name().to_string();
        let status_wire = definition.status.as_ref().map(|s| {
            definition
                .schema
                .get(&s.attribute)
                .map_or(s.attribute.clone(), |a| a.wire_name_or(&s.attribute).to_string())
        });
        let (pending, ready) = definition
            .status
            .as_ref()
            .map(|s| {
                (
                    s.wait.pending.first().cloned().unwrap_or_else(|| "pending".to_string()),
                    s.wait.target.first().cloned().unwrap_or_else(|| "ready".to_string()),
                )
            })
            .unwrap_or_else(|| ("pending".to_string(), "ready".to_string()));

        {
            let mut inner = self.lock();
            inner.types.insert(
                type_name.clone(),
                TypeInfo {
                    id_field: definition.id_field.clone(),
                    status_wire,
                    pending,
                    ready,
                },
            );

            let mut add = |action: &str, handler: Handler| {
                inner
                    .handlers
                    .insert(action.to_string(), (type_name.clone(), handler));
            };

            add(&definition.create, Handler::Create);
            add(&definition.read, Handler::Read);
            for update in &definition.updates {
                let style = match &update.style {
                    UpdateStyle::Replace => FakeUpdate::Merge,
                    UpdateStyle::MapDelta { attribute } => FakeUpdate::MapDelta {
                        wire: definition
                            .schema
                            .get(attribute)
                            .map_or(attribute.clone(), |a| a.wire_name_or(attribute).to_string()),
                    },
                };
                add(&update.action, Handler::Update { style });
            }
            let steps = definition.delete.len();
            for (i, step) in definition.delete.iter().enumerate() {
                let settle = match &step.wait {
                    DeleteWait::Status(wait) => wait.target.first().map(|target| {
                        let pending = wait
                            .pending
                            .first()
                            .cloned()
                            .unwrap_or_else(|| "pending".to_string());
                        (pending, target.clone())
                    }),
                    DeleteWait::Absent => None,
                };
                add(
                    &step.action,
                    Handler::Delete {
                        settle,
                        last: i + 1 == steps,
                    },
                );
            }
        }
        self
    }

    /// Inject a fault for `action`, replacing any earlier one
    pub fn inject(&self, action: &str, fault: Fault) {
        self.lock().faults.insert(action.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Cancel `token` right after `action` has been handled
    pub fn cancel_after(&self, action: &str, token: CancellationToken) {
        self.lock().cancel_on = Some((action.to_string(), token));
    }

    /// Every invocation so far, including failed ones
    pub fn log(&self) -> Vec<RemoteCall> {
        self.lock().log.clone()
    }

    /// Action names of every invocation so far
    pub fn actions(&self) -> Vec<String> {
        self.lock().log.iter().map(|c| c.action.clone()).collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.lock().log.iter().filter(|c| c.action == action).count()
    }

    /// Stored fields of a resource, as a read would return them
    pub fn resource(&self, id: &str) -> Option<ResponsePayload> {
        self.lock().resources.get(id).map(|r| r.fields.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().resources.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Seed a settled resource, e.g. for imports
    pub fn insert(&self, type_name: &str, id: &str, fields: ResponsePayload) {
        let mut inner = self.lock();
        let settled = inner.types.get(type_name).map(|t| t.ready.clone());
        inner.resources.insert(
            id.to_string(),
            FakeResource {
                fields,
                statuses: VecDeque::new(),
                settled,
                vanishing_in: None,
            },
        );
    }

    /// Change a field behind the engine's back
    pub fn set_field(&self, id: &str, wire: &str, value: Json) {
        if let Some(resource) = self.lock().resources.get_mut(id) {
            resource.fields.insert(wire.to_string(), value);
        }
    }

    /// Delete a resource behind the engine's back
    pub fn remove(&self, id: &str) {
        self.lock().resources.remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self, inner: &mut Inner, call: &RemoteCall) -> Result<ResponsePayload, RemoteError> {
        let Some((type_name, handler)) = inner.handlers.get(&call.action).cloned() else {
            return Err(RemoteError::fatal(format!("unknown action {}", call.action))
                .with_code("InvalidAction"));
        };
        let Some(info) = inner.types.get(&type_name).cloned() else {
            return Err(RemoteError::fatal(format!("unknown type {}", type_name)));
        };

        let target = || -> Result<String, RemoteError> {
            call.payload
                .get(&info.id_field)
                .and_then(Json::as_str)
                .map(str::to_string)
                .ok_or_else(|| RemoteError::fatal(format!("missing {}", info.id_field)))
        };
        let not_found = |id: &str| {
            RemoteError::not_found(format!("{} not found", id)).with_code("ResourceNotFound")
        };

        match handler {
            Handler::Create => {
                inner.next_id += 1;
                let id = format!("fake-{:04}", inner.next_id);
                let mut fields = call.payload.clone();
                fields.insert(info.id_field.clone(), Json::String(id.clone()));
                inner.resources.insert(
                    id.clone(),
                    FakeResource {
                        fields,
                        statuses: std::iter::repeat_n(
                            info.pending.clone(),
                            self.create_polls as usize,
                        )
                        .collect(),
                        settled: info.status_wire.as_ref().map(|_| info.ready.clone()),
                        vanishing_in: None,
                    },
                );
                let mut response = ResponsePayload::new();
                response.insert(info.id_field.clone(), Json::String(id));
                Ok(response)
            }
            Handler::Read => {
                let id = target()?;
                let resource = inner.resources.get_mut(&id).ok_or_else(|| not_found(&id))?;
                if let Some(left) = resource.vanishing_in {
                    if left == 0 {
                        inner.resources.remove(&id);
                        return Err(not_found(&id));
                    }
                    resource.vanishing_in = Some(left - 1);
                }
                if let Some(wire) = &info.status_wire {
                    let status = resource
                        .statuses
                        .pop_front()
                        .or_else(|| resource.settled.clone());
                    if let Some(status) = status {
                        resource.fields.insert(wire.clone(), Json::String(status));
                    }
                }
                Ok(resource.fields.clone())
            }
            Handler::Update { style } => {
                let id = target()?;
                let resource = inner.resources.get_mut(&id).ok_or_else(|| not_found(&id))?;
                match style {
                    FakeUpdate::Merge => {
                        for (k, v) in &call.payload {
                            if k != &info.id_field {
                                resource.fields.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    FakeUpdate::MapDelta { wire } => {
                        let mut map = resource
                            .fields
                            .get(&wire)
                            .and_then(Json::as_object)
                            .cloned()
                            .unwrap_or_default();
                        if let Some(upsert) = call.payload.get("upsert").and_then(Json::as_object) {
                            for (k, v) in upsert {
                                map.insert(k.clone(), v.clone());
                            }
                        }
                        if let Some(remove) = call.payload.get("remove").and_then(Json::as_array) {
                            for key in remove.iter().filter_map(Json::as_str) {
                                map.remove(key);
                            }
                        }
                        resource.fields.insert(wire, Json::Object(map));
                    }
                }
                Ok(ResponsePayload::new())
            }
            Handler::Delete { settle, last } => {
                let id = target()?;
                let resource = inner.resources.get_mut(&id).ok_or_else(|| not_found(&id))?;
                if last {
                    resource.vanishing_in = Some(self.delete_polls);
                } else if let Some((pending, target)) = settle {
                    resource.statuses =
                        std::iter::repeat_n(pending, self.create_polls as usize).collect();
                    resource.settled = Some(target);
                }
                Ok(ResponsePayload::new())
            }
        }
    }

    fn take_fault(inner: &mut Inner, action: &str) -> Option<RemoteError> {
        let fault = inner.faults.remove(action)?;
        match fault {
            Fault::Once(e) => Some(e),
            Fault::Times(n, e) => {
                if n > 1 {
                    inner
                        .faults
                        .insert(action.to_string(), Fault::Times(n - 1, e.clone()));
                }
                Some(e)
            }
            Fault::Always(e) => {
                inner
                    .faults
                    .insert(action.to_string(), Fault::Always(e.clone()));
                Some(e)
            }
        }
    }
}

#[async_trait]
impl RemoteApi for FakeCloud {
    async fn invoke(&self, call: &RemoteCall) -> Result<ResponsePayload, RemoteError> {
        let mut inner = self.lock();
        inner.log.push(call.clone());

        let result = match Self::take_fault(&mut inner, &call.action) {
            Some(fault) => Err(fault),
            None => self.handle(&mut inner, call),
        };

        if let Some((action, token)) = &inner.cancel_on {
            if action == &call.action {
                token.cancel();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::StatusWait;
    use crate::schema::{Attribute, AttributeKind, ResourceSchema};
    use serde_json::json;

    fn definition() -> ResourceDefinition {
        let schema = ResourceSchema::builder("thing")
            .attribute("name", Attribute::required(AttributeKind::string()).wire("Name"))
            .attribute("status", Attribute::computed(AttributeKind::string()).wire("Status"))
            .build()
            .unwrap();
        ResourceDefinition::new(schema, "CreateThing", "DescribeThing", "ThingId")
            .update("core", "ModifyThing")
            .delete_step("DeleteThing", DeleteWait::Absent)
            .status("status", StatusWait::new(&["creating"], &["running"]))
    }

    fn payload(value: Json) -> ResponsePayload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_read_progression() {
        let cloud = FakeCloud::new().create_polls(2).register(&definition());

        let created = cloud
            .invoke(&RemoteCall::non_idempotent("CreateThing", payload(json!({"Name": "x", "Extra": 1}))))
            .await
            .unwrap();
        let id = created["ThingId"].as_str().unwrap().to_string();

        let read = RemoteCall::new("DescribeThing", payload(json!({"ThingId": id})));
        let statuses: Vec<String> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let r = cloud.invoke(&read).await.unwrap();
                out.push(r["Status"].as_str().unwrap().to_string());
            }
            out
        };
        assert_eq!(statuses, vec!["creating", "creating", "running"]);

        let fields = cloud.resource(&id).unwrap();
        assert_eq!(fields["Extra"], json!(1));
    }

    #[tokio::test]
    async fn test_delete_then_absent() {
        let cloud = FakeCloud::new().register(&definition());
        cloud.insert("thing", "t-1", payload(json!({"ThingId": "t-1", "Name": "x"})));

        let target = payload(json!({"ThingId": "t-1"}));
        cloud.invoke(&RemoteCall::new("DeleteThing", target.clone())).await.unwrap();

        let read = RemoteCall::new("DescribeThing", target);
        assert!(cloud.invoke(&read).await.is_ok());
        let err = cloud.invoke(&read).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cloud.ids().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let cloud = FakeCloud::new().register(&definition());
        cloud.inject(
            "CreateThing",
            Fault::Times(2, RemoteError::retryable("throttled")),
        );

        let call = RemoteCall::non_idempotent("CreateThing", payload(json!({"Name": "x"})));
        assert!(cloud.invoke(&call).await.unwrap_err().is_retryable());
        assert!(cloud.invoke(&call).await.unwrap_err().is_retryable());
        assert!(cloud.invoke(&call).await.is_ok());
        assert_eq!(cloud.count("CreateThing"), 3);
        assert_eq!(cloud.ids().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_fatal() {
        let cloud = FakeCloud::new();
        let err = cloud
            .invoke(&RemoteCall::new("Nope", ResponsePayload::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("InvalidAction"));
    }
}
