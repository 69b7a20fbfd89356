use std::sync::Arc;
use std::time::Duration;
use stratoflow_engine::testing::FakeCloud;
use stratoflow_engine::{
    Attribute, AttributeKind, BackoffPolicy, DeleteWait, MemoryStateStore, Orchestrator,
    ResourceAddress, ResourceDefinition, ResourceSchema, ScalarKind, StatusWait,
};

pub type TestOrchestrator = Orchestrator<FakeCloud, MemoryStateStore>;

pub fn instance_schema() -> ResourceSchema {
    ResourceSchema::builder("clickhouse_instance")
        .attribute(
            "name",
            Attribute::required(AttributeKind::string()).wire("InstanceName"),
        )
        .attribute(
            "zone",
            Attribute::optional(AttributeKind::string())
                .wire("Zone")
                .with_default("a")
                .force_new(),
        )
        .attribute(
            "tags",
            Attribute::optional(AttributeKind::map_of(ScalarKind::String))
                .wire("Tags")
                .group("tags"),
        )
        .attribute("size", Attribute::optional(AttributeKind::int()).wire("Size"))
        .attribute(
            "status",
            Attribute::computed(AttributeKind::string()).wire("Status"),
        )
        .build()
        .unwrap()
}

pub fn instance_definition() -> ResourceDefinition {
    ResourceDefinition::new(
        instance_schema(),
        "CreateInstance",
        "DescribeInstance",
        "InstanceId",
    )
    .update("core", "ModifyInstance")
    .update_map("tags", "ModifyTags", "tags")
    .delete_step("DestroyInstance", DeleteWait::Absent)
    .status("status", StatusWait::new(&["creating"], &["serving"]))
}

#[allow(dead_code)]
/// Prepaid variant that must be isolated before it can be destroyed
pub fn prepaid_definition() -> ResourceDefinition {
    ResourceDefinition::new(
        instance_schema(),
        "CreateInstance",
        "DescribeInstance",
        "InstanceId",
    )
    .update("core", "ModifyInstance")
    .update_map("tags", "ModifyTags", "tags")
    .delete_step(
        "IsolateInstance",
        DeleteWait::Status(StatusWait::new(&["isolating"], &["isolated"])),
    )
    .delete_step("DestroyInstance", DeleteWait::Absent)
    .status("status", StatusWait::new(&["creating"], &["serving"]))
}

pub fn address() -> ResourceAddress {
    ResourceAddress::new("clickhouse_instance", "main")
}

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

#[allow(dead_code)]
pub fn orchestrator(cloud: &Arc<FakeCloud>) -> (TestOrchestrator, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    let orchestrator = Orchestrator::new(Arc::clone(cloud), Arc::clone(&store))
        .with_backoff(fast_backoff())
        .with_poll_interval(Duration::from_secs(1))
        .with_owner("test-project");
    (orchestrator, store)
}
