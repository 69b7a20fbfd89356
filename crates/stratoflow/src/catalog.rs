//! Built-in resource types
//!
//! Each entry is pure data: a schema plus the remote actions that manage it.

use stratoflow_engine::{
    Attribute, AttributeKind, DeleteWait, ResourceDefinition, ResourceSchema, Result, ScalarKind,
    StatusWait,
};

/// Every built-in resource type, validated
pub fn builtin() -> Result<Vec<ResourceDefinition>> {
    let definitions = vec![
        clickhouse_instance()?,
        clickhouse_backup_job()?,
        monitor_alarm_notice()?,
    ];
    for definition in &definitions {
        definition.validate()?;
    }
    Ok(definitions)
}

fn clickhouse_instance() -> Result<ResourceDefinition> {
    let data_spec = ResourceSchema::builder("data_spec")
        .attribute(
            "spec_name",
            Attribute::required(AttributeKind::string()).wire("SpecName"),
        )
        .attribute(
            "count",
            Attribute::required(AttributeKind::int()).wire("Count"),
        )
        .attribute(
            "disk_size",
            Attribute::required(AttributeKind::int()).wire("DiskSize"),
        )
        .build()?;

    let schema = ResourceSchema::builder("clickhouse_instance")
        .attribute(
            "name",
            Attribute::required(AttributeKind::string()).wire("InstanceName"),
        )
        .attribute(
            "zone",
            Attribute::required(AttributeKind::string())
                .wire("Zone")
                .force_new(),
        )
        .attribute(
            "product_version",
            Attribute::optional_computed(AttributeKind::string())
                .wire("ProductVersion")
                .force_new(),
        )
        .attribute(
            "charge_type",
            Attribute::optional(AttributeKind::string())
                .wire("ChargeType")
                .with_default("POSTPAID_BY_HOUR")
                .force_new(),
        )
        .attribute(
            "vpc_id",
            Attribute::required(AttributeKind::string())
                .wire("VpcId")
                .force_new(),
        )
        .attribute(
            "subnet_id",
            Attribute::required(AttributeKind::string())
                .wire("SubnetId")
                .force_new(),
        )
        .attribute(
            "ha_flag",
            Attribute::optional(AttributeKind::bool())
                .wire("HaFlag")
                .force_new(),
        )
        .attribute(
            "data_spec",
            Attribute::required(AttributeKind::block(data_spec))
                .wire("DataSpec")
                .group("spec"),
        )
        .attribute(
            "tags",
            Attribute::optional(AttributeKind::map_of(ScalarKind::String))
                .wire("Tags")
                .group("tags"),
        )
        .attribute(
            "status",
            Attribute::computed(AttributeKind::string()).wire("Status"),
        )
        .attribute(
            "access_info",
            Attribute::computed(AttributeKind::string()).wire("AccessInfo"),
        )
        .build()?;

    Ok(ResourceDefinition::new(
        schema,
        "CreateInstanceNew",
        "DescribeInstance",
        "InstanceId",
    )
    .update("core", "ModifyInstanceName")
    .update("spec", "ScaleOutInstance")
    .update_map("tags", "ModifyInstanceTags", "tags")
    .delete_step(
        "IsolateInstance",
        DeleteWait::Status(StatusWait::new(&["Isolating"], &["Isolated"])),
    )
    .delete_step("DestroyInstance", DeleteWait::Absent)
    .status("status", StatusWait::new(&["Init", "Changing"], &["Serving"])))
}

fn clickhouse_backup_job() -> Result<ResourceDefinition> {
    let table = ResourceSchema::builder("backup_table")
        .attribute(
            "database",
            Attribute::required(AttributeKind::string()).wire("Database"),
        )
        .attribute(
            "table",
            Attribute::required(AttributeKind::string()).wire("Table"),
        )
        .build()?;

    let schema = ResourceSchema::builder("clickhouse_backup_job")
        .attribute(
            "instance_id",
            Attribute::required(AttributeKind::string())
                .wire("InstanceId")
                .force_new(),
        )
        .attribute(
            "schedule_type",
            Attribute::optional(AttributeKind::string())
                .wire("ScheduleType")
                .with_default("Weekly"),
        )
        .attribute(
            "week_days",
            Attribute::required(AttributeKind::set_of(AttributeKind::int())).wire("WeekDays"),
        )
        .attribute(
            "execute_hour",
            Attribute::required(AttributeKind::int()).wire("ExecuteHour"),
        )
        .attribute(
            "retain_days",
            Attribute::optional(AttributeKind::int())
                .wire("RetainDays")
                .with_default(7),
        )
        .attribute(
            "tables",
            Attribute::optional(AttributeKind::keyed_blocks(table, "table"))
                .wire("BackUpTables"),
        )
        .build()?;

    Ok(ResourceDefinition::new(
        schema,
        "CreateBackUpSchedule",
        "DescribeBackUpSchedule",
        "ScheduleId",
    )
    .update("core", "ModifyBackUpSchedule")
    .delete_step("DeleteBackUpSchedule", DeleteWait::Absent))
}

fn monitor_alarm_notice() -> Result<ResourceDefinition> {
    let user_notice = ResourceSchema::builder("user_notice")
        .attribute(
            "receiver_type",
            Attribute::required(AttributeKind::string()).wire("ReceiverType"),
        )
        .attribute(
            "start_time",
            Attribute::optional(AttributeKind::int())
                .wire("StartTime")
                .with_default(0),
        )
        .attribute(
            "end_time",
            Attribute::optional(AttributeKind::int())
                .wire("EndTime")
                .with_default(86399),
        )
        .attribute(
            "notice_way",
            Attribute::required(AttributeKind::set_of(AttributeKind::string()))
                .wire("NoticeWay"),
        )
        .attribute(
            "user_ids",
            Attribute::optional(AttributeKind::set_of(AttributeKind::int())).wire("UserIds"),
        )
        .build()?;

    let url_notice = ResourceSchema::builder("url_notice")
        .attribute("url", Attribute::required(AttributeKind::string()).wire("URL"))
        .attribute(
            "is_valid",
            Attribute::computed(AttributeKind::bool()).wire("IsValid"),
        )
        .build()?;

    let schema = ResourceSchema::builder("monitor_alarm_notice")
        .attribute(
            "name",
            Attribute::required(AttributeKind::string()).wire("Name"),
        )
        .attribute(
            "notice_type",
            Attribute::required(AttributeKind::string()).wire("NoticeType"),
        )
        .attribute(
            "notice_language",
            Attribute::optional(AttributeKind::string())
                .wire("NoticeLanguage")
                .with_default("en-US"),
        )
        .attribute(
            "user_notices",
            Attribute::optional(AttributeKind::list_of(AttributeKind::block(user_notice)))
                .wire("UserNotices"),
        )
        .attribute(
            "url_notices",
            Attribute::optional(AttributeKind::keyed_blocks(url_notice, "url"))
                .wire("URLNotices"),
        )
        .attribute(
            "amp_consumer_id",
            Attribute::computed(AttributeKind::string()).wire("AMPConsumerId"),
        )
        .build()?;

    Ok(ResourceDefinition::new(
        schema,
        "CreateAlarmNotice",
        "DescribeAlarmNotice",
        "NoticeId",
    )
    .update("core", "ModifyAlarmNotice")
    .delete_step("DeleteAlarmNotices", DeleteWait::Absent))
}
