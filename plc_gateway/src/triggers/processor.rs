use crate::channel::TagWriter;
use crate::config::settings::WorkstationConfig;
use crate::error::ProcessError;
use crate::tags::engine::TagEngine;
use crate::tags::structures::ValueVariant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Kind of workstation; selects the processor that handles its triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkstationType {
    Loading,
    Assembly,
    Testing,
    Inspection,
    Packaging,
    Other(String),
}

/// Value written to an equipment's ProcessResult tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessResult {
    Idle = 0,
    Success = 1,
    Error = 2,
    Timeout = 3,
}

/// Everything a processor learns about one trigger firing.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub workstation_code: String,
    pub equipment_code: String,
    pub trigger_tag: String,
    pub trigger_value: ValueVariant,
    pub trigger_time: DateTime<Utc>,
}

/// Handles the business process behind a workstation trigger.
///
/// Implementations report their outcome through an injected
/// [`ResultWriter`]; returning `Err` makes the dispatcher write `Error`.
#[async_trait]
pub trait WorkstationProcessor: Send + Sync {
    async fn execute(&self, ctx: &ProcessContext) -> Result<(), ProcessError>;
}

/// Immutable lookup from workstation type to processor.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: Arc<HashMap<WorkstationType, Arc<dyn WorkstationProcessor>>>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    pub fn get(&self, kind: &WorkstationType) -> Option<Arc<dyn WorkstationProcessor>> {
        self.processors.get(kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    processors: HashMap<WorkstationType, Arc<dyn WorkstationProcessor>>,
}

impl ProcessorRegistryBuilder {
    pub fn register(
        mut self,
        kind: WorkstationType,
        processor: Arc<dyn WorkstationProcessor>,
    ) -> Self {
        if self.processors.insert(kind.clone(), processor).is_some() {
            warn!("Processor for {:?} registered twice; keeping the last one", kind);
        }
        self
    }

    pub fn build(self) -> ProcessorRegistry {
        ProcessorRegistry {
            processors: Arc::new(self.processors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstationInfo {
    pub code: String,
    pub workstation_type: WorkstationType,
}

/// Maps an equipment code to the workstation that owns it.
#[async_trait]
pub trait WorkstationResolver: Send + Sync {
    async fn resolve(&self, equipment_code: &str) -> Option<WorkstationInfo>;
}

/// Resolver backed by the workstation table in the settings file.
#[derive(Debug, Default)]
pub struct StaticWorkstationResolver {
    by_equipment: HashMap<String, WorkstationInfo>,
}

impl StaticWorkstationResolver {
    pub fn from_config(workstations: &[WorkstationConfig]) -> Self {
        let mut by_equipment = HashMap::new();
        for ws in workstations {
            let info = WorkstationInfo {
                code: ws.code.clone(),
                workstation_type: ws.workstation_type.clone(),
            };
            for equipment in &ws.equipment {
                by_equipment.insert(equipment.clone(), info.clone());
            }
        }
        StaticWorkstationResolver { by_equipment }
    }
}

#[async_trait]
impl WorkstationResolver for StaticWorkstationResolver {
    async fn resolve(&self, equipment_code: &str) -> Option<WorkstationInfo> {
        self.by_equipment.get(equipment_code).cloned()
    }
}

/// Result and message tag names for one equipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTargets {
    pub result_tag: String,
    pub message_tag: Option<String>,
}

impl ResultTargets {
    /// `{equipment}.ProcessResult` / `{equipment}.ProcessMessage`.
    pub fn for_equipment(equipment_code: &str) -> Self {
        ResultTargets {
            result_tag: format!("{}.ProcessResult", equipment_code),
            message_tag: Some(format!("{}.ProcessMessage", equipment_code)),
        }
    }
}

/// Writes process results back to the controller.
#[derive(Clone)]
pub struct ResultWriter {
    writer: Arc<dyn TagWriter>,
    targets: Arc<HashMap<String, ResultTargets>>,
}

impl ResultWriter {
    pub fn new(writer: Arc<dyn TagWriter>, targets: HashMap<String, ResultTargets>) -> Self {
        ResultWriter {
            writer,
            targets: Arc::new(targets),
        }
    }

    pub fn targets(&self, equipment_code: &str) -> ResultTargets {
        self.targets
            .get(equipment_code)
            .cloned()
            .unwrap_or_else(|| ResultTargets::for_equipment(equipment_code))
    }

    pub async fn write(
        &self,
        equipment_code: &str,
        result: ProcessResult,
        message: Option<&str>,
    ) -> Result<(), ProcessError> {
        let targets = self.targets(equipment_code);
        self.writer
            .write_tag(&targets.result_tag, ValueVariant::Int(result as i64))
            .await
            .map_err(|e| ProcessError::Write(e.to_string()))?;
        if let (Some(tag), Some(text)) = (targets.message_tag.as_deref(), message) {
            self.writer
                .write_tag(tag, ValueVariant::String(text.to_string()))
                .await
                .map_err(|e| ProcessError::Write(e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Released,
    OnHold,
    Completed,
    Unknown,
}

/// Back-office boundary used by processors to check work orders.
#[async_trait]
pub trait WorkOrderLookup: Send + Sync {
    async fn status(&self, serial_number: &str) -> Result<WorkOrderStatus, ProcessError>;
}

/// Work order table held in memory, seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticWorkOrderLookup {
    orders: DashMap<String, WorkOrderStatus>,
}

impl StaticWorkOrderLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, serial_number: impl Into<String>, status: WorkOrderStatus) {
        self.orders.insert(serial_number.into(), status);
    }
}

#[async_trait]
impl WorkOrderLookup for StaticWorkOrderLookup {
    async fn status(&self, serial_number: &str) -> Result<WorkOrderStatus, ProcessError> {
        Ok(self
            .orders
            .get(serial_number)
            .map(|s| *s.value())
            .unwrap_or(WorkOrderStatus::Unknown))
    }
}

/// Confirms every trigger with a Success result.
pub struct AcknowledgeProcessor {
    results: ResultWriter,
}

impl AcknowledgeProcessor {
    pub fn new(results: ResultWriter) -> Self {
        AcknowledgeProcessor { results }
    }
}

#[async_trait]
impl WorkstationProcessor for AcknowledgeProcessor {
    async fn execute(&self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        info!(
            "Workstation '{}' acknowledged trigger '{}' from {}",
            ctx.workstation_code, ctx.trigger_tag, ctx.equipment_code
        );
        self.results
            .write(&ctx.equipment_code, ProcessResult::Success, Some("OK"))
            .await
    }
}

/// Placeholder in serial tag templates.
pub const EQUIPMENT_PLACEHOLDER: &str = "{equipment}";

/// Reads the part serial from the controller and checks its work order.
pub struct WorkOrderCheckProcessor {
    engine: TagEngine,
    lookup: Arc<dyn WorkOrderLookup>,
    results: ResultWriter,
    serial_tag_template: String,
    lookup_timeout: Duration,
}

impl WorkOrderCheckProcessor {
    pub fn new(
        engine: TagEngine,
        lookup: Arc<dyn WorkOrderLookup>,
        results: ResultWriter,
        serial_tag_template: impl Into<String>,
        lookup_timeout: Duration,
    ) -> Self {
        WorkOrderCheckProcessor {
            engine,
            lookup,
            results,
            serial_tag_template: serial_tag_template.into(),
            lookup_timeout,
        }
    }
}

#[async_trait]
impl WorkstationProcessor for WorkOrderCheckProcessor {
    async fn execute(&self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        let serial_tag = self
            .serial_tag_template
            .replace(EQUIPMENT_PLACEHOLDER, &ctx.equipment_code);
        let serial = self
            .engine
            .get_tag(&serial_tag)
            .map(|tag| tag.get_value(String::new()))
            .unwrap_or_default();
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(ProcessError::MissingValue(serial_tag));
        }

        let status = match tokio::time::timeout(self.lookup_timeout, self.lookup.status(serial)).await
        {
            Ok(status) => status?,
            Err(_) => {
                warn!("Work order lookup for '{}' timed out", serial);
                return self
                    .results
                    .write(
                        &ctx.equipment_code,
                        ProcessResult::Timeout,
                        Some("work order lookup timed out"),
                    )
                    .await;
            }
        };

        match status {
            WorkOrderStatus::Released => {
                self.results
                    .write(&ctx.equipment_code, ProcessResult::Success, Some(serial))
                    .await
            }
            other => {
                let message = format!("work order for {} is {:?}", serial, other);
                self.results
                    .write(&ctx.equipment_code, ProcessResult::Error, Some(&message))
                    .await
            }
        }
    }
}
