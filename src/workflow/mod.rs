//! Workflow Bridge
//!
//! Port to the external BPM engine. Process instances are correlated to
//! entities through the business key (the entity id); business-key
//! matching is case-insensitive on the engine side.

pub mod rest;

pub use rest::RestProcessEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Instruction passed when (re)starting a process at a given activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInstruction {
    #[serde(rename = "type")]
    pub instruction_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl StartInstruction {
    pub fn start_after_activity(activity_id: impl Into<String>) -> Self {
        Self {
            instruction_type: "startAfterActivity".into(),
            activity_id: Some(activity_id.into()),
        }
    }
}

/// Engine variable wire shape: `{key: {value}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineVariable {
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    pub id: String,
    #[serde(default)]
    pub business_key: Option<String>,
}

/// A user task as the engine reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTask {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub task_definition_key: String,
    /// Engine transport links; stripped before tasks leave the resolver.
    #[serde(default)]
    pub links: Vec<Value>,
}

impl ProcessTask {
    pub fn strip_links(mut self) -> Self {
        self.links.clear();
        self
    }
}

/// Port to the BPM engine.
#[async_trait]
pub trait ProcessEngine: Send + Sync {
    async fn start_process(
        &self,
        process_key: &str,
        business_key: &str,
        start_instructions: Option<Vec<StartInstruction>>,
        variables: Option<HashMap<String, EngineVariable>>,
    ) -> anyhow::Result<ProcessInstance>;

    /// Process instances correlated to a business key.
    async fn list_process_instances(
        &self,
        business_key: &str,
    ) -> anyhow::Result<Vec<ProcessInstance>>;

    /// Cancel a process instance. Idempotent: deleting an already-deleted
    /// instance succeeds.
    async fn delete_process_instance(&self, id: &str) -> anyhow::Result<()>;

    /// Tasks for the process correlated to a business key, in engine order.
    async fn list_tasks(&self, business_key: &str) -> anyhow::Result<Vec<ProcessTask>>;

    async fn complete_task(
        &self,
        task_id: &str,
        variables: HashMap<String, EngineVariable>,
    ) -> anyhow::Result<()>;
}

/// Marshal state values into engine variables. Only strings, numbers
/// and null cross the wire; booleans, arrays and objects are dropped.
pub fn marshal_variables(state: &Map<String, Value>) -> HashMap<String, EngineVariable> {
    state
        .iter()
        .filter(|(_, value)| {
            matches!(value, Value::String(_) | Value::Number(_) | Value::Null)
        })
        .map(|(key, value)| {
            (
                key.clone(),
                EngineVariable {
                    value: value.clone(),
                },
            )
        })
        .collect()
}
