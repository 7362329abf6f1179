//! REST Process Engine Client
//!
//! Thin HTTP implementation of the `ProcessEngine` port against a
//! Camunda-style REST API.

use super::{EngineVariable, ProcessEngine, ProcessInstance, ProcessTask, StartInstruction};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

pub struct RestProcessEngine {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartProcessBody {
    business_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_instructions: Option<Vec<StartInstruction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<HashMap<String, EngineVariable>>,
}

#[derive(Serialize)]
struct CompleteTaskBody {
    variables: HashMap<String, EngineVariable>,
}

impl RestProcessEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ProcessEngine for RestProcessEngine {
    async fn start_process(
        &self,
        process_key: &str,
        business_key: &str,
        start_instructions: Option<Vec<StartInstruction>>,
        variables: Option<HashMap<String, EngineVariable>>,
    ) -> anyhow::Result<ProcessInstance> {
        let body = StartProcessBody {
            business_key: business_key.to_string(),
            start_instructions,
            variables,
        };
        let response = self
            .client
            .post(self.url(&format!("/process-definition/key/{process_key}/start")))
            .json(&body)
            .send()
            .await
            .context("engine start request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("engine start returned {}", response.status()));
        }
        response
            .json()
            .await
            .context("engine start returned malformed body")
    }

    async fn list_process_instances(
        &self,
        business_key: &str,
    ) -> anyhow::Result<Vec<ProcessInstance>> {
        let response = self
            .client
            .get(self.url("/process-instance"))
            .query(&[("businessKey", business_key)])
            .send()
            .await
            .context("engine instance listing failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "engine instance listing returned {}",
                response.status()
            ));
        }
        response
            .json()
            .await
            .context("engine instance listing returned malformed body")
    }

    async fn delete_process_instance(&self, id: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/process-instance/{id}")))
            .send()
            .await
            .context("engine delete request failed")?;

        // Already-deleted instances are a success for this port.
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(anyhow!("engine delete returned {}", response.status()))
    }

    async fn list_tasks(&self, business_key: &str) -> anyhow::Result<Vec<ProcessTask>> {
        let response = self
            .client
            .get(self.url("/task"))
            .query(&[("processInstanceBusinessKey", business_key)])
            .send()
            .await
            .context("engine task listing failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("engine task listing returned {}", response.status()));
        }
        response
            .json()
            .await
            .context("engine task listing returned malformed body")
    }

    async fn complete_task(
        &self,
        task_id: &str,
        variables: HashMap<String, EngineVariable>,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/task/{task_id}/complete")))
            .json(&CompleteTaskBody { variables })
            .send()
            .await
            .context("engine complete request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "engine complete returned {}",
                response.status()
            ));
        }
        Ok(())
    }
}
