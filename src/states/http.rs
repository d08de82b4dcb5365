//! HTTP call executed by a worker, with an optional status code assertion.

use super::{single_response, StepServices};
use crate::constants::ExecutionStatus;
use crate::context::ExecutionContext;
use crate::dispatch::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::step::{ExecutionResponse, HttpExecutionData, StateExecutionData, Step, StepType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
pub struct HttpStep {
    name: String,
    url: String,
    method: String,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    expected_status_codes: Vec<u16>,
    timeout_ms: Option<u64>,
    services: StepServices,
}

impl HttpStep {
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        services: StepServices,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            body: None,
            expected_status_codes: Vec::new(),
            timeout_ms: None,
            services,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// FAILED unless the response code is one of `codes`
    pub fn expecting_status(mut self, codes: Vec<u16>) -> Self {
        self.expected_status_codes = codes;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[async_trait]
impl Step for HttpStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Http
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.url.trim().is_empty() {
            errors.insert("url".to_string(), "URL should be provided".to_string());
        }
        if self.method.trim().is_empty() {
            errors.insert("method".to_string(), "Method should be provided".to_string());
        }
        errors
    }

    fn timeout_millis(&self) -> Option<u64> {
        self.timeout_ms
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let url = context.render_required(&self.url)?;
        let body = self
            .body
            .as_deref()
            .map(|b| context.render_required(b))
            .transpose()?;
        let headers = self
            .headers
            .iter()
            .map(|(k, v)| Ok((k.clone(), context.render_required(v)?)))
            .collect::<StateResult<BTreeMap<_, _>>>()?;

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::Http.as_str())
            .await?;

        let data = StateExecutionData::Http(HttpExecutionData {
            activity_id: activity_id.clone(),
            url: url.clone(),
            method: self.method.to_uppercase(),
            expected_status_codes: self.expected_status_codes.clone(),
            http_response_code: None,
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::HttpCall,
            context.account_id(),
            context.app_id(),
            json!({
                "url": url,
                "method": self.method.to_uppercase(),
                "headers": headers,
                "body": body,
            }),
        )
        .with_wait_id(activity_id)
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(self.services.task_timeout_ms(self.timeout_ms));

        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let response = single_response(responses)?;
        let Some(StateExecutionData::Http(mut data)) = context.state_execution_data() else {
            return Err(StateError::Internal("http step resumed without execution data".to_string()));
        };

        let code = response
            .as_task()
            .and_then(|r| r.output.get("httpResponseCode"))
            .and_then(Value::as_u64)
            .map(|c| c as u16);
        data.http_response_code = code;

        let (status, message) = match response.status() {
            ExecutionStatus::Success if !self.expected_status_codes.is_empty() => match code {
                Some(code) if self.expected_status_codes.contains(&code) => {
                    (ExecutionStatus::Success, None)
                }
                other => (
                    ExecutionStatus::Failed,
                    Some(format!(
                        "Expected status code(s) {:?} but received {}",
                        self.expected_status_codes,
                        other.map_or_else(|| "none".to_string(), |c| c.to_string())
                    )),
                ),
            },
            status => (status, response.error_message().map(str::to_string)),
        };

        self.services.finish_activity(&data.activity_id, status).await;

        let mut result = ExecutionResponse::completed(status).with_state_data(StateExecutionData::Http(data));
        if let Some(message) = message {
            result = result.with_message(message);
        }
        Ok(result)
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}
