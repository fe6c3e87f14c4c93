use async_trait::async_trait;
use aws_sdk_ecs::config::http::HttpResponse;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::operation::RequestId;
use aws_sdk_ecs::types::{
    ContainerOverride, Failure, KeyValuePair, LaunchType, PlacementConstraint,
    PlacementConstraintType, Task, TaskOverride,
};
use aws_sdk_ecs::Client;
use log::{debug, info};
use serde::Serialize;

use crate::config::ControlConfig;

/// Status reported when the SDK failed before any HTTP response was received.
const NO_RESPONSE_STATUS: u16 = 500;

/// Inputs of a start request, already URL-decoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskRequest {
    #[serde(rename = "meetingURL")]
    pub meeting_url: String,
    #[serde(rename = "rtmpEndpoint")]
    pub rtmp_endpoint: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition_arn: Option<String>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        TaskSummary {
            task_arn: task.task_arn().map(str::to_string),
            last_status: task.last_status().map(str::to_string),
            desired_status: task.desired_status().map(str::to_string),
            cluster_arn: task.cluster_arn().map(str::to_string),
            task_definition_arn: task.task_definition_arn().map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlacementFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&Failure> for PlacementFailure {
    fn from(failure: &Failure) -> Self {
        PlacementFailure {
            arn: failure.arn().map(str::to_string),
            reason: failure.reason().map(str::to_string),
            detail: failure.detail().map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunTaskOutcome {
    pub tasks: Vec<TaskSummary>,
    pub failures: Vec<PlacementFailure>,
}

impl RunTaskOutcome {
    /// ARN of the first launched task, if ECS reported one.
    pub fn first_task_arn(&self) -> Option<&str> {
        self.tasks.first().and_then(|task| task.task_arn.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StopTaskOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSummary>,
}

/// An orchestration API failure, passed back to the caller verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("orchestration API returned {status_code}: {}", .message.as_deref().unwrap_or("no message"))]
pub struct OrchestrationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<E> From<SdkError<E, HttpResponse>> for OrchestrationError
where
    E: ProvideErrorMetadata + RequestId + std::error::Error + Send + Sync + 'static,
{
    fn from(err: SdkError<E, HttpResponse>) -> Self {
        let status_code = err
            .raw_response()
            .map(|response| response.status().as_u16())
            .unwrap_or(NO_RESPONSE_STATUS);
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

        OrchestrationError {
            message: Some(message),
            code: err.code().map(str::to_string),
            status_code,
            request_id: err.request_id().map(str::to_string),
        }
    }
}

/// The two calls the control function makes against the task scheduler.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run_task(&self, request: &TaskRequest) -> Result<RunTaskOutcome, OrchestrationError>;

    async fn stop_task(&self, task_id: &str) -> Result<StopTaskOutcome, OrchestrationError>;
}

/// [`Orchestrator`] backed by Amazon ECS.
pub struct EcsOrchestrator {
    client: Client,
    config: ControlConfig,
}

impl EcsOrchestrator {
    pub fn new(client: Client, config: ControlConfig) -> Self {
        EcsOrchestrator { client, config }
    }
}

/// Container override injecting the meeting and RTMP endpoints into the recorder.
pub fn recorder_overrides(container_name: &str, request: &TaskRequest) -> TaskOverride {
    TaskOverride::builder()
        .container_overrides(
            ContainerOverride::builder()
                .name(container_name)
                .environment(
                    KeyValuePair::builder()
                        .name("MEETING_URL")
                        .value(&request.meeting_url)
                        .build(),
                )
                .environment(
                    KeyValuePair::builder()
                        .name("RTMP_URL")
                        .value(&request.rtmp_endpoint)
                        .build(),
                )
                .build(),
        )
        .build()
}

/// One recorder per container instance.
pub fn distinct_instance() -> PlacementConstraint {
    PlacementConstraint::builder()
        .r#type(PlacementConstraintType::DistinctInstance)
        .build()
}

#[async_trait]
impl Orchestrator for EcsOrchestrator {
    async fn run_task(&self, request: &TaskRequest) -> Result<RunTaskOutcome, OrchestrationError> {
        debug!(
            "Running task {} on cluster {}",
            self.config.task_definition_arn, self.config.cluster_arn
        );
        let output = self
            .client
            .run_task()
            .cluster(&self.config.cluster_arn)
            .task_definition(&self.config.task_definition_arn)
            .launch_type(LaunchType::Ec2)
            .count(1)
            .overrides(recorder_overrides(&self.config.container_name, request))
            .placement_constraints(distinct_instance())
            .send()
            .await?;

        let outcome = RunTaskOutcome {
            tasks: output.tasks().iter().map(TaskSummary::from).collect(),
            failures: output.failures().iter().map(PlacementFailure::from).collect(),
        };
        info!("run task succeeded: {:?}", outcome);
        Ok(outcome)
    }

    async fn stop_task(&self, task_id: &str) -> Result<StopTaskOutcome, OrchestrationError> {
        let output = self
            .client
            .stop_task()
            .cluster(&self.config.cluster_arn)
            .task(task_id)
            .send()
            .await?;

        let outcome = StopTaskOutcome {
            task: output.task().map(TaskSummary::from),
        };
        info!("stop task succeeded: {:?}", outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ecs::error::ErrorMetadata;
    use aws_sdk_ecs::operation::stop_task::StopTaskError;
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;

    fn request() -> TaskRequest {
        TaskRequest {
            meeting_url: "https://meet.example.com/room?id=1".to_string(),
            rtmp_endpoint: "rtmp://live.example.com/app/key".to_string(),
        }
    }

    #[test]
    fn overrides_inject_both_endpoints() {
        let overrides = recorder_overrides("recorder", &request());
        let container = &overrides.container_overrides()[0];

        assert_eq!(container.name(), Some("recorder"));
        let env: Vec<(Option<&str>, Option<&str>)> = container
            .environment()
            .iter()
            .map(|kv| (kv.name(), kv.value()))
            .collect();
        assert_eq!(
            env,
            vec![
                (Some("MEETING_URL"), Some("https://meet.example.com/room?id=1")),
                (Some("RTMP_URL"), Some("rtmp://live.example.com/app/key")),
            ]
        );
    }

    #[test]
    fn placement_requires_distinct_instance() {
        assert_eq!(
            distinct_instance().r#type(),
            Some(&PlacementConstraintType::DistinctInstance)
        );
    }

    #[test]
    fn first_task_arn_reads_first_task() {
        let task = Task::builder().task_arn("arn:aws:ecs:task/abc").build();
        let outcome = RunTaskOutcome {
            tasks: vec![TaskSummary::from(&task)],
            failures: vec![],
        };
        assert_eq!(outcome.first_task_arn(), Some("arn:aws:ecs:task/abc"));
        assert_eq!(RunTaskOutcome::default().first_task_arn(), None);
    }

    #[test]
    fn error_serializes_camel_case() {
        let err = OrchestrationError {
            message: Some("The referenced task was not found.".to_string()),
            code: Some("InvalidParameterException".to_string()),
            status_code: 404,
            request_id: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["statusCode"], 404);
        assert_eq!(json["code"], "InvalidParameterException");
        assert!(json.get("requestId").is_none());
    }

    #[test]
    fn service_error_keeps_status_and_metadata() {
        let raw = HttpResponse::new(StatusCode::try_from(404).unwrap(), SdkBody::empty());
        let err = StopTaskError::generic(
            ErrorMetadata::builder()
                .code("InvalidParameterException")
                .message("The referenced task was not found.")
                .build(),
        );

        let mapped = OrchestrationError::from(SdkError::service_error(err, raw));

        assert_eq!(mapped.status_code, 404);
        assert_eq!(mapped.code.as_deref(), Some("InvalidParameterException"));
        assert_eq!(
            mapped.message.as_deref(),
            Some("The referenced task was not found.")
        );
    }

    #[test]
    fn error_without_response_is_500() {
        let err: SdkError<StopTaskError, HttpResponse> =
            SdkError::timeout_error("operation timed out after 3s");

        let mapped = OrchestrationError::from(err);

        assert_eq!(mapped.status_code, 500);
        assert_eq!(mapped.code, None);
        assert_eq!(mapped.request_id, None);
        assert!(mapped.message.unwrap().contains("timed out"));
    }
}
