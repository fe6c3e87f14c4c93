//! Request handling for the control function.
//!
//! [`handle`] turns one API Gateway style event into one proxy response. Each
//! call builds its response from scratch, so concurrent invocations share
//! nothing but the orchestrator client.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Serializer, Value};

use crate::orchestrator::{Orchestrator, TaskRequest};

pub const INVALID_ACTION: &str = "Invalid parameter: action. Valid values 'start' & 'stop'";
pub const MISSING_START_PARAMS: &str = "Missing parameter: meetingURL or rtmpEndpoint";
pub const MISSING_TASK_ID: &str = "Missing parameter: taskId";
pub const INVALID_START_ENCODING: &str =
    "Invalid parameter encoding: meetingURL or rtmpEndpoint";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            other => Err(anyhow!("unknown action {:?}", other)),
        }
    }
}

/// Lambda proxy integration response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ControlResponse {
    fn new(status_code: u16, body: String) -> Self {
        ControlResponse {
            status_code,
            headers: HashMap::new(),
            body,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    input: &'a Value,
}

/// Serializes `value` pretty-printed with a one space indent, the format
/// existing callers of this endpoint parse.
fn to_body<T: Serialize + ?Sized>(value: &T) -> String {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b" "));
    if let Err(e) = value.serialize(&mut serializer) {
        error!("failed to serialize response body: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn bad_request(message: &str, event: &Value) -> ControlResponse {
    ControlResponse::new(400, to_body(&ErrorBody { message, input: event }))
}

/// Non-empty query string parameter `name`, if present.
fn query_param<'a>(event: &'a Value, name: &str) -> Option<&'a str> {
    event
        .get("queryStringParameters")
        .and_then(|params| params.get(name))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn decode_request(meeting_url: &str, rtmp_endpoint: &str) -> Result<TaskRequest> {
    Ok(TaskRequest {
        meeting_url: urlencoding::decode(meeting_url)?.into_owned(),
        rtmp_endpoint: urlencoding::decode(rtmp_endpoint)?.into_owned(),
    })
}

/// Dispatches one control event to the orchestrator.
pub async fn handle<O>(orchestrator: &O, event: &Value) -> ControlResponse
where
    O: Orchestrator + ?Sized,
{
    info!("event {}", event);

    let action = query_param(event, "action");
    if let Some(action) = action {
        info!("Broadcast Action: {}", action);
    }

    let response = match action.map(Action::from_str) {
        Some(Ok(Action::Start)) => start_recording(orchestrator, event).await,
        Some(Ok(Action::Stop)) => stop_recording(orchestrator, event).await,
        Some(Err(_)) | None => {
            let body = serde_json::to_string(&ErrorBody {
                message: INVALID_ACTION,
                input: event,
            })
            .unwrap_or_default();
            ControlResponse::new(400, body)
        }
    };

    info!(
        "response: {}",
        serde_json::to_string(&response).unwrap_or_default()
    );
    response
}

async fn start_recording<O>(orchestrator: &O, event: &Value) -> ControlResponse
where
    O: Orchestrator + ?Sized,
{
    let (Some(meeting_url), Some(rtmp_endpoint)) = (
        query_param(event, "meetingURL"),
        query_param(event, "rtmpEndpoint"),
    ) else {
        return bad_request(MISSING_START_PARAMS, event);
    };
    info!("Meeting URL: {}", meeting_url);
    info!("RTMP Endpoint: {}", rtmp_endpoint);

    let request = match decode_request(meeting_url, rtmp_endpoint) {
        Ok(request) => request,
        Err(e) => {
            warn!("could not decode start parameters: {}", e);
            return bad_request(INVALID_START_ENCODING, event);
        }
    };

    match orchestrator.run_task(&request).await {
        Ok(outcome) => match outcome.first_task_arn() {
            Some(task_arn) => ControlResponse::new(200, to_body(task_arn)),
            None => ControlResponse::new(200, to_body(&outcome)),
        },
        Err(err) => {
            error!("run task error: {}", err);
            ControlResponse::new(err.status_code, to_body(&err))
        }
    }
}

async fn stop_recording<O>(orchestrator: &O, event: &Value) -> ControlResponse
where
    O: Orchestrator + ?Sized,
{
    let Some(task_id) = query_param(event, "taskId") else {
        return bad_request(MISSING_TASK_ID, event);
    };
    info!("ECS task ID: {}", task_id);

    match orchestrator.stop_task(task_id).await {
        Ok(outcome) => ControlResponse::new(200, to_body(&outcome)),
        Err(err) => {
            error!("stop task error: {}", err);
            ControlResponse::new(err.status_code, to_body(&err))
        }
    }
}
