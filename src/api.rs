use std::collections::HashMap;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{get, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use log::info;
use serde_json::{json, Value};

use crate::dispatcher::{self, ControlResponse};
use crate::orchestrator::Orchestrator;

pub type SharedOrchestrator = Arc<dyn Orchestrator>;

/// Wraps a local request into the event shape API Gateway hands the function.
pub fn gateway_event(req: &HttpRequest, query: &HashMap<String, String>) -> Value {
    json!({
        "httpMethod": req.method().as_str(),
        "path": req.path(),
        "queryStringParameters": query,
    })
}

fn to_http(response: ControlResponse) -> HttpResponse {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    builder.content_type("application/json");
    for (name, value) in &response.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.body(response.body)
}

/// Start or stop a recording task.
///
/// # Example
/// ```shell
/// curl 'http://localhost:8080/?action=start&meetingURL=https%3A%2F%2Fmeet.example.com%2Fj%2F1&rtmpEndpoint=rtmp%3A%2F%2Flive.example.com%2Fapp%2Fkey'
/// curl 'http://localhost:8080/?action=stop&taskId=arn:aws:ecs:us-east-1:123456789012:task/rec/abc'
/// ```
///
/// # Returns
/// The task ARN (start), the stopped task (stop), or an error body with its status.
#[get("/")]
pub async fn control(
    req: HttpRequest,
    query: web::Query<HashMap<String, String>>,
    orchestrator: web::Data<SharedOrchestrator>,
) -> impl Responder {
    let event = gateway_event(&req, &query);
    let response = dispatcher::handle(orchestrator.get_ref().as_ref(), &event).await;
    to_http(response)
}

/// Run the local control API server
pub async fn run_api_server(orchestrator: SharedOrchestrator, bind: &str) -> std::io::Result<()> {
    info!("Control API listening on {}", bind);
    let data = web::Data::new(orchestrator);
    HttpServer::new(move || App::new().app_data(data.clone()).service(control))
        .bind(bind)?
        .run()
        .await
}
