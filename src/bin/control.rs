use std::sync::Arc;

use anyhow::{anyhow, Result};
use lambda_runtime::{run, service_fn, LambdaEvent};
use log::info;
use serde_json::Value;

use meeting_recorder::api::{self, SharedOrchestrator};
use meeting_recorder::config::ControlConfig;
use meeting_recorder::orchestrator::EcsOrchestrator;
use meeting_recorder::{aws, dispatcher};

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ControlConfig::from_env()?;
    let shared_config = aws::load_shared_config().await;
    let client = aws::ecs_client(&shared_config, config.ecs_endpoint.as_deref());
    let orchestrator: SharedOrchestrator = Arc::new(EcsOrchestrator::new(client, config));

    // Deployed as a Lambda behind API Gateway; anywhere else serve the same handler locally.
    if std::env::var_os("AWS_LAMBDA_RUNTIME_API").is_some() {
        info!("Starting control function on the Lambda runtime");
        run(service_fn(move |event: LambdaEvent<Value>| {
            let orchestrator = orchestrator.clone();
            async move {
                let response = dispatcher::handle(orchestrator.as_ref(), &event.payload).await;
                Ok::<_, lambda_runtime::Error>(response)
            }
        }))
        .await
        .map_err(|e| anyhow!("lambda runtime failed: {}", e))?;
    } else {
        let bind = std::env::var("CONTROL_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
        api::run_api_server(orchestrator, &bind).await?;
    }

    Ok(())
}
