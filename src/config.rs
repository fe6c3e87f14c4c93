use anyhow::anyhow;
use clap::Parser;

/// Deployment configuration of the control function.
#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub container_name: String,
    /// Optional endpoint override, e.g. a LocalStack instance.
    pub ecs_endpoint: Option<String>,
}

impl ControlConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("{} not found", name))
        };

        let cluster_arn = required("ecsClusterArn")?;
        // The variable name is misspelled in every deployed stack; keep it.
        let task_definition_arn = required("ecsTaskDefinationArn")?;
        let container_name = required("ecsContainerName")?;

        Ok(ControlConfig {
            cluster_arn,
            task_definition_arn,
            container_name,
            ecs_endpoint: lookup("ECS_ENDPOINT").filter(|v| !v.is_empty()),
        })
    }
}

/// Positional arguments of the recording task, as passed by the container entrypoint.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Records meeting audio and streams it to S3", long_about = None)]
pub struct RecordingArgs {
    /// Destination S3 bucket.
    pub bucket_name: String,

    /// Browser screen width. Not used by the audio pipeline.
    pub screen_width: Option<String>,

    /// Browser screen height. Not used by the audio pipeline.
    pub screen_height: Option<String>,

    /// Optional S3 endpoint override (for example "http://127.0.0.1:9000" for MinIO).
    #[arg(env = "S3_ENDPOINT", long)]
    pub s3_endpoint: Option<String>,
}

/// Environment handed to the container by the control function.
#[derive(Debug, Clone)]
pub struct RecordingEnv {
    pub meeting_url: String,
    pub display: Option<String>,
}

impl RecordingEnv {
    pub fn from_env() -> Self {
        RecordingEnv {
            meeting_url: std::env::var("MEETING_URL")
                .unwrap_or_else(|_| "Not present in environment".to_string()),
            display: std::env::var("DISPLAY").ok(),
        }
    }
}
