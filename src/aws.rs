use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, SdkConfig};
use aws_types::region::Region;
use log::debug;

const DEFAULT_REGION: &str = "us-east-1";

/// Loads the shared AWS configuration, falling back to us-east-1 when no region is configured.
pub async fn load_shared_config() -> SdkConfig {
    let region_provider = RegionProviderChain::default_provider().or_else(Region::new(DEFAULT_REGION));

    let shared_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    debug!("Loaded AWS config for region {:?}", shared_config.region());
    shared_config
}

/// Builds an ECS client, optionally pointed at a compatible local endpoint.
pub fn ecs_client(shared_config: &SdkConfig, endpoint: Option<&str>) -> aws_sdk_ecs::Client {
    let mut config = aws_sdk_ecs::config::Builder::from(shared_config);
    if let Some(ep) = endpoint {
        config = config.endpoint_url(ep);
    }
    aws_sdk_ecs::Client::from_conf(config.build())
}

/// Builds an S3 client. An endpoint override switches to path-style addressing,
/// which is what MinIO and other local S3 services expect.
pub fn s3_client(shared_config: &SdkConfig, endpoint: Option<&str>) -> aws_sdk_s3::Client {
    let mut config = aws_sdk_s3::config::Builder::from(shared_config);
    if let Some(ep) = endpoint {
        config = config.endpoint_url(ep).force_path_style(true);
    }
    aws_sdk_s3::Client::from_conf(config.build())
}
