use std::sync::Arc;

use redrive::{AwsBroker, BrokerSettings, QueueService};
use testcontainers::ContainerAsync;
use testcontainers_modules::{
    localstack::LocalStack,
    testcontainers::{runners::AsyncRunner, ImageExt, TestcontainersError},
};

pub async fn localstack() -> Result<(String, ContainerAsync<LocalStack>), TestcontainersError> {
    let request = LocalStack::default()
        .with_tag("latest")
        .with_env_var("SERVICES", "sqs,sns")
        .with_env_var("SKIP_SSL_CERT_DOWNLOAD", "1");
    let container = request.start().await?;

    let host_ip = container.get_host().await?;
    let host_port = container.get_host_port_ipv4(4566).await?;
    let endpoint_url = format!("http://{host_ip}:{host_port}");

    Ok((endpoint_url, container))
}

/// A service talking to the LocalStack instance at `endpoint_url`.
pub async fn local_service(endpoint_url: &str) -> (Arc<AwsBroker>, QueueService) {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = BrokerSettings::local(Some(endpoint_url))
        .load()
        .await
        .unwrap();
    let broker = Arc::new(AwsBroker::from_config(config));
    (broker.clone(), QueueService::new(broker))
}
