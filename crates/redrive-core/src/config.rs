//! Credential and region settings for the AWS broker.

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sqs::config::Credentials;

use crate::error::{Error, Result};

/// Endpoint used by `--local` when none is given.
pub const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

const REQUIRED_VARIABLES: [&str; 3] = ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_REGION"];

/// Where and how to reach the broker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Overrides the region resolved from the environment.
    pub region: Option<String>,
    /// Overrides the service endpoint, e.g. a LocalStack URL.
    pub endpoint_url: Option<String>,
    /// Use static `test` credentials against a local endpoint.
    pub local: bool,
}

impl BrokerSettings {
    /// Settings for a LocalStack instance.
    pub fn local(endpoint_url: Option<&str>) -> Self {
        Self {
            region: None,
            endpoint_url: Some(endpoint_url.unwrap_or(LOCALSTACK_ENDPOINT).to_string()),
            local: true,
        }
    }

    /// Checks that credentials and region are present in the environment.
    ///
    /// A missing variable is fatal at startup. Local settings skip the check.
    pub fn validate_env(&self) -> Result<()> {
        self.validate_with(|name| std::env::var(name).ok())
    }

    fn validate_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if self.local {
            return Ok(());
        }

        let missing: Vec<&str> = REQUIRED_VARIABLES
            .iter()
            .copied()
            .filter(|name| {
                if *name == "AWS_REGION" && self.region.is_some() {
                    return false;
                }
                lookup(name).map_or(true, |v| v.is_empty())
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "environment variable(s) not set: {}",
                missing.join(", ")
            )))
        }
    }

    /// Builds the AWS SDK config these settings describe.
    pub async fn load(&self) -> Result<SdkConfig> {
        self.validate_env()?;

        let region = aws_config::meta::region::RegionProviderChain::first_try(
            self.region.clone().map(aws_config::Region::new),
        )
        // supports loading region from known env variables
        .or_default_provider()
        .or_else(aws_config::Region::from_static("us-east-1"));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if self.local {
            loader = loader
                .credentials_provider(Credentials::new("test", "test", None, None, "static"))
                .endpoint_url(self.endpoint_url.as_deref().unwrap_or(LOCALSTACK_ENDPOINT));
        } else if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;
        log::debug!(
            "loaded AWS config for region {:?}",
            config.region().map(|r| r.as_ref().to_string())
        );
        Ok(config)
    }
}
