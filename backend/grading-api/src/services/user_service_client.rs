use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::models::{OfficialTestResult, PracticeActivity};

const INTERNAL_API_KEY_HEADER: &str = "X-Internal-API-Key";

/// Downstream user-profile service. Both calls are idempotent on the remote
/// side, so they are safe to retry.
#[async_trait]
pub trait UserServiceClient: Send + Sync {
    async fn record_official_test_result(
        &self,
        user_id: &str,
        result: &OfficialTestResult,
    ) -> Result<()>;

    async fn record_practice_activity(
        &self,
        user_id: &str,
        activity: &PracticeActivity,
    ) -> Result<()>;
}

pub struct HttpUserServiceClient {
    http_client: Client,
    base_url: String,
    internal_api_key: String,
}

impl HttpUserServiceClient {
    pub fn new(base_url: String, internal_api_key: String, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build user service HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_api_key,
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: String, body: &T) -> Result<()> {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .header(INTERNAL_API_KEY_HEADER, &self.internal_api_key)
            .json(body)
            .send()
            .await
            .context("Failed to call user service")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "user service returned status {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl UserServiceClient for HttpUserServiceClient {
    async fn record_official_test_result(
        &self,
        user_id: &str,
        result: &OfficialTestResult,
    ) -> Result<()> {
        self.post(
            format!("/api/v1/internal/users/{}/test-results", user_id),
            result,
        )
        .await
    }

    async fn record_practice_activity(
        &self,
        user_id: &str,
        activity: &PracticeActivity,
    ) -> Result<()> {
        self.post(
            format!("/api/v1/internal/users/{}/practice-activities", user_id),
            activity,
        )
        .await
    }
}
