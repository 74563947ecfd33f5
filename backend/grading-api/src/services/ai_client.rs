use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{SpeakingEvaluation, Transcription, WritingEvaluation};
use crate::services::object_storage::AudioFetcher;

/// External AI provider. Every failure is a plain error; retrying is the
/// caller's business.
#[async_trait]
pub trait AiEvaluator: Send + Sync {
    async fn evaluate_writing(
        &self,
        essay_text: &str,
        task_type: &str,
        prompt_text: &str,
    ) -> Result<WritingEvaluation>;

    async fn transcribe_audio(&self, audio_url: &str) -> Result<Transcription>;

    async fn evaluate_speaking(
        &self,
        transcript_text: &str,
        part_number: i32,
    ) -> Result<SpeakingEvaluation>;
}

#[derive(Debug, Serialize)]
struct WritingEvaluationRequest<'a> {
    essay_text: &'a str,
    task_type: &'a str,
    prompt_text: &'a str,
}

#[derive(Debug, Serialize)]
struct SpeakingEvaluationRequest<'a> {
    transcript_text: &'a str,
    part_number: i32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpAiEvaluator {
    http_client: Client,
    base_url: String,
    audio: AudioFetcher,
}

impl HttpAiEvaluator {
    pub fn new(base_url: String, timeout: Duration, audio: AudioFetcher) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build AI service HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            audio,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/ai/internal/{}", self.base_url, path)
    }

    async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "AI service returned status {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            );
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .context("Failed to parse AI service response")?;

        match (envelope.success, envelope.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(anyhow!(
                "AI service reported failure: {}",
                envelope.error.unwrap_or_else(|| "no data".to_string())
            )),
        }
    }
}

#[async_trait]
impl AiEvaluator for HttpAiEvaluator {
    async fn evaluate_writing(
        &self,
        essay_text: &str,
        task_type: &str,
        prompt_text: &str,
    ) -> Result<WritingEvaluation> {
        let response = self
            .http_client
            .post(self.url("writing/evaluate"))
            .json(&WritingEvaluationRequest {
                essay_text,
                task_type,
                prompt_text,
            })
            .send()
            .await
            .context("Failed to call AI writing evaluation")?;

        Self::read_envelope(response).await
    }

    async fn transcribe_audio(&self, audio_url: &str) -> Result<Transcription> {
        let bytes = self.audio.fetch(audio_url).await?;
        let file_name = audio_url
            .rsplit('/')
            .next()
            .and_then(|name| name.split('?').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("audio")
            .to_string();

        let form = multipart::Form::new().part(
            "audio",
            multipart::Part::bytes(bytes).file_name(file_name),
        );

        let response = self
            .http_client
            .post(self.url("speaking/transcribe"))
            .multipart(form)
            .send()
            .await
            .context("Failed to call AI transcription")?;

        Self::read_envelope(response).await
    }

    async fn evaluate_speaking(
        &self,
        transcript_text: &str,
        part_number: i32,
    ) -> Result<SpeakingEvaluation> {
        let response = self
            .http_client
            .post(self.url("speaking/evaluate"))
            .json(&SpeakingEvaluationRequest {
                transcript_text,
                part_number,
            })
            .send()
            .await
            .context("Failed to call AI speaking evaluation")?;

        Self::read_envelope(response).await
    }
}
