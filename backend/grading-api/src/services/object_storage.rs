use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::ObjectStorageSettings;

type HmacSha256 = Hmac<Sha256>;

const AWS_URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const PRESIGNED_AUDIO_TTL: Duration = Duration::from_secs(15 * 60);

/// S3-compatible bucket holding uploaded speaking recordings. Only reads are
/// needed here: objects are fetched through SigV4 presigned URLs.
#[derive(Clone, Debug)]
pub struct ObjectStorageClient {
    bucket: String,
    region: String,
    endpoint: Url,
    access_key: String,
    secret_key: String,
}

impl ObjectStorageClient {
    pub fn new(settings: ObjectStorageSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", settings.region));

        let endpoint = Url::parse(&endpoint).context("Invalid object storage endpoint URL")?;
        if endpoint.host_str().is_none() {
            bail!("Object storage endpoint must include a host");
        }

        // Enforce HTTPS in production mode (check APP_ENV at runtime)
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "prod".to_string());
        if app_env == "prod" && endpoint.scheme() != "https" {
            bail!(
                "Object storage endpoint must use HTTPS in production mode. Got: {}",
                endpoint.scheme()
            );
        }

        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            bail!(
                "Invalid endpoint scheme: {}. Must be http or https.",
                endpoint.scheme()
            );
        }

        Ok(Self {
            bucket: settings.bucket,
            region: settings.region,
            access_key: settings.access_key,
            secret_key: settings.secret_key,
            endpoint,
        })
    }

    /// Object key for a reference that lives in this bucket: either a bare key
    /// (`audio/abc.mp3`) or a path-style URL on the storage endpoint.
    pub fn object_key_for(&self, reference: &str) -> Option<String> {
        let Ok(url) = Url::parse(reference) else {
            let key = reference.trim_matches('/');
            return (!key.is_empty()).then(|| key.to_string());
        };

        if url.host_str() != self.endpoint.host_str() || url.port() != self.endpoint.port() {
            return None;
        }

        let path = url.path().trim_start_matches('/');
        let key = path.strip_prefix(&format!("{}/", self.bucket))?;
        let key = percent_decode_str(key).decode_utf8().ok()?;
        (!key.is_empty()).then(|| key.into_owned())
    }

    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, encode_key(key))
    }

    fn canonical_query_string(params: &BTreeMap<String, String>) -> String {
        params
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, AWS_URI_ENCODE_SET),
                    utf8_percent_encode(value, AWS_URI_ENCODE_SET)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn generate_presigned_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let ttl_secs = ttl.as_secs().min(604800) as u32;
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let canonical_uri = self.canonical_uri(key);

        let mut params = BTreeMap::new();
        params.insert("X-Amz-Algorithm".into(), "AWS4-HMAC-SHA256".into());
        params.insert(
            "X-Amz-Credential".into(),
            format!("{}/{}", self.access_key, scope),
        );
        params.insert("X-Amz-Date".into(), amz_date.clone());
        params.insert("X-Amz-Expires".into(), ttl_secs.to_string());
        params.insert("X-Amz-SignedHeaders".into(), "host".into());

        let canonical_query = Self::canonical_query_string(&params);
        let host = self.host_header()?;

        let canonical_headers = format!("host:{}\n", host);
        let signed_headers = "host";
        let payload_hash = "UNSIGNED-PAYLOAD";

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let hashed_canonical_request = Sha256::digest(canonical_request.as_bytes());
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(hashed_canonical_request)
        );

        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region, "s3")?;
        let signature = hex::encode(hmac_sign(&signing_key, string_to_sign.as_bytes())?);

        let mut final_query = params;
        final_query.insert("X-Amz-Signature".into(), signature);
        let query_with_signature = Self::canonical_query_string(&final_query);

        let mut url = self.endpoint.clone();
        url.set_path(&format!("{}/{}", self.bucket, encode_key(key)));
        url.set_query(Some(&query_with_signature));

        Ok(url.to_string())
    }

    fn host_header(&self) -> Result<String> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| anyhow!("Object storage endpoint missing host"))?
            .to_lowercase();
        Ok(match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        })
    }
}

/// Downloads speaking audio. Recordings stored in our bucket are fetched via a
/// presigned URL; anything else must be a plain http(s) URL.
#[derive(Clone)]
pub struct AudioFetcher {
    http: Client,
    storage: Option<ObjectStorageClient>,
}

impl AudioFetcher {
    pub fn new(http: Client, storage: Option<ObjectStorageClient>) -> Self {
        Self { http, storage }
    }

    pub fn resolve_url(&self, reference: &str) -> Result<String> {
        if let Some(storage) = &self.storage {
            if let Some(key) = storage.object_key_for(reference) {
                return storage.generate_presigned_download_url(&key, PRESIGNED_AUDIO_TTL);
            }
        }

        let url = Url::parse(reference)
            .with_context(|| format!("Audio reference is not a URL: {}", reference))?;
        match url.scheme() {
            "http" | "https" => Ok(url.to_string()),
            other => bail!("Unsupported audio URL scheme: {}", other),
        }
    }

    pub async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let url = self.resolve_url(reference)?;

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to download audio")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Audio download returned status {}", status.as_u16());
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read audio body")?;
        tracing::debug!(bytes = bytes.len(), "Downloaded speaking audio");
        Ok(bytes.to_vec())
    }
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, AWS_URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let mut key = format!("AWS4{}", secret).into_bytes();
    key = hmac_sign(&key, date)?;
    key = hmac_sign(&key, region)?;
    key = hmac_sign(&key, service)?;
    hmac_sign(&key, b"aws4_request")
}

fn hmac_sign(key: &[u8], message: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| anyhow!("HMAC key error: {}", e))?;
    mac.update(message.as_ref());
    Ok(mac.finalize().into_bytes().to_vec())
}
