use super::UploadStrategy;
use crate::cdn::{encode_object_name, CdnUrlResolver};
use crate::models::{
    AuthorizeAccountResponse, B2Credentials, GetUploadUrlRequest, GetUploadUrlResponse,
    ImagePayload, UploadMethod, DEFAULT_B2_API_URL,
};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

const AUTHORIZE_ACCOUNT_PATH: &str = "/b2api/v2/b2_authorize_account";
const GET_UPLOAD_URL_PATH: &str = "/b2api/v2/b2_get_upload_url";
/// Sentinel accepted by B2 in place of a SHA-1 digest.
const SKIP_CONTENT_SHA1: &str = "do_not_verify";

/// Native B2 API upload: authorize, fetch a single-use upload URL, POST the bytes.
///
/// Nothing is cached between calls. Every upload re-authorizes, which costs two
/// extra round trips but never trips over an expired token.
pub struct B2ApiUpload {
    client: Client,
    credentials: B2Credentials,
    bucket_id: String,
    api_url: String,
    cdn: CdnUrlResolver,
}

impl B2ApiUpload {
    pub fn new(credentials: B2Credentials, bucket_id: String, cdn: CdnUrlResolver) -> Self {
        Self::new_with_client(credentials, bucket_id, cdn, Client::new())
    }

    pub fn new_with_client(
        credentials: B2Credentials,
        bucket_id: String,
        cdn: CdnUrlResolver,
        client: Client,
    ) -> Self {
        Self {
            client,
            credentials,
            bucket_id,
            api_url: DEFAULT_B2_API_URL.to_string(),
            cdn,
        }
    }

    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    async fn authorize_account(&self) -> Result<AuthorizeAccountResponse> {
        let url = format!("{}{}", self.api_url, AUTHORIZE_ACCOUNT_PATH);
        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.credentials.key_id,
                Some(&self.credentials.application_key),
            )
            .send()
            .await?;

        parse_json(response, "b2_authorize_account").await
    }

    async fn get_upload_url(
        &self,
        auth: &AuthorizeAccountResponse,
    ) -> Result<GetUploadUrlResponse> {
        let url = format!(
            "{}{}",
            auth.api_url.trim_end_matches('/'),
            GET_UPLOAD_URL_PATH
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", &auth.authorization_token)
            .json(&GetUploadUrlRequest {
                bucket_id: self.bucket_id.clone(),
            })
            .send()
            .await?;

        parse_json(response, "b2_get_upload_url").await
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response, call: &str) -> Result<T> {
    let response = check_status(response, call).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!("Failed to parse {} response: {}", call, e);
        Error::B2Api(format!("Failed to parse {} response: {}", call, e))
    })
}

async fn check_status(response: Response, call: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(Error::B2Api(format!(
        "{} failed (status {}): {}",
        call, status, error_text
    )))
}

fn upload_timestamp_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[async_trait]
impl UploadStrategy for B2ApiUpload {
    fn method(&self) -> UploadMethod {
        UploadMethod::DirectB2Api
    }

    async fn upload(&self, payload: &ImagePayload) -> Result<String> {
        let auth = self.authorize_account().await?;
        let target = self.get_upload_url(&auth).await?;

        let response = self
            .client
            .post(&target.upload_url)
            .header("Authorization", &target.authorization_token)
            .header("X-Bz-File-Name", encode_object_name(&payload.filename))
            .header("Content-Type", &payload.content_type)
            .header("X-Bz-Content-Sha1", SKIP_CONTENT_SHA1)
            .header("X-Bz-Upload-Timestamp", upload_timestamp_millis())
            .body(payload.bytes.clone())
            .send()
            .await?;
        check_status(response, "b2_upload_file").await?;

        tracing::debug!(
            "Stored {} ({} bytes) via B2 API",
            payload.filename,
            payload.len()
        );
        Ok(self.cdn.resolve(&payload.filename))
    }

    async fn preflight(&self) -> Result<()> {
        self.authorize_account().await.map(|_| ())
    }
}

/// Build a client whose requests give up after `timeout`.
pub fn client_with_timeout(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}
