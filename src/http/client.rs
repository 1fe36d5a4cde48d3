//! Authenticated JSON client with Google error decoding.

use std::io::Write;

use log::debug;
use reqwest::{Method, Url};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::Credentials;
use crate::error::{GapiError, Result};

pub const USER_AGENT: &str = "gapi-helper";

const MULTIPART_BOUNDARY: &str = "gapi_helper_related_boundary";

/// HTTP client bound to one API host and one set of credentials.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Builds a client that sends `credentials` as a bearer token on every
    /// request to `base_url`.
    pub fn new(base_url: impl Into<String>, credentials: &Credentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth_value = HeaderValue::from_str(&credentials.bearer())
            .map_err(|e| GapiError::Credentials(format!("unusable access token: {}", e)))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves `path` against the base URL; absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Appends percent-encoded `segments` to the base URL. Used for
    /// resources whose names may contain `/`, `'` or spaces, such as A1
    /// ranges.
    pub fn segment_url(&self, segments: &[&str]) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| GapiError::Unexpected(format!("invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| GapiError::Unexpected(format!("cannot add path to {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    #[tracing::instrument(skip(self, query))]
    pub fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path);
        debug!("GET JSON from {}...", url);
        let response = send(self.client.get(&url).query(query))?;
        Ok(response.json::<T>()?)
    }

    /// Sends `body` as JSON and decodes the JSON answer.
    #[tracing::instrument(skip(self, query, body))]
    pub fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("{} JSON to {}...", method, url);
        let response = send(self.client.request(method, &url).query(query).json(body))?;
        Ok(response.json::<T>()?)
    }

    /// Sends a request without body and discards whatever comes back.
    #[tracing::instrument(skip(self, query))]
    pub fn send_empty(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<()> {
        let url = self.url(path);
        debug!("{} {}...", method, url);
        send(self.client.request(method, &url).query(query))?;
        Ok(())
    }

    /// Uploads `media` with its JSON metadata as one `multipart/related`
    /// request (Drive's `uploadType=multipart`).
    #[tracing::instrument(skip(self, query, metadata, media))]
    pub fn upload_multipart<M, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        metadata: &M,
        media: &[u8],
        mime_type: &str,
    ) -> Result<T>
    where
        M: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("Uploading {} bytes ({}) to {}...", media.len(), mime_type, url);
        let body = multipart_related(&serde_json::to_vec(metadata)?, media, mime_type);
        let response = send(
            self.client
                .request(method, &url)
                .query(query)
                .header(
                    CONTENT_TYPE,
                    format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
                )
                .body(body),
        )?;
        Ok(response.json::<T>()?)
    }

    /// Streams the body of `path` into `writer`.
    ///
    /// Returns the number of bytes written and the response content type.
    #[tracing::instrument(skip(self, query, writer))]
    pub fn download<W: Write + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        writer: &mut W,
    ) -> Result<(u64, Option<String>)> {
        let url = self.url(path);
        debug!("Downloading file from {}...", url);
        let mut response = send(self.client.get(&url).query(query))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.copy_to(writer)?;

        debug!("Downloaded {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
        Ok((bytes, content_type))
    }
}

fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send()?;
    check_status(response)
}

/// Turns non-success responses into [`GapiError::Http`], keeping Google's
/// error message when the body carries one.
fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(GapiError::Http {
        status: status.as_u16(),
        message: google_error_message(&body),
    })
}

/// Extracts `error.message` from a Google JSON error body, or falls back to
/// the raw body.
fn google_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn multipart_related(metadata: &[u8], media: &[u8], mime_type: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}
