use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_core::Stream;
use futures_util::StreamExt;
use log::warn;
use reqwest::Client;
use serde::Deserialize;

use crate::provider::{Provider, ProviderError, Token, TokenStream};
use crate::types::{Message, Role};

/// Google Gemini chat provider.
///
/// Uses the Gemini REST API with streaming enabled via SSE (alt=sse).
/// Roles are "user" and "model", system text goes in a separate
/// `systemInstruction` field, and consecutive same-role messages are merged.
/// Images attached to user messages are sent inline as base64.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    system_prompt: String,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(
        api_key: &str,
        model: &str,
        endpoint: &str,
        system_prompt: &str,
        temperature: f32,
    ) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            system_prompt: system_prompt.to_string(),
            temperature,
        }
    }
}

pub(crate) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("failed to build HTTP client")
}

/// Build a Gemini REST URL for `model` and `method`.
pub(crate) fn model_url(endpoint: &str, model: &str, method: &str, api_key: &str) -> String {
    let separator = if method.contains('?') { '&' } else { '?' };
    format!(
        "{}/v1beta/models/{}:{}{}key={}",
        endpoint.trim_end_matches('/'),
        model,
        method,
        separator,
        api_key
    )
}

// --- Request body construction ---

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Read an image file into a Gemini `inlineData` part.
pub(crate) async fn inline_image_part(path: &Path) -> Result<serde_json::Value, ProviderError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ProviderError::Image(format!("failed to read '{}': {e}", path.display())))?;
    Ok(serde_json::json!({
        "inlineData": {
            "mimeType": mime_type(path),
            "data": STANDARD.encode(bytes),
        }
    }))
}

/// Convert messages to Gemini's `contents` format.
///
/// Gemini requires alternating roles, so consecutive messages with the same
/// role are merged into a single `contents` entry with multiple parts.
///
/// Only the image on the latest user message must be readable. Images from
/// earlier turns that can no longer be read are left out.
async fn to_gemini_contents(messages: &[Message]) -> Result<Vec<serde_json::Value>, ProviderError> {
    let current = messages.iter().rposition(|m| m.role == Role::User);
    let mut result: Vec<serde_json::Value> = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let msg = &messages[i];

        // System messages go in systemInstruction, not contents.
        if msg.role == Role::System {
            i += 1;
            continue;
        }

        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "model",
            Role::System => unreachable!(),
        };

        let mut parts = Vec::new();
        while i < messages.len() && messages[i].role == msg.role {
            parts.push(serde_json::json!({ "text": messages[i].text }));
            if let Some(image) = &messages[i].image_path {
                match inline_image_part(Path::new(image)).await {
                    Ok(part) => parts.push(part),
                    Err(e) if Some(i) == current => return Err(e),
                    Err(e) => warn!("leaving image out of earlier turn: {e}"),
                }
            }
            i += 1;
        }

        result.push(serde_json::json!({
            "role": role,
            "parts": parts,
        }));
    }

    Ok(result)
}

fn system_instruction(messages: &[Message], system_prompt: &str) -> Option<serde_json::Value> {
    let parts: Vec<serde_json::Value> = std::iter::once(system_prompt)
        .chain(
            messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.text.as_str()),
        )
        .filter(|text| !text.is_empty())
        .map(|text| serde_json::json!({ "text": text }))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "parts": parts }))
    }
}

/// Build the request body for Gemini's streamGenerateContent endpoint.
async fn build_request_body(
    messages: &[Message],
    system_prompt: &str,
    temperature: f32,
) -> Result<serde_json::Value, ProviderError> {
    let mut body = serde_json::json!({
        "contents": to_gemini_contents(messages).await?,
        "generationConfig": { "temperature": temperature },
    });

    if let Some(instruction) = system_instruction(messages, system_prompt) {
        body["systemInstruction"] = instruction;
    }

    Ok(body)
}

// --- Response types ---

#[derive(Deserialize)]
pub(crate) struct GeminiChunk {
    pub(crate) candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
pub(crate) struct GeminiCandidate {
    pub(crate) content: Option<GeminiContent>,
}

#[derive(Deserialize)]
pub(crate) struct GeminiContent {
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
pub(crate) struct GeminiPart {
    pub(crate) text: Option<String>,
}

impl GeminiChunk {
    /// All non-empty text parts, in order.
    pub(crate) fn texts(self) -> Vec<String> {
        self.candidates
            .into_iter()
            .flatten()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
}

// --- SSE parsing ---

/// Parse a single `data:` line from Gemini's SSE stream.
fn parse_gemini_sse_line(line: &str) -> Result<Vec<Token>, ProviderError> {
    let data = match line.strip_prefix("data: ") {
        Some(d) => d,
        None => return Ok(Vec::new()),
    };

    if data.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chunk: GeminiChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON in SSE: {e}")))?;

    Ok(chunk.texts().into_iter().map(|text| Token { text }).collect())
}

/// Convert a streaming response body into a TokenStream.
///
/// Bytes are buffered until a full line arrives, so a UTF-8 character split
/// across network chunks is decoded intact.
fn parse_gemini_stream<S, B, E>(byte_stream: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::try_stream! {
        let mut byte_stream = Box::pin(byte_stream);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = byte_stream.next().await {
            buffer.extend_from_slice(
                chunk
                    .map_err(|e| ProviderError::Network(e.to_string()))?
                    .as_ref(),
            );

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..pos])
                    .trim_end_matches('\r')
                    .to_string();

                for token in parse_gemini_sse_line(&line)? {
                    yield token;
                }
            }
        }

        let remaining = String::from_utf8_lossy(&buffer).trim().to_string();
        if !remaining.is_empty() {
            for token in parse_gemini_sse_line(&remaining)? {
                yield token;
            }
        }
    };

    Box::pin(stream)
}

/// Map HTTP error status to ProviderError.
pub(crate) fn map_gemini_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<GeminiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        400 | 401 | 403 => {
            if body.contains("API key") || body.contains("authentication") {
                ProviderError::Auth(message)
            } else {
                ProviderError::MalformedResponse(message)
            }
        }
        429 => ProviderError::RateLimit(message),
        500..=599 => ProviderError::Network(format!("HTTP {status}: {message}")),
        _ => ProviderError::Other(format!("HTTP {status}: {message}")),
    }
}

// --- Provider implementation ---

impl Provider for GeminiProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<TokenStream, ProviderError> {
        let url = model_url(
            &self.endpoint,
            &self.model,
            "streamGenerateContent?alt=sse",
            &self.api_key,
        );

        let body = build_request_body(&messages, &self.system_prompt, self.temperature).await?;

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_gemini_error(status.as_u16(), &body_text));
        }

        Ok(parse_gemini_stream(response.bytes_stream()))
    }
}
