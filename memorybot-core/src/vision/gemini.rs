use std::path::Path;

use reqwest::Client;

use crate::provider::ProviderError;
use crate::provider::gemini::{GeminiChunk, http_client, inline_image_part, map_gemini_error, model_url};
use crate::vision::{ImageDescriber, ImageMetadata, MetadataAnalyzer, VisionError, VisionFuture};

const DESCRIBE_PROMPT: &str = "Describe the image in one paragraph, covering the following aspects:\n\
Visual Elements: the main subjects, people, objects or key features, including their appearance, colors, sizes and placement in the frame.\n\
Setting/Environment: the location, time of day, weather and key background details.\n\
Action/Emotion: any actions, interactions or emotional undertones.\n\
Context/Story: the likely story or context, and how the image makes you feel.\n\
Additional Details: notable lighting, textures, angles or symbolic elements.\n\
Be descriptive while keeping it concise.";

const ANALYZE_INSTRUCTION: &str = "Analyze the provided image and generate professional metadata \
with the following structure: detected objects, color palette, potential use cases, and tags. \
Answer with a single JSON object with the keys \"detected_objects\", \"color_palette\", \
\"potential_use_cases\" and \"tags\", each a list of strings.";

/// Image description and metadata analysis through Gemini `generateContent`.
pub struct GeminiVision {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiVision {
    pub fn new(api_key: &str, model: &str, endpoint: &str) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    async fn generate(&self, body: serde_json::Value) -> Result<String, ProviderError> {
        let url = model_url(&self.endpoint, &self.model, "generateContent", &self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(map_gemini_error(status.as_u16(), &text));
        }

        let chunk: GeminiChunk = serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {e}")))?;
        Ok(chunk.texts().concat())
    }
}

fn describe_body(image_part: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": DESCRIBE_PROMPT }, image_part],
        }],
    })
}

fn analyze_body(image_part: serde_json::Value, language: &str) -> serde_json::Value {
    serde_json::json!({
        "systemInstruction": {
            "parts": [{ "text": format!("{ANALYZE_INSTRUCTION} Provide the metadata in {language}.") }],
        },
        "contents": [{
            "role": "user",
            "parts": [{ "text": "Analyze this image:" }, image_part],
        }],
        "generationConfig": { "responseMimeType": "application/json" },
    })
}

/// Parse the model's JSON answer, tolerating a surrounding Markdown code fence.
fn parse_metadata(text: &str) -> Result<ImageMetadata, VisionError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim())
        .map_err(|e| VisionError::MalformedResponse(format!("metadata is not valid JSON: {e}")))
}

impl ImageDescriber for GeminiVision {
    fn describe<'a>(&'a self, image: &'a Path) -> VisionFuture<'a, String> {
        Box::pin(async move {
            let part = inline_image_part(image).await?;
            let description = self.generate(describe_body(part)).await?;
            if description.trim().is_empty() {
                return Err(VisionError::MalformedResponse(
                    "empty description".to_string(),
                ));
            }
            Ok(description.trim().to_string())
        })
    }
}

impl MetadataAnalyzer for GeminiVision {
    fn analyze<'a>(&'a self, image: &'a Path, language: &'a str) -> VisionFuture<'a, ImageMetadata> {
        Box::pin(async move {
            let part = inline_image_part(image).await?;
            let text = self.generate(analyze_body(part, language)).await?;
            parse_metadata(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_body_requests_json_in_language() {
        let body = analyze_body(serde_json::json!({ "inlineData": {} }), "German");
        let instruction = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(instruction.ends_with("Provide the metadata in German."));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn describe_body_sends_prompt_then_image() {
        let body = describe_body(serde_json::json!({ "inlineData": {} }));
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["text"], DESCRIBE_PROMPT);
        assert!(parts[1].get("inlineData").is_some());
    }

    #[test]
    fn parse_metadata_plain_json() {
        let meta = parse_metadata(
            r#"{"detected_objects":["girl","flowers"],"color_palette":["red"],"potential_use_cases":[],"tags":["spring"]}"#,
        )
        .unwrap();
        assert_eq!(meta.detected_objects, vec!["girl", "flowers"]);
        assert_eq!(meta.tags, vec!["spring"]);
    }

    #[test]
    fn parse_metadata_fenced_json() {
        let meta = parse_metadata("```json\n{\"tags\":[\"a\"]}\n```").unwrap();
        assert_eq!(meta.tags, vec!["a"]);
    }

    #[test]
    fn parse_metadata_rejects_prose() {
        assert!(matches!(
            parse_metadata("This image shows a girl."),
            Err(VisionError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn unreadable_image_fails_before_request() {
        let vision = GeminiVision::new("k", "gemini-2.0-flash", "http://localhost:1");
        let err = vision
            .describe(Path::new("/nonexistent/girl.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Service(ProviderError::Image(_))));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("girl.jpg");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let vision = GeminiVision::new("k", "gemini-2.0-flash", "http://localhost:1");
        let err = vision.analyze(&path, "English").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
