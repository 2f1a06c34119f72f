//! Test doubles for the embedder, vision services and chat provider.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use crate::embedding::{EmbedError, Embedder, normalize};
use crate::provider::{Provider, ProviderError, Token, TokenStream};
use crate::types::Message;
use crate::vision::{ImageDescriber, ImageMetadata, MetadataAnalyzer, VisionError, VisionFuture};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Deterministic embedder.
///
/// Registered texts and image file names map to fixed vectors. Other texts,
/// and images that exist on disk, get a vector derived from their bytes.
/// Missing images fail like a real model would.
pub struct MockEmbedder {
    dimensions: usize,
    texts: HashMap<String, Vec<f32>>,
    images: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            texts: HashMap::new(),
            images: HashMap::new(),
        }
    }

    pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.texts.insert(text.to_string(), vector);
        self
    }

    /// Register a vector for any image whose file name is `name`.
    pub fn with_image(mut self, name: &str, vector: Vec<f32>) -> Self {
        self.images.insert(name.to_string(), vector);
        self
    }

    fn derived(&self, seed: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for (i, byte) in seed.bytes().enumerate() {
            v[i % self.dimensions] += byte as f32;
        }
        normalize(&mut v);
        v
    }

    fn unit(vector: &[f32]) -> Vec<f32> {
        let mut v = vector.to_vec();
        normalize(&mut v);
        v
    }
}

impl Embedder for MockEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(match self.texts.get(text) {
            Some(v) => Self::unit(v),
            None => self.derived(text),
        })
    }

    fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EmbedError> {
        let name = file_name(path);
        if let Some(v) = self.images.get(&name) {
            return Ok(Self::unit(v));
        }
        if path.is_file() {
            return Ok(self.derived(&name));
        }
        Err(EmbedError::EncodingFailed(format!(
            "cannot open image '{}'",
            path.display()
        )))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn provider_type(&self) -> &str {
        "mock"
    }
}

/// Describes every image as "A photo of {file stem}"; named files can fail.
#[derive(Default)]
pub struct MockDescriber {
    failing: HashSet<String>,
}

impl MockDescriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

impl ImageDescriber for MockDescriber {
    fn describe<'a>(&'a self, image: &'a Path) -> VisionFuture<'a, String> {
        Box::pin(async move {
            if self.failing.contains(&file_name(image)) {
                return Err(VisionError::MalformedResponse("empty description".into()));
            }
            let stem = image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(format!("A photo of {stem}"))
        })
    }
}

/// Returns fixed metadata and records the languages it was asked for.
pub struct MockAnalyzer {
    metadata: ImageMetadata,
    pub languages: Mutex<Vec<String>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::with_metadata(ImageMetadata {
            detected_objects: vec!["object".into()],
            color_palette: vec!["red".into(), "blue".into()],
            potential_use_cases: Vec::new(),
            tags: vec!["photo".into(), "sample".into()],
        })
    }

    pub fn with_metadata(metadata: ImageMetadata) -> Self {
        Self {
            metadata,
            languages: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataAnalyzer for MockAnalyzer {
    fn analyze<'a>(&'a self, _image: &'a Path, language: &'a str) -> VisionFuture<'a, ImageMetadata> {
        Box::pin(async move {
            self.languages.lock().unwrap().push(language.to_string());
            Ok(self.metadata.clone())
        })
    }
}

/// Streams fixed tokens and records every message list it receives.
#[derive(Default)]
pub struct MockProvider {
    pub tokens: Vec<String>,
    pub fail: bool,
    pub received: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    /// A provider whose every call fails with a network error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.received.lock().unwrap().last().cloned()
    }
}

impl Provider for MockProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<TokenStream, ProviderError> {
        self.received.lock().unwrap().push(messages);
        if self.fail {
            return Err(ProviderError::Network("connection refused".into()));
        }
        let tokens = self.tokens.clone();
        let stream = async_stream::try_stream! {
            for text in tokens {
                yield Token { text };
            }
        };
        Ok(Box::pin(stream))
    }
}
