use std::path::Path;
use std::sync::Mutex;

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};

use super::{EmbedError, Embedder, normalize};

const TEXT_MODEL: EmbeddingModel = EmbeddingModel::ClipVitB32;
const IMAGE_MODEL: ImageEmbeddingModel = ImageEmbeddingModel::ClipVitB32;
const DEFAULT_DIMENSIONS: usize = 512;
const MODEL_NAME: &str = "clip-vit-base-patch32";

/// Local CLIP embedder using fastembed with ONNX runtime.
///
/// The text and vision towers of CLIP ViT-B/32 project into the same space, so
/// a text query can be compared directly against stored image vectors.
pub struct LocalEmbedder {
    text_model: Mutex<TextEmbedding>,
    image_model: Mutex<ImageEmbedding>,
}

impl LocalEmbedder {
    pub fn new() -> Result<Self, EmbedError> {
        let text_options = InitOptions::new(TEXT_MODEL).with_show_download_progress(true);
        let text_model = TextEmbedding::try_new(text_options)
            .map_err(|e| EmbedError::ModelLoad(format!("text model: {e}")))?;

        let image_options = ImageInitOptions::new(IMAGE_MODEL).with_show_download_progress(true);
        let image_model = ImageEmbedding::try_new(image_options)
            .map_err(|e| EmbedError::ModelLoad(format!("image model: {e}")))?;

        log::info!("loaded local embedder {MODEL_NAME} ({DEFAULT_DIMENSIONS}d)");
        Ok(Self {
            text_model: Mutex::new(text_model),
            image_model: Mutex::new(image_model),
        })
    }
}

fn first_unit_vector(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, EmbedError> {
    if vectors.is_empty() {
        return Err(EmbedError::EncodingFailed("model returned no vectors".into()));
    }
    let mut vector = vectors.swap_remove(0);
    normalize(&mut vector);
    Ok(vector)
}

impl Embedder for LocalEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut model = self.text_model.lock().unwrap();
        let vectors = model
            .embed(vec![text], None)
            .map_err(|e| EmbedError::EncodingFailed(e.to_string()))?;
        first_unit_vector(vectors)
    }

    fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EmbedError> {
        if !path.is_file() {
            return Err(EmbedError::EncodingFailed(format!(
                "image not found: {}",
                path.display()
            )));
        }
        let mut model = self.image_model.lock().unwrap();
        let vectors = model
            .embed(vec![path], None)
            .map_err(|e| EmbedError::EncodingFailed(format!("{}: {e}", path.display())))?;
        first_unit_vector(vectors)
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn provider_type(&self) -> &str {
        "local"
    }
}
