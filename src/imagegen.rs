// 🎨 Character Images - Kawaii mascot for a product in a given freshness mood
// Prompt building is local; pixels come from an image model behind `ImageGenerator`

use crate::config::http_client;
use crate::expiry::FreshnessStatus;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Image model request failed: {0}")]
    Request(String),

    #[error("Image model returned no image")]
    Empty,

    #[error("Image payload could not be decoded: {0}")]
    Decode(String),

    #[error("Failed to store image: {0}")]
    Storage(#[from] std::io::Error),
}

/// Build the generation prompt. `emotion` is a status emoji; anything else
/// gets the neutral variant.
pub fn create_prompt(product_name: &str, emotion: &str, category: Option<&str>) -> String {
    let base = format!(
        "Cute kawaii Japanese mascot character representing {} ({} food item), ",
        product_name,
        category.unwrap_or("")
    );

    let mood = match FreshnessStatus::from_emoji(emotion) {
        Some(FreshnessStatus::Fresh) => {
            "happy and fresh, bright colors, smiling face, sparkles around, chibi style, simple design"
        }
        Some(FreshnessStatus::Caution) => {
            "neutral expression, slightly concerned, pastel colors, chibi style, simple design"
        }
        Some(FreshnessStatus::Warning) => {
            "worried expression, sweat drops, muted colors, looking anxious, chibi style, simple design"
        }
        Some(FreshnessStatus::Critical) => {
            "very worried and panicking, dark shadows, urgent expression, chibi style, simple design"
        }
        Some(FreshnessStatus::Expired) => {
            "zombie-like appearance, expired and spooky, dark colors, ghost-like, chibi style, simple design"
        }
        None => "neutral kawaii expression, chibi style, simple design",
    };

    base + mood
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// PNG bytes for `prompt`
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ImageError>;
}

// ============================================================================
// VERTEX AI IMAGEN
// ============================================================================

pub struct VertexImagenClient {
    project_id: String,
    location: String,
    model: String,
    access_token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

impl VertexImagenClient {
    pub fn new(
        project_id: String,
        location: String,
        model: String,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, ImageError> {
        Ok(Self {
            project_id,
            location,
            model,
            access_token,
            client: http_client(timeout).map_err(|e| ImageError::Request(e.to_string()))?,
        })
    }

    fn predict_url(&self) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:predict",
            loc = self.location,
            project = self.project_id,
            model = self.model
        )
    }
}

fn decode_first_prediction(response: PredictResponse) -> Result<Vec<u8>, ImageError> {
    let encoded = response
        .predictions
        .into_iter()
        .find_map(|p| p.bytes_base64_encoded)
        .ok_or(ImageError::Empty)?;

    BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| ImageError::Decode(e.to_string()))
}

#[async_trait]
impl ImageGenerator for VertexImagenClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ImageError> {
        let payload = serde_json::json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": "1:1",
                "addWatermark": false,
                "safetyFilterLevel": "block_none"
            }
        });

        let response = self
            .client
            .post(self.predict_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ImageError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ImageError::Request(format!("{}: {}", status, body)));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| ImageError::Decode(e.to_string()))?;

        decode_first_prediction(body)
    }
}

// ============================================================================
// IMAGE STORE
// ============================================================================

/// Writes generated images to a directory served under `public_base_url`
pub struct ImageStore {
    dir: PathBuf,
    public_base_url: String,
}

fn slug(value: &str) -> String {
    let slug: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string();

    if slug.is_empty() {
        "item".to_string()
    } else {
        slug
    }
}

impl ImageStore {
    pub fn new(dir: PathBuf, public_base_url: &str) -> Self {
        Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Save PNG bytes and return the public URL
    pub fn save(&self, product_name: &str, emotion: &str, bytes: &[u8]) -> Result<String, ImageError> {
        std::fs::create_dir_all(&self.dir)?;

        let mood = FreshnessStatus::from_emoji(emotion)
            .map(|s| s.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "neutral".to_string());
        let file_name = format!(
            "{}_{}_{}_{}.png",
            slug(product_name),
            mood,
            Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        std::fs::write(self.dir.join(&file_name), bytes)?;

        Ok(format!("{}/images/{}", self.public_base_url, file_name))
    }
}

/// Prompt → image → stored file → public URL
pub async fn generate_character_image(
    generator: &dyn ImageGenerator,
    store: &ImageStore,
    product_name: &str,
    emotion: &str,
    category: Option<&str>,
) -> Result<String, ImageError> {
    let prompt = create_prompt(product_name, emotion, category);
    let bytes = generator.generate(&prompt).await?;
    let url = store.save(product_name, emotion, &bytes)?;

    info!(product_name, emotion, url = %url, "character image generated");

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedImage(Vec<u8>);

    #[async_trait]
    impl ImageGenerator for FixedImage {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ImageError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_prompt_variants() {
        let fresh = create_prompt("Tomato", "😊", Some("Vegetable"));
        assert!(fresh.starts_with("Cute kawaii Japanese mascot character representing Tomato (Vegetable food item), "));
        assert!(fresh.contains("happy and fresh"));

        assert!(create_prompt("Milk", "💀", None).contains("zombie-like"));
        assert!(create_prompt("Milk", "😰", None).contains("panicking"));
        assert!(create_prompt("Milk", "🤔", None).ends_with("neutral kawaii expression, chibi style, simple design"));
    }

    #[test]
    fn test_decode_prediction() {
        let response = PredictResponse {
            predictions: vec![Prediction {
                bytes_base64_encoded: Some(BASE64.encode(b"\x89PNG")),
            }],
        };
        assert_eq!(decode_first_prediction(response).unwrap(), b"\x89PNG".to_vec());

        let empty = PredictResponse { predictions: vec![] };
        assert!(matches!(decode_first_prediction(empty), Err(ImageError::Empty)));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Greek Yogurt 500g"), "greek_yogurt_500g");
        assert_eq!(slug("牛乳"), "item");
    }

    #[tokio::test]
    async fn test_generate_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("character_images"), "http://localhost:3000/");

        let url = generate_character_image(&FixedImage(vec![1, 2, 3]), &store, "Milk", "😟", Some("Dairy"))
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:3000/images/milk_warning_"));
        let file_name = url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(store.dir().join(file_name)).unwrap(), vec![1, 2, 3]);
    }
}
