// 🍳 Recipe Suggestions - Ingredients in, recipe cards out
// Gemini when an API key is configured, a built-in suggestion otherwise

use crate::config::http_client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub name: String,
    pub cooking_time: String,
    pub difficulty: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    pub calories: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("Recipe model request failed: {0}")]
    Request(String),

    #[error("Recipe model returned unusable output: {0}")]
    Parse(String),
}

#[async_trait]
pub trait RecipeSuggester: Send + Sync {
    async fn suggest(&self, ingredients: &[String]) -> Result<Vec<Recipe>, RecipeError>;
}

// ============================================================================
// FALLBACK
// ============================================================================

/// Fixed stir-fry suggestion built from whatever ingredients were given
pub struct FallbackRecipes;

impl FallbackRecipes {
    pub fn recipes_for(ingredients: &[String]) -> Vec<Recipe> {
        vec![Recipe {
            name: "野菜炒め".to_string(),
            cooking_time: "15分".to_string(),
            difficulty: "簡単".to_string(),
            ingredients: ingredients.iter().map(|i| format!("{}: 適量", i)).collect(),
            instructions: vec![
                "材料を切る".to_string(),
                "フライパンで炒める".to_string(),
                "調味料を加える".to_string(),
            ],
            calories: "約200kcal".to_string(),
        }]
    }
}

#[async_trait]
impl RecipeSuggester for FallbackRecipes {
    async fn suggest(&self, ingredients: &[String]) -> Result<Vec<Recipe>, RecipeError> {
        Ok(Self::recipes_for(ingredients))
    }
}

// ============================================================================
// GEMINI
// ============================================================================

pub struct GeminiRecipeClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub fn build_recipe_prompt(ingredients: &[String]) -> String {
    format!(
        "冷蔵庫にある次の食材を使った家庭料理のレシピを3つ提案してください: {}\n\
         JSON配列のみで回答してください。各要素は \
         {{\"name\": string, \"cookingTime\": string, \"difficulty\": string, \
         \"ingredients\": [string], \"instructions\": [string], \"calories\": string}} の形式です。",
        ingredients.join("、")
    )
}

/// Pull the recipe array out of model text, tolerating a ```json fence
pub fn parse_recipe_text(text: &str) -> Result<Vec<Recipe>, RecipeError> {
    let trimmed = text.trim();
    let start = trimmed
        .find('[')
        .ok_or_else(|| RecipeError::Parse("no JSON array in response".to_string()))?;
    let end = trimmed
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or_else(|| RecipeError::Parse("unterminated JSON array".to_string()))?;

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| RecipeError::Parse(e.to_string()))
}

impl GeminiRecipeClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, RecipeError> {
        Ok(Self {
            api_key,
            model,
            client: http_client(timeout).map_err(|e| RecipeError::Request(e.to_string()))?,
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

#[async_trait]
impl RecipeSuggester for GeminiRecipeClient {
    async fn suggest(&self, ingredients: &[String]) -> Result<Vec<Recipe>, RecipeError> {
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": build_recipe_prompt(ingredients) }] }],
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 3000,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RecipeError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "recipe model rejected request");
            return Err(RecipeError::Request(format!("{}: {}", status, body)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RecipeError::Parse(e.to_string()))?;

        let text: String = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        debug!(chars = text.len(), "recipe model responded");

        parse_recipe_text(&text)
    }
}
