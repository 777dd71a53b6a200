use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::rag::{AnswerRequest, Answerer, Role};
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o";

/// Configuration for the OpenAI-compatible API
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embed_model: String,
    pub chat_model: String,
    pub temperature: f32,
}

impl OpenAiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::InvalidConfig("OPENAI_API_KEY is not set".to_string()))?;
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let embed_model =
            env::var("RAG_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        let chat_model =
            env::var("RAG_CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());

        Ok(OpenAiConfig {
            api_key,
            base_url,
            embed_model,
            chat_model,
            temperature: 0.2,
        })
    }
}

/// Client for the embeddings and chat completions endpoints
#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new OpenAI client
    pub fn new(config: OpenAiConfig) -> Self {
        let client = reqwest::Client::new();
        OpenAiClient { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    async fn post<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.config.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::Provider(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Provider(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RagError::Provider(format!("invalid response from {}: {}", url, e)))
    }
}

impl EmbeddingProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.config.embed_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.embed_model,
            input: text,
        };

        let response: EmbeddingResponse = self.post("embeddings", &request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::Provider("No embedding returned".to_string()))
    }
}

impl Answerer for OpenAiClient {
    async fn answer(&self, request: AnswerRequest<'_>) -> Result<String> {
        let user_content = format!(
            "Question:\n{}\n\nContext:\n{}",
            request.query, request.context
        );

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message {
            role: "system",
            content: request.instructions,
        });
        for turn in request.history {
            messages.push(Message {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages.push(Message {
            role: "user",
            content: &user_content,
        });

        let chat = ChatRequest {
            model: &self.config.chat_model,
            messages,
            temperature: self.config.temperature,
        };

        let response: ChatResponse = self.post("chat/completions", &chat).await?;

        // Extract the generated text from the response
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::Provider("No response generated".to_string()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_response_shape() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}],"model":"text-embedding-3-small"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.25]);
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o",
            messages: vec![Message {
                role: "system",
                content: "be brief",
            }],
            temperature: 0.2,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["model"], "gpt-4o");
    }

    #[test]
    fn test_chat_response_without_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
