use async_trait::async_trait;

use crate::error::SttError;
use crate::provider::ChatProvider;

#[derive(Debug, Clone)]
pub struct HttpChatConfig {
    pub chat_url: String,
    pub api_key: String,
    pub model: String,
}

/// Chat-completion contract over a generic OpenAI-shaped HTTP endpoint,
/// used by the post-processor (C6).
pub struct HttpChatProvider {
    http: reqwest::Client,
    cfg: HttpChatConfig,
}

impl HttpChatProvider {
    pub fn new(cfg: HttpChatConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn chat_completion(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, SttError> {
        let resp = self
            .http
            .post(&self.cfg.chat_url)
            .bearer_auth(&self.cfg.api_key)
            .json(&serde_json::json!({
                "model": self.cfg.model,
                "temperature": temperature,
                "max_tokens": max_tokens,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_message},
                ],
            }))
            .send()
            .await
            .map_err(|e| SttError::Connect(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SttError::Provider {
                code: resp.status().as_str().to_owned(),
                message: "chat completion request failed".to_owned(),
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SttError::Serialization(e.to_string()))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| SttError::Protocol("chat response missing message content".to_owned()))
    }
}
