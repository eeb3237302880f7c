//! Answer-synthesis LLM client.
//!
//! Mirrors the embedding module's HTTP client shape: a thin provider trait,
//! OpenAI-compatible and Ollama-compatible backends, same retry/backoff
//! strategy (1s, 2s, 4s, 8s, 16s, 32s). The generator is an external
//! collaborator — this module only specifies the interface and wire calls,
//! not prompt engineering or model choice.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::GeneratorConfig;

pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
}

pub struct DisabledGenerator;

impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
}

pub struct OpenAiGenerator {
    model: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for openai provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self { model })
    }
}

impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }
}

pub struct OllamaGenerator {
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self { model, url })
    }
}

impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn create_generator(config: &GeneratorConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}

/// Generate an answer from an assembled context and a user query. `context`
/// is the citation-tagged excerpt text assembled by the retrieval worker;
/// the system prompt instructing citation format is fixed by this function,
/// not configurable, since citation assembly is part of the contract.
pub async fn generate(
    generator: &dyn Generator,
    config: &GeneratorConfig,
    query: &str,
    context: &str,
) -> Result<String> {
    match config.provider.as_str() {
        "openai" => generate_openai(generator, config, query, context).await,
        "ollama" => generate_ollama(generator, config, query, context).await,
        "disabled" => bail!("Generator provider is disabled"),
        other => bail!("Unknown generator provider: {}", other),
    }
}

const SYSTEM_PROMPT: &str = "Answer the user's question using only the provided context. \
Cite supporting passages inline using [n] tags matching the context's numbering. \
If the context does not contain the answer, say so.";

async fn generate_openai(
    generator: &dyn Generator,
    config: &GeneratorConfig,
    query: &str,
    context: &str,
) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": generator.model_name(),
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": format!("Context:\n{}\n\nQuestion: {}", context, query)},
        ],
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_chat_response(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
}

fn parse_openai_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

async fn generate_ollama(
    generator: &dyn Generator,
    config: &GeneratorConfig,
    query: &str,
    context: &str,
) -> Result<String> {
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": generator.model_name(),
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": format!("Context:\n{}\n\nQuestion: {}", context, query)},
        ],
        "stream": false,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/chat", url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_ollama_chat_response(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Ollama API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("Ollama API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama generation failed after retries")))
}

fn parse_ollama_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_generator_reports_disabled() {
        assert_eq!(DisabledGenerator.model_name(), "disabled");
    }

    #[test]
    fn parse_openai_chat_response_extracts_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "hello"}}]
        });
        assert_eq!(parse_openai_chat_response(&json).unwrap(), "hello");
    }

    #[test]
    fn parse_ollama_chat_response_extracts_content() {
        let json = serde_json::json!({"message": {"content": "hello"}});
        assert_eq!(parse_ollama_chat_response(&json).unwrap(), "hello");
    }
}
