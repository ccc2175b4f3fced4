use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::parser::post::PostRecord;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that analyzes forum posts and discussions.";

const INSTRUCTIONS: &str = "这是一个来自文学城子女教育的论坛帖子。请首先判断这个帖子是否与教育, 留学, 升学, 育儿, 择校, 职业规划, 心理健康等相关，如果不是，请直接返回“与教育无关”。如果是，请总结这篇论坛的帖子。根据原贴的题目和内容，以及回帖的内容，给出讨论的话题和结论。";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for a local OpenAI-compatible chat endpoint.
pub struct Analyzer {
    http: reqwest::Client,
    config: LlmConfig,
}

impl Analyzer {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self { http, config })
    }

    pub async fn summarize(&self, post: &PostRecord) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let prompt = build_prompt(post);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(model = %self.config.model, url = %post.url, "LLM chat request");

        let response = self.http.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("LLM API error ({}): {}", status, error_text));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No content in LLM response"))
    }
}

pub fn build_prompt(post: &PostRecord) -> String {
    let mut prompt = format!(
        "{INSTRUCTIONS}\n\n题目: {}\n\n内容: {}\n\n回帖 ({} 条):\n",
        post.title,
        post.body,
        post.comments.len()
    );
    for (i, comment) in post.comments.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", i + 1, comment);
    }
    prompt
}
