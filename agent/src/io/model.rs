//! Language model backends.
//!
//! The control loop only sees [`LanguageModel`]: a prompt goes in, raw text
//! comes out. Transport failures are returned as errors and never retried here.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::io::config::{ModelBackend, ModelConfig};
use crate::io::process::{Limits, run_bounded};

pub trait LanguageModel {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

/// Build the backend selected by `cfg`.
pub fn from_config(cfg: &ModelConfig) -> Result<Box<dyn LanguageModel>> {
    Ok(match cfg.backend {
        ModelBackend::Openai => Box::new(OpenAiModel::new(cfg)?),
        ModelBackend::Command => Box::new(CommandModel::new(cfg)),
    })
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiModel {
    /// Reads the API key from `cfg.api_key_env`, loading a `.env` file first if present.
    pub fn new(cfg: &ModelConfig) -> Result<Self> {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            warn!(err = %err, "failed to load .env");
        }
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            anyhow!(
                "{} not found. Set it in the environment or a .env file at the project root.",
                cfg.api_key_env
            )
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.name.clone(),
            api_key,
        })
    }
}

impl LanguageModel for OpenAiModel {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("post {}", self.endpoint))?;
        let status = resp.status();
        let body = resp.text().context("read completion body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "chat completion failed with status {status}: {}",
                body.chars().take(500).collect::<String>()
            ));
        }
        let text = parse_chat_completion(&body)?;
        debug!(response_bytes = text.len(), "completion received");
        Ok(text)
    }
}

/// Text of the first choice; empty when the response has no choices or content.
pub fn parse_chat_completion(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body).context("parse completion json")?;
    Ok(value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// External command that reads the prompt on stdin and prints the response.
pub struct CommandModel {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            argv: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(program = ?self.argv.first(), prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("model command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        let limits = Limits {
            timeout: self.timeout,
            output_bytes: self.output_limit_bytes,
        };
        let output = run_bounded(cmd, Some(prompt.as_bytes()), limits)
            .with_context(|| format!("run model command {program}"))?;
        if output.timed_out {
            return Err(anyhow!(
                "model command timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr.text("stderr").trim()
            ));
        }
        Ok(output.stdout.text("stdout"))
    }
}
