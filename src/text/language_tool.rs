// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! LanguageTool grammar backend
//!
//! Talks to the LanguageTool HTTP API (`/v2/check`). Either points at an
//! already running server or starts a local one from a LanguageTool jar for
//! the lifetime of a session.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::grammar::{GrammarMatch, GrammarProvider, GrammarSession};
use crate::errors::PipelineError;

const LANGUAGE_TOOL_SERVER_CLASS: &str = "org.languagetool.server.HTTPServer";
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// LanguageTool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageToolConfig {
    /// Base URL of a running server, e.g. `http://localhost:8081`
    pub server_url: Option<String>,
    /// Jar used to start a local server when `server_url` is unset
    pub jar_path: Option<PathBuf>,
    pub java_binary: String,
    /// Port of the locally started server
    pub port: u16,
    pub language: String,
    pub startup_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for LanguageToolConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            jar_path: None,
            java_binary: "java".to_string(),
            port: 8081,
            language: "en-US".to_string(),
            startup_timeout_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

impl LanguageToolConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.server_url.is_none() && self.jar_path.is_none() {
            return Err(PipelineError::InvalidOptions(
                "LanguageTool needs either server_url or jar_path".to_string(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(PipelineError::InvalidOptions(
                "LanguageTool language must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn unavailable(reason: impl Into<String>) -> PipelineError {
    PipelineError::CorrectionUnavailable {
        stage: "grammar",
        reason: reason.into(),
    }
}

/// LanguageTool grammar provider
#[derive(Debug, Clone)]
pub struct LanguageTool {
    config: LanguageToolConfig,
    client: Client,
}

impl LanguageTool {
    pub fn new(config: LanguageToolConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| unavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.config.port)
    }

    fn spawn_server(&self) -> Result<Child, PipelineError> {
        let jar = self
            .config
            .jar_path
            .as_ref()
            .ok_or_else(|| unavailable("no LanguageTool jar configured"))?;
        if !jar.exists() {
            return Err(unavailable(format!(
                "LanguageTool jar not found: {}",
                jar.display()
            )));
        }

        info!(
            "Starting LanguageTool server from {} on port {}",
            jar.display(),
            self.config.port
        );

        Command::new(&self.config.java_binary)
            .arg("-cp")
            .arg(jar)
            .arg(LANGUAGE_TOOL_SERVER_CLASS)
            .arg("--port")
            .arg(self.config.port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("Failed to start LanguageTool: {}", e)))
    }

    /// One readiness request against an already running server
    async fn check_reachable(&self, base_url: &str) -> Result<(), PipelineError> {
        let probe = format!("{}/v2/languages", base_url);
        match self.client.get(&probe).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(unavailable(format!(
                "LanguageTool at {} returned HTTP {}",
                base_url,
                response.status()
            ))),
            Err(e) => Err(unavailable(format!(
                "LanguageTool at {} is unreachable: {}",
                base_url, e
            ))),
        }
    }

    async fn wait_until_ready(&self, base_url: &str, child: &mut Child) -> Result<(), PipelineError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.startup_timeout_secs);
        let probe = format!("{}/v2/languages", base_url);

        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(unavailable(format!(
                    "LanguageTool server exited during startup ({})",
                    status
                )));
            }
            match self.client.get(&probe).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("LanguageTool not ready: HTTP {}", response.status()),
                Err(e) => debug!("LanguageTool not ready: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(unavailable(format!(
                    "LanguageTool server did not become ready within {}s",
                    self.config.startup_timeout_secs
                )));
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl GrammarProvider for LanguageTool {
    async fn acquire(&self) -> Result<Box<dyn GrammarSession>, PipelineError> {
        let (base_url, child) = match &self.config.server_url {
            Some(url) => {
                let base_url = url.trim_end_matches('/').to_string();
                self.check_reachable(&base_url).await?;
                (base_url, None)
            }
            None => {
                let base_url = self.local_url();
                let mut child = self.spawn_server()?;
                if let Err(e) = self.wait_until_ready(&base_url, &mut child).await {
                    let _ = child.kill().await;
                    return Err(e);
                }
                (base_url, Some(child))
            }
        };

        debug!("LanguageTool session open at {}", base_url);
        Ok(Box::new(LanguageToolSession {
            client: self.client.clone(),
            base_url,
            language: self.config.language.clone(),
            child,
        }))
    }

    fn name(&self) -> &'static str {
        "languagetool"
    }
}

/// One LanguageTool session; owns the local server process if it started one
pub struct LanguageToolSession {
    client: Client,
    base_url: String,
    language: String,
    child: Option<Child>,
}

impl std::fmt::Debug for LanguageToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageToolSession")
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .field("owns_server", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GrammarSession for LanguageToolSession {
    async fn check(&mut self, text: &str) -> anyhow::Result<Vec<GrammarMatch>> {
        let response = self
            .client
            .post(format!("{}/v2/check", self.base_url))
            .form(&[("text", text), ("language", self.language.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            anyhow::bail!("LanguageTool returned HTTP {}: {}", status, message);
        }

        let body: CheckResponse = response.json().await?;
        Ok(body
            .matches
            .into_iter()
            .filter_map(|m| m.into_grammar_match(text))
            .collect())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut child) = self.child.take() {
            debug!("Stopping LanguageTool server");
            child.kill().await?;
        }
        Ok(())
    }
}

impl Drop for LanguageToolSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to stop LanguageTool server: {}", e);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    matches: Vec<LtMatch>,
}

#[derive(Debug, Deserialize)]
struct LtMatch {
    #[serde(default)]
    message: String,
    offset: usize,
    length: usize,
    #[serde(default)]
    replacements: Vec<LtReplacement>,
    rule: Option<LtRule>,
}

#[derive(Debug, Deserialize)]
struct LtReplacement {
    value: String,
}

#[derive(Debug, Deserialize)]
struct LtRule {
    id: String,
}

impl LtMatch {
    fn into_grammar_match(self, text: &str) -> Option<GrammarMatch> {
        let (offset, length) = utf16_to_char_range(text, self.offset, self.length)?;
        Some(GrammarMatch {
            offset,
            length,
            replacements: self.replacements.into_iter().map(|r| r.value).collect(),
            rule_id: self.rule.map(|r| r.id).unwrap_or_default(),
            message: self.message,
        })
    }
}

/// Convert a UTF-16 `(offset, length)` range of `text` into chars
///
/// `None` when the range does not fall on char boundaries inside `text`.
pub fn utf16_to_char_range(text: &str, offset: usize, length: usize) -> Option<(usize, usize)> {
    let end = offset + length;
    let mut units = 0usize;
    let mut start_char = None;
    let mut end_char = None;

    for (i, ch) in text.chars().enumerate() {
        if units == offset {
            start_char = Some(i);
        }
        if units == end {
            end_char = Some(i);
            break;
        }
        units += ch.len_utf16();
    }
    if units == offset && start_char.is_none() {
        start_char = Some(text.chars().count());
    }
    if units == end && end_char.is_none() {
        end_char = Some(text.chars().count());
    }

    let start = start_char?;
    let end = end_char?;
    Some((start, end - start))
}
