//! Chat-completion backend client. One request in, one string out; semantic
//! retry and schema validation live a layer above.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::config::BackendConfig;
use crate::error::ForgeErr;
use crate::error::Result;
use crate::flags::FORGE_API_KEY;
use crate::flags::FORGE_FIXTURE;

pub struct CompletionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    /// Canned responses consumed front-to-back; short-circuits HTTP entirely.
    fixture: Option<Mutex<VecDeque<String>>>,
}

impl CompletionClient {
    pub fn from_config(backend: &BackendConfig) -> Result<Self> {
        let fixture = match *FORGE_FIXTURE {
            Some(path) => {
                warn!(path, "using canned backend responses from fixture");
                Some(Mutex::new(load_fixture(path)?))
            }
            None => None,
        };

        let api_key = backend
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .or_else(|| (*FORGE_API_KEY).map(str::to_string));

        Ok(CompletionClient {
            http: reqwest::Client::new(),
            base_url: backend.base_url.trim_end_matches('/').to_string(),
            model: backend.model.clone(),
            api_key,
            temperature: backend.temperature,
            fixture,
        })
    }

    /// One completion round-trip. Timeouts are enforced by the caller.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if let Some(fixture) = &self.fixture {
            #[allow(clippy::expect_used)]
            let mut queue = fixture.lock().expect("fixture mutex poisoned");
            return queue.pop_front().ok_or_else(|| {
                ForgeErr::BackendUnavailable("fixture exhausted".to_string())
            });
        }

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "stream": false,
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url, model = self.model, "POST");

        let mut request = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            // Error bodies carry the actual reason; include them so the
            // failure is debuggable instead of an opaque status line.
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeErr::BackendUnavailable(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let value: serde_json::Value = response.json().await?;
        let content = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                ForgeErr::BackendUnavailable("response carried no message content".to_string())
            })?;
        Ok(content.to_string())
    }
}

/// One canned response per line; a line holding a JSON string is unescaped,
/// anything else is used verbatim.
fn load_fixture(path: &str) -> Result<VecDeque<String>> {
    let text = std::fs::read_to_string(path)?;
    let mut queue = VecDeque::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::String(s)) => queue.push_back(s),
            _ => queue.push_back(line.to_string()),
        }
    }
    Ok(queue)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn fixture_lines_unescape_json_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.jsonl");
        std::fs::write(&path, "\"first response\"\n{\"confidence\": 0.9}\n").unwrap();
        let queue = load_fixture(path.to_str().unwrap()).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0], "first response");
        assert_eq!(queue[1], "{\"confidence\": 0.9}");
    }
}
