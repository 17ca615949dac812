//! HTTP access to the remote card hosts.

use std::io::Read;
use std::time::Duration;

use super::ImportError;
use crate::card::CharacterCardV2;
use crate::config::RemoteConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP transport. Non-success statuses are returned, not raised.
pub trait HttpClient {
    fn get(&self, url: &str) -> Result<HttpResponse, ImportError>;

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, ImportError>;
}

pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new(timeout_secs: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(timeout_secs))
            .build();
        Self { agent }
    }

    fn finish(url: &str, result: Result<ureq::Response, ureq::Error>) -> Result<HttpResponse, ImportError> {
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => {
                return Err(ImportError::Http {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpClient for UreqClient {
    fn get(&self, url: &str) -> Result<HttpResponse, ImportError> {
        Self::finish(url, self.agent.get(url).call())
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, ImportError> {
        let result = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_json(body);
        Self::finish(url, result)
    }
}

/// Turn a non-success response into a transport failure.
fn require_success(url: &str, response: HttpResponse) -> Result<HttpResponse, ImportError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ImportError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        })
    }
}

/// Download a card PNG from Chub by `owner/name`.
pub fn fetch_chub_png(
    http: &dyn HttpClient,
    remote: &RemoteConfig,
    full_path: &str,
) -> Result<Vec<u8>, ImportError> {
    let body = serde_json::json!({
        "format": "tavern",
        "fullPath": full_path,
    });
    let url = remote.chub_download_url.as_str();
    let response = require_success(url, http.post_json(url, &body)?)?;
    Ok(response.body)
}

/// A Pygmalion export: the card JSON plus its avatar bytes.
#[derive(Debug)]
pub struct PygFetch {
    pub card: CharacterCardV2,
    pub avatar: Vec<u8>,
}

/// Fetch the card JSON for `id`, then its avatar.
pub fn fetch_pyg(http: &dyn HttpClient, remote: &RemoteConfig, id: &str) -> Result<PygFetch, ImportError> {
    let url = format!("{}/{}/v2", remote.pyg_export_url.trim_end_matches('/'), id);
    let response = http.get(&url)?;
    if response.status != 200 {
        return Err(ImportError::HttpStatus { url, status: response.status });
    }

    let export: serde_json::Value = serde_json::from_slice(&response.body)
        .map_err(|e| ImportError::Decode(format!("Pygmalion export for {}: {}", id, e)))?;
    let character = export
        .get("character")
        .cloned()
        .ok_or_else(|| ImportError::Decode(format!("Pygmalion export for {} has no character", id)))?;
    let avatar_url = character
        .pointer("/data/avatar")
        .and_then(|v| v.as_str())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ImportError::InvalidInput(format!("Pygmalion card {} has no avatar", id)))?;
    let card: CharacterCardV2 = serde_json::from_value(character)
        .map_err(|e| ImportError::Decode(format!("Pygmalion card {}: {}", id, e)))?;

    let avatar = require_success(&avatar_url, http.get(&avatar_url)?)?.body;
    Ok(PygFetch { card, avatar })
}
