use serde::{Deserialize, Serialize};

use super::{VisionAnalyzer, VisionError, VisionImage};

/// Remote annotation endpoint client.
///
/// Wire contract: POST `{endpoint}/annotate` with `{"prompt", "img_b64"}`,
/// response `{"medgemma_response": "..."}`. Inference on the far side can
/// be slow, hence the long default timeout.
pub struct RemoteVisionTool {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::blocking::Client,
    client_quick: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl RemoteVisionTool {
    pub fn new(endpoint: &str, timeout_secs: u64, auth_token: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        let client_quick = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to create quick HTTP client");
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_token,
            client,
            client_quick,
            timeout_secs,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    prompt: &'a str,
    img_b64: String,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    medgemma_response: String,
}

impl VisionAnalyzer for RemoteVisionTool {
    fn analyze(&self, image: &VisionImage, prompt: &str) -> Result<String, VisionError> {
        let url = format!("{}/annotate", self.endpoint);
        let body = AnnotateRequest {
            prompt,
            img_b64: image.to_base64(),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                VisionError::Unavailable(format!("endpoint unreachable: {}", self.endpoint))
            } else if e.is_timeout() {
                VisionError::Timeout(self.timeout_secs)
            } else {
                VisionError::Internal(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Unavailable(format!(
                "endpoint returned status {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: AnnotateResponse = response
            .json()
            .map_err(|e| VisionError::Protocol(e.to_string()))?;

        tracing::info!(
            endpoint = %self.endpoint,
            response_len = parsed.medgemma_response.len(),
            "Remote vision analysis complete"
        );
        Ok(parsed.medgemma_response)
    }

    fn probe(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        matches!(self.client_quick.get(&url).send(), Ok(r) if r.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let tool = RemoteVisionTool::new("http://gpu-box:8000/", 600, None);
        assert_eq!(tool.endpoint(), "http://gpu-box:8000");
    }

    #[test]
    fn request_body_carries_prompt_and_image() {
        let body = AnnotateRequest {
            prompt: "Assess chest",
            img_b64: "aGk=".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"prompt\":\"Assess chest\""));
        assert!(json.contains("\"img_b64\":\"aGk=\""));
    }

    #[test]
    fn response_requires_medgemma_field() {
        let ok: Result<AnnotateResponse, _> =
            serde_json::from_str(r#"{"medgemma_response":"text"}"#);
        assert_eq!(ok.unwrap().medgemma_response, "text");

        let bad: Result<AnnotateResponse, _> = serde_json::from_str(r#"{"result":"text"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn unreachable_endpoint_fails_probe() {
        let tool = RemoteVisionTool::new("http://127.0.0.1:9", 1, None);
        assert!(!tool.probe());
    }
}
