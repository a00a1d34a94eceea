use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::GenerationError, types::AspectRatio};

const OUTPUT_MIME_TYPE: &str = "image/jpeg";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Something that turns a prompt into an image.
pub(crate) trait ImageGenerator {
    /// Returns the generated image as base64.
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
}

/// Imagen through the Generative Language `:predict` endpoint.
pub(crate) struct ImagenClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: [Instance<'a>; 1],
    parameters: Parameters<'a>,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters<'a> {
    sample_count: u32,
    aspect_ratio: &'a str,
    output_mime_type: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    /// Set instead of the image when the safety filter blocked the prompt.
    rai_filtered_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl ImagenClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/models/{}:predict",
                settings.api_base.trim_end_matches('/'),
                settings.model
            ),
            api_key: settings.api_key.clone(),
        })
    }
}

impl ImageGenerator for ImagenClient {
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<String, GenerationError> {
        let body = PredictRequest {
            instances: [Instance { prompt }],
            parameters: Parameters {
                sample_count: 1,
                aspect_ratio: aspect_ratio.as_str(),
                output_mime_type: OUTPUT_MIME_TYPE,
            },
        };
        debug!("POST {} ({aspect_ratio})", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }
        extract_image(&text)
    }
}

/// Pulls the first image out of a `:predict` response body.
fn extract_image(body: &str) -> Result<String, GenerationError> {
    let response: PredictResponse = serde_json::from_str(body)?;
    let mut filtered = None;
    for prediction in response.predictions {
        match prediction.bytes_base64_encoded {
            Some(encoded) if !encoded.trim().is_empty() => return Ok(encoded),
            _ => filtered = filtered.or(prediction.rai_filtered_reason),
        }
    }
    match filtered {
        Some(reason) if !reason.trim().is_empty() => Err(GenerationError::Rejected(reason)),
        _ => Err(GenerationError::NoImage),
    }
}

fn api_error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        let cut: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::{
        pipeline::{GenerationPipeline, PipelineSettings},
        types::PromptEntry,
    };

    #[test]
    fn request_body_matches_api_shape() {
        let body = PredictRequest {
            instances: [Instance { prompt: "a cat" }],
            parameters: Parameters {
                sample_count: 1,
                aspect_ratio: AspectRatio::Widescreen.as_str(),
                output_mime_type: OUTPUT_MIME_TYPE,
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "instances": [{ "prompt": "a cat" }],
                "parameters": {
                    "sampleCount": 1,
                    "aspectRatio": "16:9",
                    "outputMimeType": "image/jpeg",
                },
            })
        );
    }

    #[test]
    fn extracts_first_image() {
        let body = r#"{"predictions":[{"mimeType":"image/jpeg"},{"bytesBase64Encoded":"aGk=","mimeType":"image/jpeg"}]}"#;
        assert_eq!(extract_image(body).unwrap(), "aGk=");
    }

    #[test]
    fn empty_predictions_mean_no_image() {
        assert!(matches!(extract_image("{}"), Err(GenerationError::NoImage)));
        assert!(matches!(
            extract_image("not json"),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn filtered_prompt_reports_reason() {
        let body = r#"{"predictions":[{"raiFilteredReason":"Prompt blocked by safety filter."}]}"#;
        let err = extract_image(body).unwrap_err();
        assert!(matches!(err, GenerationError::Rejected(_)));
        assert_eq!(err.to_string(), "Prompt blocked by safety filter.");
    }

    #[test]
    fn api_errors_use_reported_message() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(api_error_message(body), "Quota exceeded");
        let err = GenerationError::Api {
            status: 429,
            message: api_error_message(body),
        };
        assert_eq!(err.to_string(), "Quota exceeded (HTTP 429)");

        let long = "x".repeat(600);
        assert_eq!(api_error_message(&long).len(), MAX_ERROR_BODY_CHARS + 3);
    }

    /// Answers a single HTTP request with `status` and a JSON `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/v1beta")
    }

    /// Reads headers and the declared body so the client never sees a reset.
    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }

    fn settings(api_base: String) -> ApiSettings {
        ApiSettings {
            api_key: "key".to_string(),
            api_base,
            model: "imagen-3.0-generate-002".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn rate_limited_request_lands_on_the_entry() {
        let base = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let client = ImagenClient::new(&settings(base)).unwrap();
        let mut pipeline = GenerationPipeline::new(PipelineSettings {
            request_delay: Duration::ZERO,
            ..Default::default()
        });
        pipeline
            .load_prompts(vec![PromptEntry {
                label: "cat.txt".to_string(),
                text: "a cat".to_string(),
            }])
            .unwrap();

        let summary = pipeline.start(&client).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(
            pipeline.results().get(0).unwrap().error_message(),
            Some("Quota exceeded (HTTP 429)")
        );
    }

    #[tokio::test]
    async fn successful_response_is_returned() {
        let base = serve_once("200 OK", r#"{"predictions":[{"bytesBase64Encoded":"aGk="}]}"#).await;
        let client = ImagenClient::new(&settings(base)).unwrap();
        let encoded = client.generate("a cat", AspectRatio::Square).await.unwrap();
        assert_eq!(encoded, "aGk=");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = ImagenClient::new(&settings(format!("http://{addr}/v1beta"))).unwrap();
        let err = client.generate("a cat", AspectRatio::Square).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
        assert!(err.to_string().starts_with("Request failed"));
    }

    #[test]
    fn endpoint_is_built_from_settings() {
        let client = ImagenClient::new(&ApiSettings {
            api_key: "key".to_string(),
            api_base: "https://example.test/v1beta/".to_string(),
            model: "imagen-3.0-generate-002".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(
            client.endpoint,
            "https://example.test/v1beta/models/imagen-3.0-generate-002:predict"
        );
    }
}
