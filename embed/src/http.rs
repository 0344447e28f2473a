use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbedConfig;
use crate::embedder::FaceEmbedder;
use crate::error::EmbedError;
use crate::face::{BoundingBox, DetectedFace};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8500";
const DEFAULT_MODEL: &str = "facenet-vggface2";
const DEFAULT_DIM: usize = 512;

#[derive(Serialize)]
struct DetectRequest<'a> {
    model: &'a str,
    image: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<FaceData>,
}

#[derive(Deserialize)]
struct FaceData {
    #[serde(rename = "box")]
    bbox: Vec<f32>,
    embedding: Vec<f64>,
}

/// HttpEmbedder calls a face detection + embedding service over HTTP.
///
/// `POST {base_url}/embed` with `{"model", "image": <base64>}`; the service
/// answers `{"faces": [{"box": [x, y, w, h], "embedding": [...]}]}`.
pub struct HttpEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dim: usize,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str) -> Self {
        Self::with_config(EmbedConfig::default().with_base_url(base_url))
    }

    pub fn with_config(cfg: EmbedConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.api_key,
            model: if cfg.model.is_empty() {
                DEFAULT_MODEL.to_string()
            } else {
                cfg.model
            },
            dim: if cfg.dimension == 0 {
                DEFAULT_DIM
            } else {
                cfg.dimension
            },
            base_url: if cfg.base_url.is_empty() {
                DEFAULT_BASE_URL.to_string()
            } else {
                cfg.base_url
            },
        }
    }

    async fn call_api(&self, photo: &[u8]) -> Result<DetectResponse, EmbedError> {
        let url = format!("{}/embed", self.base_url);
        let body = DetectRequest {
            model: &self.model,
            image: BASE64.encode(photo),
        };

        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let resp = req.send().await.map_err(|e| EmbedError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api(format!("HTTP {status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl FaceEmbedder for HttpEmbedder {
    async fn embed(&self, photo: &[u8]) -> Result<Vec<DetectedFace>, EmbedError> {
        if photo.is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let data = self.call_api(photo).await?;
        tracing::debug!(faces = data.faces.len(), "embed: detection finished");

        data.faces
            .into_iter()
            .map(|f| {
                let [x, y, w, h] = f.bbox[..] else {
                    return Err(EmbedError::InvalidResponse(format!(
                        "box has {} values, want 4",
                        f.bbox.len()
                    )));
                };
                Ok(DetectedFace {
                    bbox: BoundingBox::new(x, y, w, h),
                    // float64 -> f32, the index stores f32.
                    embedding: f.embedding.iter().map(|&v| v as f32).collect(),
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_parses_faces() {
        let router = Router::new().route(
            "/embed",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["image"], BASE64.encode(b"photo"));
                Json(json!({
                    "faces": [
                        {"box": [1.0, 2.0, 30.0, 40.0], "embedding": [0.6, 0.8]},
                        {"box": [5.0, 6.0, 7.0, 8.0], "embedding": [1.0, 0.0]}
                    ]
                }))
            }),
        );
        let url = serve(router).await;

        let emb = HttpEmbedder::with_config(
            EmbedConfig::default()
                .with_base_url(&url)
                .with_model("test-model")
                .with_dimension(2),
        );
        let faces = emb.embed(b"photo").await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox, BoundingBox::new(1.0, 2.0, 30.0, 40.0));
        assert_eq!(faces[0].embedding, vec![0.6, 0.8]);
        assert_eq!(emb.dimension(), 2);
    }

    #[tokio::test]
    async fn test_bad_box_is_invalid_response() {
        let router = Router::new().route(
            "/embed",
            post(|| async { Json(json!({"faces": [{"box": [1.0], "embedding": [1.0]}]})) }),
        );
        let url = serve(router).await;

        let emb = HttpEmbedder::new(&url);
        assert!(matches!(
            emb.embed(b"photo").await,
            Err(EmbedError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_http_error_is_api_error() {
        let router = Router::new().route(
            "/embed",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let url = serve(router).await;

        let err = HttpEmbedder::new(&url).embed(b"photo").await.unwrap_err();
        assert!(matches!(err, EmbedError::Api(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let emb = HttpEmbedder::new("http://127.0.0.1:9");
        assert!(matches!(emb.embed(b"").await, Err(EmbedError::EmptyInput)));
    }
}
