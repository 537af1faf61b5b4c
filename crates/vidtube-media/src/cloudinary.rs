use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use futures_util::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::staging::remove_quietly;
use crate::{MediaHost, UploadedMedia};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

/// Signed uploads to Cloudinary's `auto` resource endpoint.
pub struct CloudinaryUploader {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    secure_url: Option<String>,
    url: Option<String>,
    public_id: Option<String>,
}

impl CloudinaryUploader {
    pub fn new(config: CloudinaryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/auto/upload",
            self.config.base_url.trim_end_matches('/'),
            self.config.cloud_name
        )
    }

    async fn try_upload(&self, local_path: &Path) -> Result<UploadedMedia> {
        let bytes = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign(&[("timestamp", &timestamp)], &self.config.api_secret);

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature);

        let resp = self.client.post(self.endpoint()).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("media host returned {}: {}", status, body);
        }

        let reply: UploadReply = resp.json().await?;
        let Some(url) = reply.secure_url.or(reply.url).filter(|u| !u.is_empty()) else {
            bail!("media host reply carried no url");
        };

        Ok(UploadedMedia {
            url,
            public_id: reply.public_id.unwrap_or_default(),
        })
    }
}

impl MediaHost for CloudinaryUploader {
    fn upload<'a>(&'a self, local_path: &'a Path) -> BoxFuture<'a, Option<UploadedMedia>> {
        Box::pin(async move {
            match self.try_upload(local_path).await {
                Ok(media) => {
                    info!("Uploaded {} as {}", local_path.display(), media.public_id);
                    Some(media)
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", local_path.display(), e);
                    if let Err(e) = remove_quietly(local_path).await {
                        warn!("Could not remove {}: {}", local_path.display(), e);
                    }
                    None
                }
            }
        })
    }
}

/// Cloudinary request signature: parameters sorted by name, joined as
/// `k=v&k=v`, secret appended, SHA-1 hex digest.
pub fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    fn config(base_url: String) -> CloudinaryConfig {
        CloudinaryConfig {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            base_url,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn staged_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("avatar.png");
        std::fs::write(&path, b"\x89PNG fake").unwrap();
        path
    }

    #[test]
    fn signature_matches_documented_example() {
        // Example pair from Cloudinary's signing docs.
        let sig = sign(
            &[("timestamp", "1315060510"), ("public_id", "sample_image")],
            "abcd",
        );
        assert_eq!(sig, "b4ad47fb4e25c7bf5f92a20089f9db59bc302313");
    }

    #[test]
    fn signature_ignores_param_order_and_empty_values() {
        let a = sign(&[("timestamp", "1"), ("folder", "x")], "s");
        let b = sign(&[("folder", "x"), ("timestamp", "1"), ("tags", "")], "s");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn successful_upload_returns_secure_url() {
        let app = Router::new().route(
            "/demo/auto/upload",
            post(|| async {
                Json(json!({
                    "secure_url": "https://res.cloudinary.test/demo/abc.png",
                    "url": "http://res.cloudinary.test/demo/abc.png",
                    "public_id": "abc"
                }))
            }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(dir.path());

        let uploader = CloudinaryUploader::new(config(base)).unwrap();
        let media = uploader.upload(&path).await.unwrap();
        assert_eq!(media.url, "https://res.cloudinary.test/demo/abc.png");
        assert_eq!(media.public_id, "abc");
    }

    #[tokio::test]
    async fn provider_error_removes_local_file() {
        let app = Router::new().route(
            "/demo/auto/upload",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(dir.path());

        let uploader = CloudinaryUploader::new(config(base)).unwrap();
        assert!(uploader.upload(&path).await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reply_without_url_is_failure() {
        let app = Router::new().route(
            "/demo/auto/upload",
            post(|| async { Json(json!({ "public_id": "abc" })) }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(dir.path());

        let uploader = CloudinaryUploader::new(config(base)).unwrap();
        assert!(uploader.upload(&path).await.is_none());
        assert!(!path.exists());
    }
}
