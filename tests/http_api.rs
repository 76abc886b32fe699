// 该文件是 Lungscan 项目的一部分。
// tests/http_api.rs - HTTP 接口测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{io::Cursor, sync::Arc, time::Duration};

use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Request, StatusCode, header},
};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use lungscan::{
  frame::ScanTensor,
  http::{AppState, DEFAULT_MAX_UPLOAD_BYTES, router},
  model::{Inference, Model, ModelError, Probabilities, SaliencyMap},
  task::DetectionPipeline,
};

const BOUNDARY: &str = "lungscan-test-boundary";

struct StubModel {
  probability: f32,
  delay: Duration,
}

impl Model for StubModel {
  type Input = ScanTensor;
  type Output = Inference;
  type Error = ModelError;

  fn infer(&self, _input: &ScanTensor) -> Result<Inference, ModelError> {
    std::thread::sleep(self.delay);
    Ok(Inference {
      probabilities: Probabilities::new(vec![self.probability])?,
      saliency: SaliencyMap::new(224, 224, vec![0.25f32; 224 * 224])?,
    })
  }
}

fn loaded(probability: f32) -> AppState {
  AppState::with_pipeline(DetectionPipeline::new(Arc::new(StubModel {
    probability,
    delay: Duration::ZERO,
  })))
}

fn app(state: &AppState) -> Router {
  router(state.clone(), DEFAULT_MAX_UPLOAD_BYTES)
}

fn png(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 90]));
  let mut buf = Cursor::new(Vec::new());
  image.write_to(&mut buf, ImageFormat::Png).unwrap();
  buf.into_inner()
}

fn multipart(uri: &str, field: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(
    format!(
      "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"scan.png\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .as_bytes(),
  );
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  Request::post(uri)
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.oneshot(request).await.unwrap();
  let status = response.status();
  let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn detect_returns_label_and_data_uris() {
  let state = loaded(0.82);
  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "image", "image/png", &png(120, 80)),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["label"], "cancerous");
  assert_eq!(json["riskScore"], "High");
  assert!((json["score"].as_f64().unwrap() - 0.82).abs() < 1e-6);
  assert!(json["heatmapUrl"].as_str().unwrap().starts_with("data:image/png;base64,"));
  assert!(json["reportUrl"].as_str().unwrap().starts_with("data:application/pdf;base64,"));
}

#[tokio::test]
async fn half_probability_is_not_cancerous() {
  let state = loaded(0.5);
  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "image", "image/png", &png(32, 32)),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["label"], "non-cancerous");
  assert_eq!(json["riskScore"], "Moderate");
}

#[tokio::test]
async fn requests_before_load_get_model_not_loaded() {
  let state = AppState::new();
  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "image", "image/png", &png(16, 16)),
  )
  .await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(json["error"], "Model not loaded");

  // 模型未就绪时不检查请求体
  let empty = Request::post("/api/detect").body(Body::empty()).unwrap();
  let (status, json) = send(app(&state), empty).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(json["error"], "Model not loaded");
}

#[tokio::test]
async fn missing_image_field_is_bad_request() {
  let state = loaded(0.1);
  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "document", "image/png", &png(16, 16)),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["error"], "No image provided");

  let not_multipart = Request::post("/api/detect")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{}"))
    .unwrap();
  let (status, json) = send(app(&state), not_multipart).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["error"], "No image provided");
}

#[tokio::test]
async fn oversized_upload_is_classification_failure() {
  let state = loaded(0.6);
  let (status, json) = send(
    router(state.clone(), 1024),
    multipart("/api/detect", "image", "image/png", &vec![7u8; 64 * 1024]),
  )
  .await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(json["error"], "Classification failed");
}

#[tokio::test]
async fn corrupt_image_fails_without_poisoning_the_service() {
  let state = loaded(0.2);
  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "image", "image/png", b"definitely not a png"),
  )
  .await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(json["error"], "Classification failed");

  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "image", "image/png", &png(64, 64)),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["label"], "non-cancerous");
  assert_eq!(json["riskScore"], "Low");
}

#[tokio::test]
async fn inference_timeout_is_classification_failure() {
  let state = AppState::with_pipeline(
    DetectionPipeline::new(Arc::new(StubModel {
      probability: 0.9,
      delay: Duration::from_millis(400),
    }))
    .with_inference_timeout(Duration::from_millis(10)),
  );
  let (status, json) = send(
    app(&state),
    multipart("/api/detect", "image", "image/png", &png(16, 16)),
  )
  .await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(json["error"], "Classification failed");
}

#[tokio::test]
async fn classify_reports_legacy_wording() {
  let (status, json) = send(
    app(&loaded(0.9)),
    multipart("/api/classify", "image", "image/png", &png(16, 16)),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["result"], "Potential Cancer Detected");

  let (_, json) = send(
    app(&loaded(0.1)),
    multipart("/api/classify", "image", "image/png", &png(16, 16)),
  )
  .await;
  assert_eq!(json["result"], "No Cancer Detected");
}

#[tokio::test]
async fn health_tracks_model_readiness() {
  let state = AppState::new();
  let health = || Request::get("/api/health").body(Body::empty()).unwrap();

  let (status, json) = send(app(&state), health()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["status"], "loading");
  assert_eq!(json["model_loaded"], false);

  state.install(DetectionPipeline::new(Arc::new(StubModel {
    probability: 0.3,
    delay: Duration::ZERO,
  })));
  let (_, json) = send(app(&state), health()).await;
  assert_eq!(json["status"], "ok");
  assert_eq!(json["model_loaded"], true);
}
