// 该文件是 Lungscan 项目的一部分。
// src/http/routes.rs - HTTP 路由处理
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

use std::sync::Arc;

use axum::{
  Json,
  extract::{
    State,
    multipart::{Multipart, MultipartError, MultipartRejection},
  },
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
  http::AppState,
  input::UploadedImage,
  model::Label,
  task::{DetectionPipeline, DetectionResult, TaskError},
};

const IMAGE_FIELD: &str = "image";

/// 对外只暴露这三种错误体
#[derive(Debug)]
pub enum ApiError {
  ModelNotLoaded,
  NoImage,
  ClassificationFailed,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      ApiError::ModelNotLoaded => (StatusCode::INTERNAL_SERVER_ERROR, "Model not loaded"),
      ApiError::NoImage => (StatusCode::BAD_REQUEST, "No image provided"),
      ApiError::ClassificationFailed => {
        (StatusCode::INTERNAL_SERVER_ERROR, "Classification failed")
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

impl From<TaskError> for ApiError {
  fn from(e: TaskError) -> Self {
    match e {
      TaskError::ServiceUnavailable => ApiError::ModelNotLoaded,
      other => {
        error!("Classification error: {}", other);
        ApiError::ClassificationFailed
      }
    }
  }
}

async fn read_image(mut multipart: Multipart) -> Result<Option<UploadedImage>, MultipartError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(IMAGE_FIELD) {
      continue;
    }
    let mime_type = field.content_type().map(str::to_owned);
    let file_name = field.file_name().map(str::to_owned);
    let bytes = field.bytes().await?;
    return Ok(Some(
      UploadedImage::new(bytes.to_vec(), mime_type).with_file_name(file_name),
    ));
  }
  Ok(None)
}

/// 先检查模型是否就绪，再读取请求体
async fn accept(
  state: &AppState,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<(Arc<DetectionPipeline>, UploadedImage), ApiError> {
  let pipeline = state.pipeline()?;

  let multipart = multipart.map_err(|e| {
    warn!("请求体不是 multipart: {}", e);
    ApiError::NoImage
  })?;
  let upload = read_image(multipart)
    .await
    .map_err(|e| {
      if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        error!("上传内容超过大小上限: {}", e);
        ApiError::ClassificationFailed
      } else {
        warn!("读取上传内容失败: {}", e);
        ApiError::NoImage
      }
    })?
    .ok_or(ApiError::NoImage)?;

  info!(
    "收到图像 {}，{} 字节",
    upload.file_name.as_deref().unwrap_or("-"),
    upload.bytes.len()
  );
  Ok((pipeline, upload))
}

pub async fn detect(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResult>, ApiError> {
  let (pipeline, upload) = accept(&state, multipart).await?;
  let artifacts = pipeline.run(upload).await?;
  info!(
    "检测结果: {} ({:.4}), 风险等级: {}",
    artifacts.label, artifacts.score, artifacts.risk
  );
  Ok(Json(DetectionResult::from(&artifacts)))
}

pub async fn classify(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
  let (pipeline, upload) = accept(&state, multipart).await?;
  let result = match pipeline.classify(upload).await? {
    Label::Cancerous => "Potential Cancer Detected",
    Label::NonCancerous => "No Cancer Detected",
  };
  Ok(Json(json!({ "result": result })))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
  let loaded = state.is_loaded();
  Json(json!({
    "status": if loaded { "ok" } else { "loading" },
    "model_loaded": loaded,
  }))
}
