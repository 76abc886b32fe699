// 该文件是 Lungscan 项目的一部分。
// src/task.rs - 检测任务流水线
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

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::task::{JoinError, spawn_blocking};
use tracing::{debug, info, warn};

use crate::{
  input::{PreprocessError, ScanImage, UploadedImage},
  model::{Inference, Label, Model, ModelError, RiskBucket, SharedClassifier},
  output::{Heatmap, HeatmapError, Report, ReportContent, ReportError},
};

pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("模型尚未加载")]
  ServiceUnavailable,
  #[error("预处理错误: {0}")]
  PreprocessError(#[from] PreprocessError),
  #[error(transparent)]
  ModelError(#[from] ModelError),
  #[error("推理超时: 超过 {0:?}")]
  InferenceTimeout(Duration),
  #[error("热力图错误: {0}")]
  HeatmapError(#[from] HeatmapError),
  #[error("报告生成错误: {0}")]
  ReportGenerationError(#[from] ReportError),
  #[error("后台任务异常退出: {0}")]
  JoinError(#[from] JoinError),
}

/// 一次检测的全部产物
#[derive(Debug, Clone)]
pub struct DetectionArtifacts {
  pub label: Label,
  pub score: f32,
  pub risk: RiskBucket,
  pub heatmap_png: Vec<u8>,
  pub report_pdf: Vec<u8>,
}

/// HTTP 响应体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
  pub label: Label,
  pub score: f32,
  pub risk_score: RiskBucket,
  pub heatmap_url: String,
  pub report_url: String,
}

impl From<&DetectionArtifacts> for DetectionResult {
  fn from(artifacts: &DetectionArtifacts) -> Self {
    Self {
      label: artifacts.label,
      score: artifacts.score,
      risk_score: artifacts.risk,
      heatmap_url: format!("data:image/png;base64,{}", STANDARD.encode(&artifacts.heatmap_png)),
      report_url: format!(
        "data:application/pdf;base64,{}",
        STANDARD.encode(&artifacts.report_pdf)
      ),
    }
  }
}

/// 写入磁盘的结果摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
  pub label: Label,
  pub score: f32,
  pub risk_score: RiskBucket,
}

impl From<&DetectionArtifacts> for DetectionSummary {
  fn from(artifacts: &DetectionArtifacts) -> Self {
    Self {
      label: artifacts.label,
      score: artifacts.score,
      risk_score: artifacts.risk,
    }
  }
}

/// 预处理 → 推理 → 热力图 → 报告，严格顺序执行
pub struct DetectionPipeline {
  model: SharedClassifier,
  heatmap: Heatmap,
  report: Report,
  inference_timeout: Duration,
}

impl DetectionPipeline {
  pub fn new(model: SharedClassifier) -> Self {
    Self {
      model,
      heatmap: Heatmap::default(),
      report: Report::default(),
      inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
    }
  }

  pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
    self.inference_timeout = timeout;
    self
  }

  fn render(&self, scan: &ScanImage, inference: &Inference) -> Result<DetectionArtifacts, TaskError> {
    let score = inference.score();
    let risk = inference.risk();

    let overlay = self.heatmap.overlay(&inference.saliency, scan.canvas())?;
    let heatmap_png = self.heatmap.encode_png(&overlay)?;

    let content = ReportContent {
      risk,
      probability: score,
      generated_at: Utc::now(),
    };
    let report_pdf = self.report.render(scan.original(), &overlay, &content)?;

    Ok(DetectionArtifacts {
      label: inference.label(),
      score,
      risk,
      heatmap_png,
      report_pdf,
    })
  }

  /// 在当前线程上运行整条流水线，不设超时
  pub fn run_blocking(&self, upload: &UploadedImage) -> Result<DetectionArtifacts, TaskError> {
    let scan = ScanImage::decode(upload)?;
    let tensor = scan.tensor();

    let now = Instant::now();
    let inference = self.model.infer(&tensor)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let artifacts = self.render(&scan, &inference)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());
    Ok(artifacts)
  }

  /// 解码与推理，推理调用受超时约束
  async fn infer(&self, upload: UploadedImage) -> Result<(Arc<ScanImage>, Inference), TaskError> {
    let scan = Arc::new(spawn_blocking(move || ScanImage::decode(&upload)).await??);

    let model = self.model.clone();
    let input = scan.clone();
    let now = Instant::now();
    let inference = match tokio::time::timeout(
      self.inference_timeout,
      spawn_blocking(move || model.infer(&input.tensor())),
    )
    .await
    {
      Ok(joined) => joined??,
      Err(_) => {
        warn!("推理超过 {:.2?} 未完成，放弃本次请求", self.inference_timeout);
        return Err(TaskError::InferenceTimeout(self.inference_timeout));
      }
    };
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    debug!(
      "阳性概率: {:.4}, 风险等级: {}",
      inference.score(),
      inference.risk()
    );

    Ok((scan, inference))
  }

  /// 只给出分类标签，不生成热力图和报告
  pub async fn classify(self: Arc<Self>, upload: UploadedImage) -> Result<Label, TaskError> {
    let (_, inference) = self.infer(upload).await?;
    Ok(inference.label())
  }

  /// 在阻塞线程池上运行各阶段
  pub async fn run(self: Arc<Self>, upload: UploadedImage) -> Result<DetectionArtifacts, TaskError> {
    let (scan, inference) = self.infer(upload).await?;

    let now = Instant::now();
    let pipeline = self.clone();
    let artifacts = spawn_blocking(move || pipeline.render(&scan, &inference)).await??;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(artifacts)
  }
}
