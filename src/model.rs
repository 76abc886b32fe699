// 该文件是 Lungscan 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::ScanTensor;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 进程内共享、只读的分类模型
pub type SharedClassifier =
  Arc<dyn Model<Input = ScanTensor, Output = Inference, Error = ModelError> + Send + Sync>;

/// 概率 > 0.5 判为阳性
pub const CANCER_THRESHOLD: f32 = 0.5;
pub const MODERATE_RISK_FROM: f32 = 0.30;
pub const HIGH_RISK_FROM: f32 = 0.70;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型中不存在层: {0}")]
  InferenceError(String),
  #[error("模型执行错误: {0}")]
  ModelExecutionError(String),
}

impl From<std::io::Error> for ModelError {
  fn from(err: std::io::Error) -> Self {
    ModelError::ModelLoadError(err.to_string())
  }
}

impl ModelError {
  pub fn execution(msg: impl fmt::Display) -> Self {
    ModelError::ModelExecutionError(msg.to_string())
  }
}

/// 分类概率，下标 0 为阳性（癌变）类
#[derive(Debug, Clone, PartialEq)]
pub struct Probabilities(Box<[f32]>);

impl Probabilities {
  /// 概率必须非空、有限且落在 [0, 1]
  pub fn new(values: impl Into<Box<[f32]>>) -> Result<Self, ModelError> {
    let values = values.into();
    if values.is_empty() {
      return Err(ModelError::execution("模型输出为空"));
    }
    if let Some(bad) = values
      .iter()
      .find(|v| !v.is_finite() || !(0.0..=1.0).contains(*v))
    {
      return Err(ModelError::execution(format!("概率越界: {}", bad)));
    }
    Ok(Self(values))
  }

  pub fn positive(&self) -> f32 {
    self.0[0]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.0
  }
}

/// 与输入张量同尺寸的非负显著性图
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
  width: u32,
  height: u32,
  data: Box<[f32]>,
}

impl SaliencyMap {
  pub fn new(width: u32, height: u32, data: impl Into<Box<[f32]>>) -> Result<Self, ModelError> {
    let data = data.into();
    if width == 0 || height == 0 {
      return Err(ModelError::execution(format!(
        "显著性图尺寸为空: {}x{}",
        width, height
      )));
    }
    if data.len() != (width as usize) * (height as usize) {
      return Err(ModelError::execution(format!(
        "显著性图大小不匹配: 期望 {}x{}, 实际长度 {}",
        width,
        height,
        data.len()
      )));
    }
    if data.iter().any(|v| !v.is_finite() || *v < 0.0) {
      return Err(ModelError::execution("显著性图包含负值或非有限值"));
    }
    Ok(Self {
      width,
      height,
      data,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn get(&self, x: u32, y: u32) -> f32 {
    self.data[(y as usize) * (self.width as usize) + (x as usize)]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 一次前向推理的全部结果
#[derive(Debug, Clone)]
pub struct Inference {
  pub probabilities: Probabilities,
  pub saliency: SaliencyMap,
}

impl Inference {
  pub fn score(&self) -> f32 {
    self.probabilities.positive()
  }

  pub fn label(&self) -> Label {
    Label::from_probability(self.score())
  }

  pub fn risk(&self) -> RiskBucket {
    RiskBucket::from_probability(self.score())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
  #[serde(rename = "cancerous")]
  Cancerous,
  #[serde(rename = "non-cancerous")]
  NonCancerous,
}

impl Label {
  pub fn from_probability(p: f32) -> Self {
    if p > CANCER_THRESHOLD {
      Label::Cancerous
    } else {
      Label::NonCancerous
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Label::Cancerous => "cancerous",
      Label::NonCancerous => "non-cancerous",
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBucket {
  Low,
  Moderate,
  High,
}

impl RiskBucket {
  pub fn from_probability(p: f32) -> Self {
    if p < MODERATE_RISK_FROM {
      RiskBucket::Low
    } else if p < HIGH_RISK_FROM {
      RiskBucket::Moderate
    } else {
      RiskBucket::High
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RiskBucket::Low => "Low",
      RiskBucket::Moderate => "Moderate",
      RiskBucket::High => "High",
    }
  }
}

impl fmt::Display for RiskBucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

mod gradcam;
mod onnx_classifier;
pub use self::gradcam::{ActivationLayout, grad_cam, upsample_bilinear};
pub use self::onnx_classifier::{OnnxClassifier, OnnxClassifierBuilder};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_threshold_is_strictly_greater_than_half() {
    assert_eq!(Label::from_probability(0.5), Label::NonCancerous);
    assert_eq!(Label::from_probability(0.500_001), Label::Cancerous);
    assert_eq!(Label::from_probability(0.0), Label::NonCancerous);
    assert_eq!(Label::from_probability(1.0), Label::Cancerous);
  }

  #[test]
  fn risk_bucket_boundaries() {
    assert_eq!(RiskBucket::from_probability(0.29), RiskBucket::Low);
    assert_eq!(RiskBucket::from_probability(0.30), RiskBucket::Moderate);
    assert_eq!(RiskBucket::from_probability(0.69), RiskBucket::Moderate);
    assert_eq!(RiskBucket::from_probability(0.70), RiskBucket::High);
    assert_eq!(RiskBucket::from_probability(1.0), RiskBucket::High);
  }

  #[test]
  fn labels_serialize_to_wire_strings() {
    assert_eq!(
      serde_json::to_string(&Label::NonCancerous).unwrap(),
      "\"non-cancerous\""
    );
    assert_eq!(
      serde_json::to_string(&RiskBucket::Moderate).unwrap(),
      "\"Moderate\""
    );
  }

  #[test]
  fn probabilities_reject_out_of_range_values() {
    assert!(Probabilities::new(vec![1.2f32]).is_err());
    assert!(Probabilities::new(vec![f32::NAN]).is_err());
    assert!(Probabilities::new(Vec::<f32>::new()).is_err());
    assert_eq!(Probabilities::new(vec![0.25f32, 0.75]).unwrap().positive(), 0.25);
  }

  #[test]
  fn saliency_map_checks_shape_and_sign() {
    assert!(SaliencyMap::new(2, 2, vec![0.0f32; 3]).is_err());
    assert!(SaliencyMap::new(1, 1, vec![-0.1f32]).is_err());
    let map = SaliencyMap::new(2, 1, vec![0.0f32, 3.0]).unwrap();
    assert_eq!(map.get(1, 0), 3.0);
  }

  #[test]
  fn saliency_map_rejects_empty_grid() {
    for (w, h) in [(0, 0), (0, 4), (4, 0)] {
      assert!(matches!(
        SaliencyMap::new(w, h, Vec::<f32>::new()),
        Err(ModelError::ModelExecutionError(_))
      ));
    }
  }
}
