// 该文件是 Lungscan 项目的一部分。
// src/model/onnx_classifier.rs - ONNX 分类模型
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

use tract_onnx::prelude::*;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ScanTensor,
  model::{
    ActivationLayout, Inference, Model, ModelError, Probabilities, SaliencyMap, grad_cam,
    upsample_bilinear,
  },
};

pub const DEFAULT_LAYER: &str = "last_conv_layer";
const GRADIENT_SUFFIX: &str = "_grad";

const PROBABILITY_OUTPUT: usize = 0;
const ACTIVATION_OUTPUT: usize = 1;
const GRADIENT_OUTPUT: usize = 2;

fn load_error(msg: &str, e: impl std::fmt::Display) -> ModelError {
  ModelError::ModelLoadError(format!("{}: {:#}", msg, e))
}

/// 基于 tract 的分类器
///
/// 运行时不做自动微分。ONNX 文件除概率输出外，还必须包含：
///
/// - 名为 `layer`（默认 `last_conv_layer`）的节点，输出卷积层激活；
/// - 名为 `<layer>_grad`（或 `gradient_node` 指定）的节点，输出类别 0 得分对该激活的梯度。
///
/// 两者形状相同、均为 4 维，布局由 [`ActivationLayout`] 指定。缺少任何一个节点时
/// [`OnnxClassifierBuilder::build`] 返回 `ModelLoadError`。
pub struct OnnxClassifier {
  plan: TypedRunnableModel<TypedModel>,
  layer: String,
  layout: ActivationLayout,
}

pub struct OnnxClassifierBuilder {
  model_path: String,
  layer: String,
  gradient_node: Option<String>,
  layout: ActivationLayout,
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(OnnxClassifierBuilder {
      model_path: url.path().to_string(),
      layer: DEFAULT_LAYER.to_string(),
      gradient_node: None,
      layout: ActivationLayout::default(),
    })
  }
}

impl OnnxClassifierBuilder {
  pub fn layer(mut self, layer: impl Into<String>) -> Self {
    self.layer = layer.into();
    self
  }

  pub fn gradient_node(mut self, node: Option<String>) -> Self {
    self.gradient_node = node;
    self
  }

  pub fn layout(mut self, layout: ActivationLayout) -> Self {
    self.layout = layout;
    self
  }

  fn gradient_name(&self) -> String {
    self
      .gradient_node
      .clone()
      .unwrap_or_else(|| format!("{}{}", self.layer, GRADIENT_SUFFIX))
  }

  pub fn build(self) -> Result<OnnxClassifier, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let [_, h, w, c] = ScanTensor::default().shape();
    let mut model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(|e| load_error("无法解析 ONNX 模型", e))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, h, w, c)),
      )
      .map_err(|e| load_error("模型输入形状不匹配", e))?;

    let probability_outlet = model
      .output_outlets()
      .map_err(|e| load_error("无法获取模型输出", e))?
      .first()
      .copied()
      .ok_or_else(|| ModelError::ModelLoadError("模型没有输出".to_string()))?;

    // 在进入梯度计算之前就确认目标层存在
    let gradient_name = self.gradient_name();
    let layer_node = model.node_id_by_name(&self.layer).map_err(|_| {
      error!("模型中找不到层: {}", self.layer);
      ModelError::ModelLoadError(format!("模型中找不到层: {}", self.layer))
    })?;
    let gradient_node = model.node_id_by_name(&gradient_name).map_err(|_| {
      error!("模型中找不到梯度节点: {}", gradient_name);
      ModelError::ModelLoadError(format!("模型中找不到梯度节点: {}", gradient_name))
    })?;
    debug!(
      "输出节点: 概率={}, 激活={}, 梯度={}",
      model.node(probability_outlet.node).name,
      self.layer,
      gradient_name
    );

    model
      .set_output_outlets(&[
        probability_outlet,
        OutletId::new(layer_node, 0),
        OutletId::new(gradient_node, 0),
      ])
      .map_err(|e| load_error("无法设置模型输出", e))?;

    let typed = model
      .into_optimized()
      .map_err(|e| load_error("模型优化失败", e))?;

    let output_shape = |ix: usize| -> Result<Vec<usize>, ModelError> {
      let fact = typed
        .output_fact(ix)
        .map_err(|e| load_error("无法获取输出形状", e))?;
      fact
        .shape
        .as_concrete()
        .map(|dims| dims.to_vec())
        .ok_or_else(|| ModelError::ModelLoadError(format!("输出 {} 形状不确定", ix)))
    };

    let probability_shape = output_shape(PROBABILITY_OUTPUT)?;
    if probability_shape.len() != 2 || probability_shape[0] != 1 || probability_shape[1] == 0 {
      error!("预期概率输出形状为 [1, C], 实际为 {:?}", probability_shape);
      return Err(ModelError::ModelLoadError(format!(
        "预期概率输出形状为 [1, C], 实际为 {:?}",
        probability_shape
      )));
    }

    let activation_shape = output_shape(ACTIVATION_OUTPUT)?;
    let gradient_shape = output_shape(GRADIENT_OUTPUT)?;
    if activation_shape.len() != 4 || activation_shape != gradient_shape {
      error!(
        "激活形状 {:?} 与梯度形状 {:?} 不匹配",
        activation_shape, gradient_shape
      );
      return Err(ModelError::ModelLoadError(format!(
        "激活形状 {:?} 与梯度形状 {:?} 不匹配",
        activation_shape, gradient_shape
      )));
    }

    debug!("概率输出形状: {:?}", probability_shape);
    debug!("激活输出形状: {:?}", activation_shape);

    let plan = typed
      .into_runnable()
      .map_err(|e| load_error("无法创建推理计划", e))?;
    info!("模型加载完成");

    Ok(OnnxClassifier {
      plan,
      layer: self.layer,
      layout: self.layout,
    })
  }
}

impl Model for OnnxClassifier {
  type Input = ScanTensor;
  type Output = Inference;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let [n, h, w, c] = input.shape();
    let tensor = tract_ndarray::Array4::from_shape_vec((n, h, w, c), input.as_nhwc().to_vec())
      .map_err(ModelError::execution)?
      .into_tensor();

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::execution(format!("{:#}", e)))?;

    if outputs.len() <= GRADIENT_OUTPUT {
      return Err(ModelError::InferenceError(self.layer.clone()));
    }

    let probabilities = outputs[PROBABILITY_OUTPUT]
      .to_array_view::<f32>()
      .map_err(ModelError::execution)?
      .iter()
      .copied()
      .collect::<Vec<_>>();
    let probabilities = Probabilities::new(probabilities)?;
    debug!("模型输出概率: {:?}", probabilities.as_slice());

    let activations = outputs[ACTIVATION_OUTPUT]
      .to_array_view::<f32>()
      .map_err(ModelError::execution)?;
    let gradients = outputs[GRADIENT_OUTPUT]
      .to_array_view::<f32>()
      .map_err(ModelError::execution)?;

    let cam = grad_cam(
      self.layout.to_hwk(activations)?,
      self.layout.to_hwk(gradients)?,
    )?;
    let saliency = upsample_bilinear(cam.view(), w as u32, h as u32);

    Ok(Inference {
      probabilities,
      saliency: SaliencyMap::new(w as u32, h as u32, saliency)?,
    })
  }
}
