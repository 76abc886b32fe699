// 该文件是 Lungscan 项目的一部分。
// src/model/gradcam.rs - Grad-CAM 显著性图
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

use std::str::FromStr;

use tract_onnx::prelude::tract_ndarray::{Array2, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix3, s};
use tracing::debug;

use crate::model::ModelError;

/// 卷积层激活张量的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationLayout {
  /// `[1, h, w, k]`
  #[default]
  Nhwc,
  /// `[1, k, h, w]`
  Nchw,
}

impl FromStr for ActivationLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nhwc" | "channels-last" => Ok(ActivationLayout::Nhwc),
      "nchw" | "channels-first" => Ok(ActivationLayout::Nchw),
      other => Err(format!("未知的激活布局: {}", other)),
    }
  }
}

impl ActivationLayout {
  /// 去掉批维度并转为 `[h, w, k]` 视图
  pub fn to_hwk<'a>(&self, tensor: ArrayViewD<'a, f32>) -> Result<ArrayView3<'a, f32>, ModelError> {
    if tensor.ndim() != 4 || tensor.shape()[0] != 1 {
      return Err(ModelError::execution(format!(
        "激活张量形状应为 4 维且批大小为 1, 实际为 {:?}",
        tensor.shape()
      )));
    }
    let view = tensor
      .index_axis_move(Axis(0), 0)
      .into_dimensionality::<Ix3>()
      .map_err(ModelError::execution)?;
    Ok(match self {
      ActivationLayout::Nhwc => view,
      ActivationLayout::Nchw => view.permuted_axes([1, 2, 0]),
    })
  }
}

/// 梯度加权类激活图
///
/// 每个通道的权重是该通道梯度的空间均值，显著性为激活按权重求和后截断到非负。
pub fn grad_cam(
  activations: ArrayView3<f32>,
  gradients: ArrayView3<f32>,
) -> Result<Array2<f32>, ModelError> {
  if activations.shape() != gradients.shape() {
    return Err(ModelError::execution(format!(
      "激活与梯度形状不一致: {:?} vs {:?}",
      activations.shape(),
      gradients.shape()
    )));
  }

  let (h, w, k) = activations.dim();
  if h == 0 || w == 0 || k == 0 {
    return Err(ModelError::execution("激活张量为空"));
  }

  let weights = gradients
    .mean_axis(Axis(0))
    .and_then(|m| m.mean_axis(Axis(0)))
    .ok_or_else(|| ModelError::execution("无法计算通道权重"))?;
  debug!("Grad-CAM: {}x{} 空间, {} 通道", h, w, k);

  let mut cam = Array2::<f32>::zeros((h, w));
  for ((i, j), value) in cam.indexed_iter_mut() {
    let channels = activations.slice(s![i, j, ..]);
    let sum: f32 = channels.iter().zip(weights.iter()).map(|(a, w)| a * w).sum();
    *value = sum.max(0.0);
  }

  if cam.iter().any(|v| !v.is_finite()) {
    return Err(ModelError::execution("显著性图包含非有限值"));
  }

  Ok(cam)
}

/// 双线性插值缩放（像素中心对齐），返回行优先数据；空输入得到全零
pub fn upsample_bilinear(map: ArrayView2<f32>, width: u32, height: u32) -> Vec<f32> {
  let (src_h, src_w) = map.dim();
  let (width, height) = (width as usize, height as usize);
  if src_h == 0 || src_w == 0 {
    return vec![0.0; width * height];
  }
  let scale_y = src_h as f32 / height as f32;
  let scale_x = src_w as f32 / width as f32;

  let mut out = Vec::with_capacity(width * height);
  for y in 0..height {
    let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
    let y0 = fy.floor() as usize;
    let y1 = (y0 + 1).min(src_h - 1);
    let dy = fy - y0 as f32;
    for x in 0..width {
      let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
      let x0 = fx.floor() as usize;
      let x1 = (x0 + 1).min(src_w - 1);
      let dx = fx - x0 as f32;

      let top = map[[y0, x0]] * (1.0 - dx) + map[[y0, x1]] * dx;
      let bottom = map[[y1, x0]] * (1.0 - dx) + map[[y1, x1]] * dx;
      out.push(top * (1.0 - dy) + bottom * dy);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use tract_onnx::prelude::tract_ndarray::{Array3, Array4, array};

  #[test]
  fn weights_are_spatial_mean_of_gradients() {
    // 2x1 空间, 2 通道; 通道 0 梯度均值 1, 通道 1 梯度均值 -1
    let activations = Array3::from_shape_vec((2, 1, 2), vec![1.0, 2.0, 3.0, 0.5]).unwrap();
    let gradients = Array3::from_shape_vec((2, 1, 2), vec![0.5, -2.0, 1.5, 0.0]).unwrap();
    let cam = grad_cam(activations.view(), gradients.view()).unwrap();
    // (1*1 + 2*-1) = -1 -> 0; (3*1 + 0.5*-1) = 2.5
    assert_eq!(cam, array![[0.0], [2.5]]);
  }

  #[test]
  fn mismatched_shapes_are_rejected() {
    let a = Array3::<f32>::zeros((2, 2, 3));
    let g = Array3::<f32>::zeros((2, 2, 4));
    assert!(grad_cam(a.view(), g.view()).is_err());
  }

  #[test]
  fn nchw_layout_is_permuted_to_hwk() {
    let tensor = Array4::from_shape_fn((1, 2, 3, 4), |(_, c, h, w)| (c * 100 + h * 10 + w) as f32);
    let view = ActivationLayout::Nchw.to_hwk(tensor.view().into_dyn()).unwrap();
    assert_eq!(view.dim(), (3, 4, 2));
    assert_eq!(view[[2, 1, 1]], 121.0);
  }

  #[test]
  fn layout_rejects_batched_tensors() {
    let tensor = Array4::<f32>::zeros((2, 3, 3, 1));
    assert!(ActivationLayout::Nhwc.to_hwk(tensor.view().into_dyn()).is_err());
  }

  #[test]
  fn upsampling_a_constant_map_stays_constant() {
    let map = Array2::from_elem((7, 7), 0.25f32);
    let out = upsample_bilinear(map.view(), 224, 224);
    assert_eq!(out.len(), 224 * 224);
    assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
  }

  #[test]
  fn upsampling_interpolates_between_cells() {
    let map = array![[0.0f32, 1.0]];
    let out = upsample_bilinear(map.view(), 4, 1);
    assert_eq!(out, vec![0.0, 0.25, 0.75, 1.0]);
  }

  #[test]
  fn upsampling_an_empty_map_yields_zeros() {
    let map = Array2::<f32>::zeros((0, 0));
    let out = upsample_bilinear(map.view(), 3, 2);
    assert_eq!(out, vec![0.0; 6]);
  }
}
