// 该文件是 Lungscan 项目的一部分。
// src/output/heatmap.rs - 显著性热力图叠加
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

use image::{
  ExtendedColorType, ImageEncoder, Rgba, RgbaImage, RgbImage,
  codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder},
  imageops::FilterType,
};
use thiserror::Error;
use tract_onnx::prelude::tract_ndarray::ArrayView2;
use tracing::debug;

use crate::{
  frame::SCAN_INPUT_SIZE,
  model::{ModelError, SaliencyMap, upsample_bilinear},
};

// 叠加参数
const OVERLAY_ALPHA: u8 = 128;
const SALIENCY_GAIN: f32 = 255.0;

#[derive(Error, Debug)]
pub enum HeatmapError {
  #[error("PNG 编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
  #[error("图像尺寸为空")]
  EmptyImage,
  #[error("显著性图无效: {0}")]
  SaliencyError(#[from] ModelError),
}

pub struct Heatmap {
  canvas_size: u32,
  alpha: u8,
}

impl Default for Heatmap {
  fn default() -> Self {
    Self {
      canvas_size: SCAN_INPUT_SIZE,
      alpha: OVERLAY_ALPHA,
    }
  }
}

impl Heatmap {
  /// 将显著性图叠加到红色通道，输出固定透明度的 RGBA 画布
  pub fn overlay(&self, saliency: &SaliencyMap, original: &RgbImage) -> Result<RgbaImage, HeatmapError> {
    let size = self.canvas_size;
    if original.width() == 0 || original.height() == 0 {
      return Err(HeatmapError::EmptyImage);
    }

    let canvas = if original.dimensions() == (size, size) {
      original.clone()
    } else {
      image::imageops::resize(original, size, size, FilterType::Triangle)
    };

    let rescaled;
    let saliency = if (saliency.width(), saliency.height()) == (size, size) {
      saliency
    } else {
      debug!(
        "缩放显著性图 {}x{} -> {}x{}",
        saliency.width(),
        saliency.height(),
        size,
        size
      );
      let grid = ArrayView2::from_shape(
        (saliency.height() as usize, saliency.width() as usize),
        saliency.as_slice(),
      )
      .map_err(|_| HeatmapError::EmptyImage)?;
      rescaled = SaliencyMap::new(size, size, upsample_bilinear(grid, size, size))?;
      &rescaled
    };

    Ok(RgbaImage::from_fn(size, size, |x, y| {
      let [r, g, b] = canvas.get_pixel(x, y).0;
      let red = (r as f32 + saliency.get(x, y) * SALIENCY_GAIN).clamp(0.0, 255.0) as u8;
      Rgba([red, g, b, self.alpha])
    }))
  }

  /// 叠加并编码为 PNG
  pub fn composite(&self, saliency: &SaliencyMap, original: &RgbImage) -> Result<Vec<u8>, HeatmapError> {
    let image = self.overlay(saliency, original)?;
    self.encode_png(&image)
  }

  /// 编码参数固定，相同输入得到相同字节
  pub fn encode_png(&self, image: &RgbaImage) -> Result<Vec<u8>, HeatmapError> {
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Default, PngFilterType::Adaptive)
      .write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
      )?;
    debug!("热力图 PNG 大小: {} 字节", buf.len());
    Ok(buf)
  }
}

/// 默认参数的叠加
pub fn composite(saliency: &SaliencyMap, original: &RgbImage) -> Result<Vec<u8>, HeatmapError> {
  Heatmap::default().composite(saliency, original)
}
