// 该文件是 Lungscan 项目的一部分。
// src/frame.rs - 归一化 NHWC 张量定义
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

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;
const PIXEL_SCALE: f32 = 255.0;

/// 模型输入边长
pub const SCAN_INPUT_SIZE: u32 = 224;

/// 模型输入张量：`[1, 224, 224, 3]`，取值范围 [0, 1]
pub type ScanTensor = NormalizedNhwcFrame<SCAN_INPUT_SIZE, SCAN_INPUT_SIZE>;

/// 批大小为 1 的 NHWC 浮点帧，像素值已除以 255
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedNhwcFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> Default for NormalizedNhwcFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      data: vec![0f32; size].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> NormalizedNhwcFrame<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// `[N, H, W, C]`
  pub fn shape(&self) -> [usize; 4] {
    [1, self.height(), self.width(), self.channels()]
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  /// 从 RGB 图像构造；尺寸不符时先用线性（三角）滤波缩放到 W×H
  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let resized;
    let image = if image.dimensions() == (W, H) {
      image
    } else {
      resized = image::imageops::resize(image, W, H, FilterType::Triangle);
      &resized
    };

    let data = image
      .as_raw()
      .iter()
      .map(|&value| value as f32 / PIXEL_SCALE)
      .collect::<Vec<_>>();

    Self {
      data: data.into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> From<&RgbImage> for NormalizedNhwcFrame<W, H> {
  fn from(image: &RgbImage) -> Self {
    Self::from_rgb_image(image)
  }
}
