// 该文件是 Lungscan 项目的一部分。
// src/input.rs - 上传图像解码与预处理
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

use std::io::Cursor;

use image::{ImageFormat, ImageReader, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{SCAN_INPUT_SIZE, ScanTensor},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像解码失败: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("图像读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像尺寸为空: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 一次请求携带的原始上传内容
#[derive(Debug, Clone)]
pub struct UploadedImage {
  pub bytes: Vec<u8>,
  pub mime_type: Option<String>,
  pub file_name: Option<String>,
}

impl UploadedImage {
  pub fn new(bytes: impl Into<Vec<u8>>, mime_type: Option<String>) -> Self {
    Self {
      bytes: bytes.into(),
      mime_type,
      file_name: None,
    }
  }

  pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
    self.file_name = file_name;
    self
  }

  /// 声明的 MIME 类型所对应的解码格式；未声明或无法识别时返回 None
  fn declared_format(&self) -> Option<ImageFormat> {
    self
      .mime_type
      .as_deref()
      .and_then(ImageFormat::from_mime_type)
  }
}

/// 解码后的扫描图像：原始分辨率 + 224×224 画布
#[derive(Debug, Clone)]
pub struct ScanImage {
  original: RgbImage,
  canvas: RgbImage,
}

impl ScanImage {
  pub fn decode(upload: &UploadedImage) -> Result<Self, PreprocessError> {
    let reader = match upload.declared_format() {
      Some(format) => ImageReader::with_format(Cursor::new(&upload.bytes), format),
      None => ImageReader::new(Cursor::new(&upload.bytes)).with_guessed_format()?,
    };

    let original = match reader.decode() {
      Ok(image) => image.to_rgb8(),
      // 声明的类型可能与实际内容不符，退回到按内容识别
      Err(e) if upload.declared_format().is_some() => {
        debug!("按声明格式解码失败 ({}), 改为按内容识别", e);
        ImageReader::new(Cursor::new(&upload.bytes))
          .with_guessed_format()?
          .decode()?
          .to_rgb8()
      }
      Err(e) => return Err(e.into()),
    };

    Self::from_rgb(original)
  }

  pub fn from_rgb(original: RgbImage) -> Result<Self, PreprocessError> {
    let (width, height) = original.dimensions();
    if width == 0 || height == 0 {
      error!("图像尺寸为空: {}x{}", width, height);
      return Err(PreprocessError::EmptyImage(width, height));
    }
    debug!("解码图像尺寸: {}x{}", width, height);

    let canvas = image::imageops::resize(
      &original,
      SCAN_INPUT_SIZE,
      SCAN_INPUT_SIZE,
      FilterType::Triangle,
    );

    Ok(Self { original, canvas })
  }

  pub fn original(&self) -> &RgbImage {
    &self.original
  }

  /// 缩放到模型输入尺寸后的图像
  pub fn canvas(&self) -> &RgbImage {
    &self.canvas
  }

  pub fn tensor(&self) -> ScanTensor {
    ScanTensor::from(&self.canvas)
  }
}

/// 解码并归一化上传图像
pub fn preprocess(bytes: &[u8], mime_type: Option<&str>) -> Result<ScanTensor, PreprocessError> {
  let upload = UploadedImage::new(bytes, mime_type.map(str::to_string));
  Ok(ScanImage::decode(&upload)?.tensor())
}

/// 本地图像文件输入，`image:///path/to/scan.png`
pub struct ImageFileInput {
  upload: Option<UploadedImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = PreprocessError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(PreprocessError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url.path();
    let bytes = std::fs::read(path)?;
    let mime_type = ImageFormat::from_path(path)
      .ok()
      .map(|format| format.to_mime_type().to_string());
    let file_name = std::path::Path::new(path)
      .file_name()
      .map(|name| name.to_string_lossy().into_owned());

    Ok(ImageFileInput {
      upload: Some(UploadedImage::new(bytes, mime_type).with_file_name(file_name)),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = UploadedImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.upload.take()
  }
}
