// 该文件是 Lungscan 项目的一部分。
// src/output/report.rs - PDF 检测报告
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

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::{Compression, write::ZlibEncoder};
use image::{RgbImage, RgbaImage};
use lopdf::{
  Document, Object, ObjectId, Stream,
  content::{Content, Operation},
  dictionary,
};
use thiserror::Error;
use tracing::debug;

use crate::model::RiskBucket;

// 页面布局常量（单位: pt）
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const PAGE_MARGIN: f32 = 72.0;
const TITLE_FONT_SIZE: f32 = 18.0;
const BODY_FONT_SIZE: f32 = 12.0;
const FOOTNOTE_FONT_SIZE: f32 = 9.0;
const LINE_GAP: f32 = 1.2;
const IMAGE_WIDTH: f32 = 300.0;
const IMAGE_GAP: f32 = 12.0;

const REPORT_TITLE: &str = "Lung Cancer Detection Report";
const FONT_NAME: &str = "F1";
const ORIGINAL_IMAGE_NAME: &str = "Im1";
const HEATMAP_IMAGE_NAME: &str = "Im2";

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("无法嵌入空图像: {0}")]
  EmptyImage(&'static str),
  #[error("热力图解码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("压缩图像数据失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("PDF 生成错误: {0}")]
  PdfError(#[from] lopdf::Error),
}

/// 报告中的文字内容
#[derive(Debug, Clone)]
pub struct ReportContent {
  pub risk: RiskBucket,
  pub probability: f32,
  pub generated_at: DateTime<Utc>,
}

impl ReportContent {
  pub fn risk_line(&self) -> String {
    format!("Risk Score: {}", self.risk)
  }

  pub fn probability_line(&self) -> String {
    format!("Probability: {:.2}%", self.probability * 100.0)
  }

  pub fn generated_line(&self) -> String {
    format!(
      "Generated: {}",
      self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
  }
}

/// Helvetica 字宽（1/1000 em），覆盖可打印 ASCII
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
  278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
  556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
  1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
  667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
  333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
  556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

fn text_width(text: &str, font_size: f32) -> f32 {
  let units: u32 = text
    .chars()
    .map(|ch| match ch {
      ' '..='~' => HELVETICA_WIDTHS[(ch as usize) - 0x20] as u32,
      _ => 556,
    })
    .sum();
  units as f32 * font_size / 1000.0
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ReportError> {
  let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(data)?;
  Ok(encoder.finish()?)
}

fn rgb_xobject(
  width: u32,
  height: u32,
  rgb: &[u8],
  soft_mask: Option<ObjectId>,
) -> Result<Stream, ReportError> {
  let mut dict = dictionary! {
    "Type" => "XObject",
    "Subtype" => "Image",
    "Width" => width as i64,
    "Height" => height as i64,
    "ColorSpace" => "DeviceRGB",
    "BitsPerComponent" => 8,
    "Filter" => "FlateDecode",
  };
  if let Some(mask) = soft_mask {
    dict.set("SMask", mask);
  }
  Ok(Stream::new(dict, deflate(rgb)?))
}

fn gray_xobject(width: u32, height: u32, gray: &[u8]) -> Result<Stream, ReportError> {
  let dict = dictionary! {
    "Type" => "XObject",
    "Subtype" => "Image",
    "Width" => width as i64,
    "Height" => height as i64,
    "ColorSpace" => "DeviceGray",
    "BitsPerComponent" => 8,
    "Filter" => "FlateDecode",
  };
  Ok(Stream::new(dict, deflate(gray)?))
}

/// 按固定宽度等比缩放后的图像摆放尺寸
fn scaled_size(width: u32, height: u32) -> (f32, f32) {
  (IMAGE_WIDTH, IMAGE_WIDTH * height as f32 / width as f32)
}

pub struct Report {
  title: String,
}

impl Default for Report {
  fn default() -> Self {
    Self {
      title: REPORT_TITLE.to_string(),
    }
  }
}

impl Report {
  fn text(ops: &mut Vec<Operation>, text: &str, font_size: f32, x: f32, y: f32) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
      "Tf",
      vec![FONT_NAME.into(), font_size.into()],
    ));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(text)]));
    ops.push(Operation::new("ET", vec![]));
  }

  fn image(ops: &mut Vec<Operation>, name: &str, x: f32, y: f32, width: f32, height: f32) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
      "cm",
      vec![
        width.into(),
        0.into(),
        0.into(),
        height.into(),
        x.into(),
        y.into(),
      ],
    ));
    ops.push(Operation::new("Do", vec![name.into()]));
    ops.push(Operation::new("Q", vec![]));
  }

  /// 生成单页 PDF：标题、风险等级、概率、原图与热力图
  pub fn render(
    &self,
    original: &RgbImage,
    heatmap: &RgbaImage,
    content: &ReportContent,
  ) -> Result<Vec<u8>, ReportError> {
    if original.width() == 0 || original.height() == 0 {
      return Err(ReportError::EmptyImage("original"));
    }
    if heatmap.width() == 0 || heatmap.height() == 0 {
      return Err(ReportError::EmptyImage("heatmap"));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
      "Type" => "Font",
      "Subtype" => "Type1",
      "BaseFont" => "Helvetica",
      "Encoding" => "WinAnsiEncoding",
    });

    let original_id = doc.add_object(rgb_xobject(
      original.width(),
      original.height(),
      original.as_raw(),
      None,
    )?);

    let (heatmap_rgb, heatmap_alpha): (Vec<u8>, Vec<u8>) = heatmap.pixels().fold(
      (
        Vec::with_capacity(heatmap.len() / 4 * 3),
        Vec::with_capacity(heatmap.len() / 4),
      ),
      |(mut rgb, mut alpha), pixel| {
        let [r, g, b, a] = pixel.0;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
        (rgb, alpha)
      },
    );
    let mask_id = doc.add_object(gray_xobject(
      heatmap.width(),
      heatmap.height(),
      &heatmap_alpha,
    )?);
    let heatmap_id = doc.add_object(rgb_xobject(
      heatmap.width(),
      heatmap.height(),
      &heatmap_rgb,
      Some(mask_id),
    )?);

    let resources_id = doc.add_object(dictionary! {
      "Font" => dictionary! {
        FONT_NAME => font_id,
      },
      "XObject" => dictionary! {
        ORIGINAL_IMAGE_NAME => original_id,
        HEATMAP_IMAGE_NAME => heatmap_id,
      },
    });

    let mut ops = Vec::new();
    let mut cursor = PAGE_HEIGHT - PAGE_MARGIN;

    cursor -= TITLE_FONT_SIZE;
    let title_x = (PAGE_WIDTH - text_width(&self.title, TITLE_FONT_SIZE)) / 2.0;
    Self::text(&mut ops, &self.title, TITLE_FONT_SIZE, title_x, cursor);
    cursor -= TITLE_FONT_SIZE * LINE_GAP;

    for (line, size) in [
      (content.risk_line(), BODY_FONT_SIZE),
      (content.probability_line(), BODY_FONT_SIZE),
      (content.generated_line(), FOOTNOTE_FONT_SIZE),
    ] {
      cursor -= size;
      Self::text(&mut ops, &line, size, PAGE_MARGIN, cursor);
      cursor -= size * (LINE_GAP - 1.0);
    }
    cursor -= BODY_FONT_SIZE * LINE_GAP;

    let (ow, oh) = scaled_size(original.width(), original.height());
    let (hw, hh) = scaled_size(heatmap.width(), heatmap.height());
    let available = cursor - PAGE_MARGIN - IMAGE_GAP;
    // 两图总高超出页面时等比缩小，保持单页
    let shrink = if oh + hh > available {
      available / (oh + hh)
    } else {
      1.0
    };
    debug!("报告图像缩放系数: {:.3}", shrink);

    cursor -= oh * shrink;
    Self::image(
      &mut ops,
      ORIGINAL_IMAGE_NAME,
      PAGE_MARGIN,
      cursor,
      ow * shrink,
      oh * shrink,
    );
    cursor -= IMAGE_GAP + hh * shrink;
    Self::image(
      &mut ops,
      HEATMAP_IMAGE_NAME,
      PAGE_MARGIN,
      cursor,
      hw * shrink,
      hh * shrink,
    );

    let content_id = doc.add_object(Stream::new(
      dictionary! {},
      Content { operations: ops }.encode()?,
    ));

    let page_id = doc.add_object(dictionary! {
      "Type" => "Page",
      "Parent" => pages_id,
      "Contents" => content_id,
      "Resources" => resources_id,
      "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    });

    doc.objects.insert(
      pages_id,
      Object::Dictionary(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
      }),
    );

    let catalog_id = doc.add_object(dictionary! {
      "Type" => "Catalog",
      "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
      "Title" => Object::string_literal(self.title.as_str()),
      "Producer" => Object::string_literal(concat!("lungscan ", env!("CARGO_PKG_VERSION"))),
      "CreationDate" => Object::string_literal(
        content.generated_at.format("D:%Y%m%d%H%M%SZ").to_string(),
      ),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf)?;
    debug!("报告 PDF 大小: {} 字节", buf.len());
    Ok(buf)
  }
}

/// 生成报告；热力图以 PNG 字节传入
pub fn generate_report(
  original: &RgbImage,
  heatmap_png: &[u8],
  risk: RiskBucket,
  probability: f32,
) -> Result<Vec<u8>, ReportError> {
  let heatmap = image::load_from_memory(heatmap_png)?.to_rgba8();
  let content = ReportContent {
    risk,
    probability,
    generated_at: Utc::now(),
  };
  Report::default().render(original, &heatmap, &content)
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use chrono::TimeZone;
  use image::{Rgb, Rgba};

  pub(crate) fn text_runs(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1);
    let page_id = *pages.values().next().unwrap();
    let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
    content
      .operations
      .iter()
      .filter(|op| op.operator == "Tj")
      .filter_map(|op| match op.operands.first() {
        Some(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
      })
      .collect()
  }

  pub(crate) fn rgb_image_count(pdf: &[u8]) -> usize {
    let doc = Document::load_mem(pdf).unwrap();
    doc
      .objects
      .values()
      .filter_map(|object| object.as_stream().ok())
      .filter(|stream| {
        let is_image = stream
          .dict
          .get(b"Subtype")
          .and_then(Object::as_name)
          .map(|name| name == b"Image")
          .unwrap_or(false);
        let is_rgb = stream
          .dict
          .get(b"ColorSpace")
          .and_then(Object::as_name)
          .map(|name| name == b"DeviceRGB")
          .unwrap_or(false);
        is_image && is_rgb
      })
      .count()
  }

  fn content(risk: RiskBucket, probability: f32) -> ReportContent {
    ReportContent {
      risk,
      probability,
      generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
    }
  }

  #[test]
  fn report_contains_risk_text_and_two_images() {
    let original = RgbImage::from_pixel(512, 384, Rgb([90, 90, 90]));
    let heatmap = RgbaImage::from_pixel(224, 224, Rgba([255, 0, 0, 128]));
    let pdf = Report::default()
      .render(&original, &heatmap, &content(RiskBucket::High, 0.8731))
      .unwrap();

    assert!(pdf.starts_with(b"%PDF-1.5"));
    let runs = text_runs(&pdf);
    assert!(runs.contains(&"Lung Cancer Detection Report".to_string()));
    assert!(runs.contains(&"Risk Score: High".to_string()));
    assert!(runs.contains(&"Probability: 87.31%".to_string()));
    assert!(runs.contains(&"Generated: 2026-03-01T08:30:00Z".to_string()));
    assert_eq!(rgb_image_count(&pdf), 2);
  }

  #[test]
  fn tall_images_still_fit_one_page() {
    let original = RgbImage::from_pixel(100, 1000, Rgb([1, 2, 3]));
    let heatmap = RgbaImage::from_pixel(224, 224, Rgba([0, 0, 0, 128]));
    let pdf = Report::default()
      .render(&original, &heatmap, &content(RiskBucket::Low, 0.01))
      .unwrap();
    assert!(text_runs(&pdf).contains(&"Risk Score: Low".to_string()));
  }

  #[test]
  fn empty_images_cannot_be_embedded() {
    let heatmap = RgbaImage::from_pixel(224, 224, Rgba([0, 0, 0, 128]));
    let err = Report::default()
      .render(&RgbImage::new(0, 0), &heatmap, &content(RiskBucket::Low, 0.1))
      .unwrap_err();
    assert!(matches!(err, ReportError::EmptyImage("original")));
  }

  #[test]
  fn undecodable_heatmap_is_a_report_error() {
    let original = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
    let err = generate_report(&original, b"not png", RiskBucket::Moderate, 0.4).unwrap_err();
    assert!(matches!(err, ReportError::ImageError(_)));
  }

  #[test]
  fn probability_is_rendered_with_two_decimals() {
    assert_eq!(content(RiskBucket::Moderate, 0.5).probability_line(), "Probability: 50.00%");
    assert_eq!(content(RiskBucket::Low, 0.123456).probability_line(), "Probability: 12.35%");
  }

  #[test]
  fn title_is_centred() {
    let width = text_width(REPORT_TITLE, TITLE_FONT_SIZE);
    assert!(width > 200.0 && width < 300.0);
  }
}
