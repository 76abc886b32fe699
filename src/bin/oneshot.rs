// 该文件是 Lungscan 项目的一部分。
// src/bin/oneshot.rs - 单张影像检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use lungscan::{
  FromUrl,
  input::ImageFileInput,
  model::{ActivationLayout, OnnxClassifierBuilder},
  output::{DirectoryRecordOutput, Render},
  task::DetectionPipeline,
};
use tracing::info;

/// Lungscan 单次检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入影像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出目录
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// Grad-CAM 层
  #[arg(long, default_value = "last_conv_layer", value_name = "NODE")]
  pub layer: String,
  /// 梯度节点名
  #[arg(long, value_name = "NODE")]
  pub gradient_node: Option<String>,
  /// 激活张量布局
  #[arg(long, default_value = "nhwc", value_name = "LAYOUT")]
  pub layout: ActivationLayout,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let model = OnnxClassifierBuilder::from_url(&args.model)?
    .layer(args.layer)
    .gradient_node(args.gradient_node)
    .layout(args.layout)
    .build()?;
  let output = DirectoryRecordOutput::from_url(&args.output)?;
  let pipeline = DetectionPipeline::new(Arc::new(model));

  info!("开始推理...");
  for upload in input_image {
    let result = pipeline.run_blocking(&upload)?;
    info!(
      "检测结果: {} ({:.2}%), 风险等级: {}",
      result.label,
      result.score * 100.0,
      result.risk
    );
    output.render_result(&upload, &result)?;
  }

  Ok(())
}
