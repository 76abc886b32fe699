// 该文件是 Lungscan 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

use lungscan::model::ActivationLayout;

/// Lungscan 服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径，例如 onnx:///srv/models/lung.onnx
  #[arg(long, env = "LUNGSCAN_MODEL", value_name = "MODEL")]
  pub model: Url,

  /// 用于 Grad-CAM 的卷积层节点名
  #[arg(long, env = "LUNGSCAN_LAYER", default_value = "last_conv_layer", value_name = "NODE")]
  pub layer: String,

  /// 梯度节点名，缺省为 `<layer>_grad`
  #[arg(long, env = "LUNGSCAN_GRADIENT_NODE", value_name = "NODE")]
  pub gradient_node: Option<String>,

  /// 激活张量布局: nhwc 或 nchw
  #[arg(long, env = "LUNGSCAN_LAYOUT", default_value = "nhwc", value_name = "LAYOUT")]
  pub layout: ActivationLayout,

  /// 监听地址
  #[arg(long, env = "LUNGSCAN_LISTEN", default_value = "0.0.0.0:3000", value_name = "ADDR")]
  pub listen: SocketAddr,

  /// 单次推理超时（秒）
  #[arg(long, env = "LUNGSCAN_INFERENCE_TIMEOUT", default_value = "30", value_name = "SECONDS")]
  pub inference_timeout: u64,

  /// 上传大小上限（MB）
  #[arg(long, env = "LUNGSCAN_MAX_UPLOAD_MB", default_value = "20", value_name = "MB")]
  pub max_upload_mb: usize,

  /// 前端静态文件目录
  #[arg(long, env = "LUNGSCAN_STATIC_DIR", value_name = "DIR")]
  pub static_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let args = Args::try_parse_from(["lungscan", "--model", "onnx:///m.onnx"]).unwrap();
    assert_eq!(args.layer, "last_conv_layer");
    assert_eq!(args.layout, ActivationLayout::Nhwc);
    assert_eq!(args.listen.port(), 3000);
    assert_eq!(args.inference_timeout, 30);
    assert_eq!(args.max_upload_mb, 20);
    assert!(args.gradient_node.is_none());
  }

  #[test]
  fn layout_accepts_channels_first() {
    let args = Args::try_parse_from([
      "lungscan",
      "--model",
      "onnx:///m.onnx",
      "--layout",
      "channels-first",
    ])
    .unwrap();
    assert_eq!(args.layout, ActivationLayout::Nchw);
  }
}
