// 该文件是 Lungscan 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::UploadedImage,
  output::Render,
  task::{DetectionArtifacts, DetectionSummary},
};

const DEFAULT_STEM: &str = "scan";

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 将热力图、报告和结果摘要写入目录，`folder:///path/to/out`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn stem(frame: &UploadedImage) -> String {
    frame
      .file_name
      .as_deref()
      .and_then(|name| Path::new(name).file_stem())
      .map(|stem| stem.to_string_lossy().into_owned())
      .filter(|stem| !stem.is_empty())
      .unwrap_or_else(|| DEFAULT_STEM.to_string())
  }
}

impl Render<UploadedImage, DetectionArtifacts> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &UploadedImage,
    result: &DetectionArtifacts,
  ) -> Result<(), Self::Error> {
    std::fs::create_dir_all(&self.directory)?;
    let stem = Self::stem(frame);

    let heatmap_path = self.directory.join(format!("{}_heatmap.png", stem));
    let report_path = self.directory.join(format!("{}_report.pdf", stem));
    let summary_path = self.directory.join(format!("{}.json", stem));

    std::fs::write(&heatmap_path, &result.heatmap_png)?;
    std::fs::write(&report_path, &result.report_pdf)?;
    let summary = serde_json::to_vec_pretty(&DetectionSummary::from(result))?;
    std::fs::write(&summary_path, summary)?;

    info!("保存热力图到文件: {}", heatmap_path.display());
    info!("保存报告到文件: {}", report_path.display());

    Ok(())
  }
}
