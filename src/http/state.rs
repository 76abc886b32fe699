// 该文件是 Lungscan 项目的一部分。
// src/http/state.rs - 应用共享状态
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

use std::sync::{Arc, OnceLock};

use crate::task::{DetectionPipeline, TaskError};

/// 进程生命周期内的上下文，模型加载完成后写入一次
#[derive(Clone, Default)]
pub struct AppState {
  pipeline: Arc<OnceLock<Arc<DetectionPipeline>>>,
}

impl AppState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_pipeline(pipeline: DetectionPipeline) -> Self {
    let state = Self::new();
    state.install(pipeline);
    state
  }

  /// 返回 false 表示已经安装过
  pub fn install(&self, pipeline: DetectionPipeline) -> bool {
    self.pipeline.set(Arc::new(pipeline)).is_ok()
  }

  pub fn is_loaded(&self) -> bool {
    self.pipeline.get().is_some()
  }

  pub fn pipeline(&self) -> Result<Arc<DetectionPipeline>, TaskError> {
    self
      .pipeline
      .get()
      .cloned()
      .ok_or(TaskError::ServiceUnavailable)
  }
}
