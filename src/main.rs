// 该文件是 Lungscan 项目的一部分。
// src/main.rs - 服务主程序
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

mod args;

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use anyhow::{Result, bail};
use clap::Parser;
use tokio::{net::TcpListener, task::spawn_blocking};
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lungscan::{
  FromUrl,
  http::{AppState, router},
  model::OnnxClassifierBuilder,
  task::DetectionPipeline,
};

async fn load_pipeline(
  builder: OnnxClassifierBuilder,
  inference_timeout: Duration,
  state: AppState,
) -> Result<()> {
  let now = Instant::now();
  let model = spawn_blocking(move || builder.build()).await??;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());

  state.install(DetectionPipeline::new(Arc::new(model)).with_inference_timeout(inference_timeout));
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("Lungscan 肺部影像检测服务");
  info!("模型文件路径: {}", args.model);
  info!("Grad-CAM 层: {}", args.layer);
  info!("推理超时: {} 秒", args.inference_timeout);

  let builder = OnnxClassifierBuilder::from_url(&args.model)?
    .layer(args.layer.clone())
    .gradient_node(args.gradient_node.clone())
    .layout(args.layout);

  let state = AppState::new();
  let mut app = router(state.clone(), args.max_upload_mb * 1024 * 1024);
  if let Some(dir) = &args.static_dir {
    info!("静态文件目录: {}", dir.display());
    app = app.fallback_service(ServeDir::new(dir));
  }

  let listener = TcpListener::bind(args.listen).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);

  // 监听先于模型加载，加载期间的请求返回 Model not loaded
  let loading = tokio::spawn(load_pipeline(
    builder,
    Duration::from_secs(args.inference_timeout),
    state,
  ));

  let load_failed = Arc::new(AtomicBool::new(false));
  let failed = load_failed.clone();
  let shutdown = async move {
    let fatal = async {
      match loading.await {
        Ok(Ok(())) => std::future::pending::<()>().await,
        Ok(Err(e)) => error!("模型加载失败: {:#}", e),
        Err(e) => error!("模型加载任务异常退出: {}", e),
      }
    };
    tokio::select! {
      _ = tokio::signal::ctrl_c() => info!("收到退出信号，正在停止服务..."),
      _ = fatal => failed.store(true, Ordering::SeqCst),
    }
  };

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown)
    .await?;

  if load_failed.load(Ordering::SeqCst) {
    bail!("模型加载失败，服务已停止");
  }
  info!("服务已停止");
  Ok(())
}
