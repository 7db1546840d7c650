// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pingjian::{
  model::{ModelCache, ModelRegistry, OnnxLoader},
  server::{AppState, router},
  task::InspectTask,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("Pingjian 瓶子状态检测");
  info!("模型目录: {}", args.models.display());
  info!("监听地址: {}", args.listen);
  let Some((variants, default_variant)) = args.enabled_variants() else {
    bail!("至少需要启用一个模型");
  };
  if default_variant != args.variant {
    warn!("默认模型 {} 未启用，改用 {}", args.variant, default_variant);
  }
  info!(
    "启用模型: {}",
    variants.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
  );
  info!("默认模型: {}", default_variant);
  info!("默认置信度阈值: {}", args.threshold);

  let cache = ModelCache::new(ModelRegistry::with_root(&args.models), OnnxLoader);

  // 模型缺失时在接受请求前退出
  let preload = variants.clone();
  let cache = tokio::task::spawn_blocking(move || -> Result<ModelCache> {
    for variant in preload {
      cache
        .preload(variant)
        .with_context(|| format!("无法加载模型 {}", variant))?;
    }
    Ok(cache)
  })
  .await??;

  let state = AppState::new(
    cache,
    InspectTask::new()?,
    variants,
    default_variant,
    args.threshold,
  );
  let app = router(state);

  let listener = tokio::net::TcpListener::bind(args.listen).await?;
  info!("服务已启动: http://{}", args.listen);
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务已退出");
  Ok(())
}

async fn shutdown_signal() {
  if tokio::signal::ctrl_c().await.is_ok() {
    info!("收到中断信号，准备退出...");
  }
}
