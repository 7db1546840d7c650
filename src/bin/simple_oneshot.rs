// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use pingjian::{
  FromUrl,
  input::ImageFileInput,
  model::{ConfidenceThreshold, DEFAULT_IMAGE_SIZE, OnnxModelBuilder},
  output::{OutputWrapper, Render},
  task::InspectTask,
};

/// 对单张图像执行瓶子状态检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 onnx:///models/augmented/best.onnx?labels=bad,good
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///data/bottle.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，image:///out.png 或 folder:///records[?always]
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 置信度阈值 [0.01, 1.0]
  #[arg(long, default_value_t = ConfidenceThreshold::default(), value_name = "THRESHOLD")]
  pub threshold: ConfidenceThreshold,
  /// 推理输入尺寸
  #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE, value_name = "SIZE")]
  pub imgsz: u32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  let model = OnnxModelBuilder::from_url(&args.model)?
    .build()
    .context("模型加载失败")?;
  let input = ImageFileInput::from_url(&args.input)?;
  let output = args.output.as_ref().map(OutputWrapper::from_url).transpose()?;
  let image = input
    .decode()
    .with_context(|| format!("无法解码图像 {}", input.path().display()))?;

  let task = InspectTask::new()?.with_image_size(args.imgsz);
  let report = task.inspect(&model, None, &image, args.threshold)?;

  print!("{}", report.to_terminal());

  if let Some(output) = output {
    output.render_result(&image, &report)?;
  }

  Ok(())
}
