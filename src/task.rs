// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/task.rs - 检测任务
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

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::{
  input::{DecodeError, decode_image},
  model::{
    ConfidenceThreshold, DEFAULT_IMAGE_SIZE, InferenceError, InferenceParams, Model, ModelCache,
    ModelLoadError, ModelVariant, ThresholdError,
  },
  output::{OutputError, Report, draw::Draw},
  select::select,
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("参数错误: {0}")]
  Threshold(#[from] ThresholdError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

impl TaskError {
  /// 由请求内容引起的错误
  pub fn is_client_error(&self) -> bool {
    matches!(self, TaskError::Decode(_) | TaskError::Threshold(_))
  }
}

/// 单次检测流程：解码 -> 推理 -> 选择 -> 展示
pub struct InspectTask {
  draw: Draw,
  image_size: u32,
}

impl InspectTask {
  pub fn new() -> Result<Self, OutputError> {
    Ok(Self {
      draw: Draw::new()?,
      image_size: DEFAULT_IMAGE_SIZE,
    })
  }

  pub fn with_image_size(mut self, image_size: u32) -> Self {
    self.image_size = image_size;
    self
  }

  /// 对已解码的图像执行检测
  pub fn inspect(
    &self,
    model: &dyn Model,
    variant: Option<ModelVariant>,
    image: &RgbImage,
    threshold: ConfidenceThreshold,
  ) -> Result<Report, TaskError> {
    let params = InferenceParams {
      threshold,
      image_size: self.image_size,
    };

    info!("开始推理 ({:?})，置信度阈值 {}", model.task(), threshold);
    let now = Instant::now();
    let output = model.infer(image, &params)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let selection = select(&output, model.class_names())?;
    let report = Report::build(
      variant,
      threshold,
      &selection,
      &output,
      model.class_names(),
      image,
      &self.draw,
    );
    info!("检测结果: {}", report.banner.message);

    Ok(report)
  }

  /// 处理一次上传：解码图像，从缓存取模型后检测
  pub fn inspect_upload(
    &self,
    cache: &ModelCache,
    variant: ModelVariant,
    bytes: &[u8],
    threshold: ConfidenceThreshold,
  ) -> Result<(RgbImage, Report), TaskError> {
    let image = decode_image(bytes)?;
    let model = cache.get_or_load(variant)?;
    let report = self.inspect(model.as_ref(), Some(variant), &image, threshold)?;
    Ok((image, report))
  }
}
