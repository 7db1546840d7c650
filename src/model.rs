// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, path::PathBuf, str::FromStr};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

/// 推理输入分辨率
pub const DEFAULT_IMAGE_SIZE: u32 = 640;
pub const DEFAULT_CONFIDENCE: f32 = 0.15;
pub const MIN_CONFIDENCE: f32 = 0.01;
pub const MAX_CONFIDENCE: f32 = 1.0;

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
  #[error("置信度阈值 {0} 超出范围 [0.01, 1.0]")]
  OutOfRange(f32),
  #[error("无法解析置信度阈值: {0}")]
  Parse(String),
}

/// 置信度阈值，取值范围 [0.01, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
  pub fn new(value: f32) -> Result<Self, ThresholdError> {
    if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&value) {
      return Err(ThresholdError::OutOfRange(value));
    }
    Ok(Self(value))
  }

  pub fn value(self) -> f32 {
    self.0
  }
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    Self(DEFAULT_CONFIDENCE)
  }
}

impl FromStr for ConfidenceThreshold {
  type Err = ThresholdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value = s
      .trim()
      .parse::<f32>()
      .map_err(|_| ThresholdError::Parse(s.to_string()))?;
    Self::new(value)
  }
}

impl fmt::Display for ConfidenceThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.0)
  }
}

/// 单次推理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
  pub threshold: ConfidenceThreshold,
  pub image_size: u32,
}

impl Default for InferenceParams {
  fn default() -> Self {
    Self {
      threshold: ConfidenceThreshold::default(),
      image_size: DEFAULT_IMAGE_SIZE,
    }
  }
}

impl InferenceParams {
  pub fn with_threshold(mut self, threshold: ConfidenceThreshold) -> Self {
    self.threshold = threshold;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
  Classify,
  Detect,
}

impl FromStr for Task {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "classify" | "cls" => Ok(Task::Classify),
      "detect" | "det" => Ok(Task::Detect),
      other => Err(format!("未知任务类型: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: Option<[f32; 4]>, // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 分类结果，`top1` 与 `top1_score` 由推理端给出
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyResult {
  pub probs: Box<[f32]>,
  pub top1: u32,
  pub top1_score: f32,
}

impl ClassifyResult {
  /// 由概率分布构造结果，没有有限值时返回 `None`
  pub fn from_probs(probs: Vec<f32>) -> Option<Self> {
    let (top1, top1_score) = probs
      .iter()
      .copied()
      .enumerate()
      .filter(|(_, score)| score.is_finite())
      .fold(None, |best: Option<(usize, f32)>, (idx, score)| match best {
        Some((_, best_score)) if best_score >= score => best,
        _ => Some((idx, score)),
      })?;

    Some(Self {
      probs: probs.into_boxed_slice(),
      top1: top1 as u32,
      top1_score,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
  Detections(DetectResult),
  Probabilities(ClassifyResult),
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {}", .0.display())]
  NotFound(PathBuf),
  #[error("模型加载错误: {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("模型无效: {}: {reason}", .path.display())]
  ModelInvalid { path: PathBuf, reason: String },
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
}

impl ModelLoadError {
  pub fn invalid(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
    ModelLoadError::ModelInvalid {
      path: path.into(),
      reason: reason.to_string(),
    }
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入形状不兼容: {0}")]
  InputShape(String),
  #[error("输出形状不符合预期: {0}")]
  OutputShape(String),
  #[error("类别索引 {class_id} 超出类别表范围 (共 {num_classes} 类)")]
  UnknownClass { class_id: u32, num_classes: usize },
  #[error("置信度不是有限值: {0}")]
  NonFiniteScore(f32),
  #[error("模型会话锁已失效")]
  SessionPoisoned,
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
}

/// 已加载的模型句柄
pub trait Model: Send + Sync {
  fn task(&self) -> Task;
  fn class_names(&self) -> &ClassNames;
  fn infer(
    &self,
    image: &RgbImage,
    params: &InferenceParams,
  ) -> Result<InferenceOutput, InferenceError>;
}

mod cache;
mod labels;
mod onnx;
pub mod yolo;

pub use self::cache::{ModelCache, ModelLoader, ModelRegistry, ModelVariant, OnnxLoader, VariantParseError};
pub use self::labels::ClassNames;
pub use self::onnx::{OnnxModel, OnnxModelBuilder};
