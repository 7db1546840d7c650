// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/output.rs - 结果展示与输出
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

use std::fmt::Write as _;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{ClassNames, ConfidenceThreshold, InferenceOutput, ModelVariant},
  select::{Condition, PredictionResult, Selection},
};

pub trait Render: Sized {
  type Error;
  fn render_result(&self, image: &RgbImage, report: &Report) -> Result<(), Self::Error>;
}

pub mod draw;
pub mod html;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

mod directory_record;
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

use self::draw::Draw;

const PROGRESS_BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerLevel {
  Success,
  Error,
  Warning,
}

impl BannerLevel {
  pub fn css_class(self) -> &'static str {
    match self {
      BannerLevel::Success => "success",
      BannerLevel::Error => "error",
      BannerLevel::Warning => "warning",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
  pub level: BannerLevel,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
  pub name: String,
  pub probability: f32,
}

/// 一次检测的展示结果
#[derive(Debug, Clone, Serialize)]
pub struct Report {
  pub variant: Option<ModelVariant>,
  pub threshold: ConfidenceThreshold,
  pub banner: Banner,
  pub prediction: Option<PredictionResult>,
  pub confidence_text: Option<String>,
  /// 进度条比例，等于置信度
  pub progress: Option<f32>,
  pub probabilities: Vec<ClassScore>,
  /// 上传的原图，任何结果下都会展示
  #[serde(skip)]
  pub uploaded: RgbImage,
  #[serde(skip)]
  pub annotated: Option<RgbImage>,
}

/// 0.8734 -> `87.34%`
pub fn format_percent(value: f32) -> String {
  format!("{:.2}%", value * 100.0)
}

/// 终端进度条，例如 `[#####-----]`
pub fn progress_bar(value: f32, width: usize) -> String {
  let filled = ((value.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
  format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

impl Report {
  /// 由选择结果构造展示内容；检测模型且有结果时在原图副本上绘制检测框
  pub fn build(
    variant: Option<ModelVariant>,
    threshold: ConfidenceThreshold,
    selection: &Selection,
    output: &InferenceOutput,
    class_names: &ClassNames,
    image: &RgbImage,
    draw: &Draw,
  ) -> Self {
    let banner = match selection {
      Selection::Found(prediction) => match prediction.condition {
        Condition::Good => Banner {
          level: BannerLevel::Success,
          message: format!("Bottle Condition: {}", Condition::Good),
        },
        Condition::Bad => Banner {
          level: BannerLevel::Error,
          message: format!("Bottle Condition: {}", Condition::Bad),
        },
      },
      Selection::NoDetection => Banner {
        level: BannerLevel::Warning,
        message: "No bottle detected".to_string(),
      },
      Selection::Unclassified => Banner {
        level: BannerLevel::Warning,
        message: "Unable to classify image".to_string(),
      },
    };

    let prediction = selection.prediction().cloned();
    let confidence_text = prediction
      .as_ref()
      .map(|p| format!("Confidence Score: {}", format_percent(p.confidence)));
    let progress = prediction.as_ref().map(|p| p.confidence);

    let (probabilities, annotated) = match (output, &prediction) {
      (InferenceOutput::Probabilities(result), Some(_)) => {
        let probabilities = class_names
          .iter()
          .zip(result.probs.iter())
          .map(|((_, name), &probability)| ClassScore {
            name: name.to_string(),
            probability,
          })
          .collect();
        (probabilities, None)
      }
      (InferenceOutput::Detections(result), Some(_)) => {
        let mut annotated = image.clone();
        draw.draw_detections(&mut annotated, result, class_names);
        (Vec::new(), Some(annotated))
      }
      _ => (Vec::new(), None),
    };

    Report {
      variant,
      threshold,
      banner,
      prediction,
      confidence_text,
      progress,
      probabilities,
      uploaded: image.clone(),
      annotated,
    }
  }

  pub fn is_found(&self) -> bool {
    self.prediction.is_some()
  }

  /// 终端输出文本
  pub fn to_terminal(&self) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{}", self.banner.message);
    if let Some(confidence_text) = &self.confidence_text {
      let _ = writeln!(text, "{}", confidence_text);
    }
    if let Some(progress) = self.progress {
      let _ = writeln!(
        text,
        "{} {}",
        progress_bar(progress, PROGRESS_BAR_WIDTH),
        format_percent(progress)
      );
    }
    for score in &self.probabilities {
      let _ = writeln!(text, "{}: {}", score.name, format_percent(score.probability));
    }
    text
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("字体加载失败: {0}")]
  Font(#[from] ab_glyph::InvalidFont),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  SaveImageFileOutput(SaveImageFileOutput),
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, image: &RgbImage, report: &Report) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(image, report)
        .map_err(OutputError::from),
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(image, report)
        .map_err(OutputError::from),
    }
  }
}
