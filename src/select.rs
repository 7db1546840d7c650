// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/select.rs - 结果选择
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

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::model::{ClassNames, InferenceError, InferenceOutput};

/// 瓶子状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
  Good,
  Bad,
}

impl Condition {
  /// 类别名为 `good`（不区分大小写）即为 GOOD，其余都是 BAD
  pub fn from_label(label: &str) -> Self {
    if label.eq_ignore_ascii_case("good") {
      Condition::Good
    } else {
      Condition::Bad
    }
  }
}

impl fmt::Display for Condition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Condition::Good => f.write_str("GOOD"),
      Condition::Bad => f.write_str("BAD"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
  pub label: String,
  pub condition: Condition,
  pub confidence: f32,
  pub class_id: u32,
  pub bbox: Option<[f32; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
  Found(PredictionResult),
  /// 检测模型没有返回任何框
  NoDetection,
  /// 分类模型没有返回概率
  Unclassified,
}

impl Selection {
  pub fn prediction(&self) -> Option<&PredictionResult> {
    match self {
      Selection::Found(prediction) => Some(prediction),
      _ => None,
    }
  }
}

fn lookup(class_names: &ClassNames, class_id: u32) -> Result<&str, InferenceError> {
  class_names
    .get(class_id)
    .ok_or(InferenceError::UnknownClass {
      class_id,
      num_classes: class_names.len(),
    })
}

/// 置信度限制在 [0, 1]，NaN 与无穷大视为推理错误
fn confidence(score: f32) -> Result<f32, InferenceError> {
  if score.is_finite() {
    Ok(score.clamp(0.0, 1.0))
  } else {
    Err(InferenceError::NonFiniteScore(score))
  }
}

/// 从推理输出中选出最终结果
///
/// 检测结果直接取第一个框，不重新排序；分类结果使用推理端给出的 top1。
pub fn select(
  output: &InferenceOutput,
  class_names: &ClassNames,
) -> Result<Selection, InferenceError> {
  match output {
    InferenceOutput::Detections(result) => {
      let Some(first) = result.items.first() else {
        debug!("没有检测到目标");
        return Ok(Selection::NoDetection);
      };
      let label = lookup(class_names, first.class_id)?;
      debug!("选中检测结果: {} {:.4}", label, first.score);
      Ok(Selection::Found(PredictionResult {
        label: label.to_string(),
        condition: Condition::from_label(label),
        confidence: confidence(first.score)?,
        class_id: first.class_id,
        bbox: first.bbox,
      }))
    }
    InferenceOutput::Probabilities(result) => {
      if result.probs.is_empty() {
        return Ok(Selection::Unclassified);
      }
      let label = lookup(class_names, result.top1)?;
      debug!("选中分类结果: {} {:.4}", label, result.top1_score);
      Ok(Selection::Found(PredictionResult {
        label: label.to_string(),
        condition: Condition::from_label(label),
        confidence: confidence(result.top1_score)?,
        class_id: result.top1,
        bbox: None,
      }))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassifyResult, DetectItem, DetectResult};

  fn detections(items: &[(u32, f32)]) -> InferenceOutput {
    InferenceOutput::Detections(DetectResult::from(
      items
        .iter()
        .map(|&(class_id, score)| DetectItem {
          class_id,
          score,
          bbox: Some([0.1, 0.1, 0.9, 0.9]),
        })
        .collect::<Vec<_>>(),
    ))
  }

  #[test]
  fn label_rule_is_case_insensitive() {
    assert_eq!(Condition::from_label("good"), Condition::Good);
    assert_eq!(Condition::from_label("GOOD"), Condition::Good);
    assert_eq!(Condition::from_label("Good"), Condition::Good);
    assert_eq!(Condition::from_label("bad"), Condition::Bad);
    assert_eq!(Condition::from_label("goodish"), Condition::Bad);
    assert_eq!(Condition::from_label(""), Condition::Bad);
  }

  #[test]
  fn good_detection() {
    let names = ClassNames::new(["defective", "good"]);
    let selection = select(&detections(&[(1, 0.92)]), &names).unwrap();
    let prediction = selection.prediction().unwrap();
    assert_eq!(prediction.label, "good");
    assert_eq!(prediction.condition, Condition::Good);
    assert_eq!(prediction.confidence, 0.92);
  }

  #[test]
  fn defective_detection() {
    let names = ClassNames::new(["defective", "good"]);
    let selection = select(&detections(&[(0, 0.61)]), &names).unwrap();
    assert_eq!(selection.prediction().unwrap().condition, Condition::Bad);
  }

  #[test]
  fn empty_detections() {
    let names = ClassNames::new(["bad", "good"]);
    assert_eq!(select(&detections(&[]), &names).unwrap(), Selection::NoDetection);
  }

  #[test]
  fn first_detection_wins_even_if_not_highest() {
    let names = ClassNames::new(["bad", "good"]);
    let selection = select(&detections(&[(0, 0.40), (1, 0.95)]), &names).unwrap();
    let prediction = selection.prediction().unwrap();
    assert_eq!(prediction.label, "bad");
    assert_eq!(prediction.confidence, 0.40);
  }

  #[test]
  fn classification_uses_reported_top1() {
    let names = ClassNames::new(["bad", "good"]);
    let output = InferenceOutput::Probabilities(ClassifyResult::from_probs(vec![0.10, 0.90]).unwrap());
    let prediction = select(&output, &names).unwrap();
    let prediction = prediction.prediction().unwrap();
    assert_eq!(prediction.class_id, 1);
    assert_eq!(prediction.condition, Condition::Good);
    assert_eq!(prediction.confidence, 0.90);
    assert_eq!(prediction.bbox, None);
  }

  #[test]
  fn empty_probabilities_are_unclassified() {
    let names = ClassNames::new(["bad", "good"]);
    let output = InferenceOutput::Probabilities(ClassifyResult {
      probs: Box::new([]),
      top1: 0,
      top1_score: 0.0,
    });
    assert_eq!(select(&output, &names).unwrap(), Selection::Unclassified);
  }

  #[test]
  fn non_finite_confidence_is_an_error() {
    let names = ClassNames::new(["bad", "good"]);
    let output = InferenceOutput::Probabilities(ClassifyResult {
      probs: Box::new([0.9, f32::NAN]),
      top1: 1,
      top1_score: f32::NAN,
    });
    assert!(matches!(
      select(&output, &names),
      Err(InferenceError::NonFiniteScore(_))
    ));
    assert!(matches!(
      select(&detections(&[(1, f32::NAN)]), &names),
      Err(InferenceError::NonFiniteScore(_))
    ));

    let output = InferenceOutput::Probabilities(ClassifyResult::from_probs(vec![0.9, f32::NAN]).unwrap());
    let selection = select(&output, &names).unwrap();
    let prediction = selection.prediction().unwrap();
    assert_eq!(prediction.label, "bad");
    assert!((0.0..=1.0).contains(&prediction.confidence));
  }

  #[test]
  fn class_outside_table_is_an_error() {
    let names = ClassNames::new(["bad", "good"]);
    assert!(matches!(
      select(&detections(&[(5, 0.8)]), &names),
      Err(InferenceError::UnknownClass {
        class_id: 5,
        num_classes: 2
      })
    ));
  }
}
