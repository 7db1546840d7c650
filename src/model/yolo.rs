// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/model/yolo.rs - YOLO 输出后处理
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

use tracing::{debug, error};

use crate::{
  frame::Letterbox,
  model::{ClassifyResult, DetectItem, DetectResult, InferenceError},
};

/// NMS IOU 阈值
pub const NMS_IOU_THRESHOLD: f32 = 0.7;
/// 单张图片最多保留的检测数
pub const MAX_DETECTIONS: usize = 300;

/// 检测头输出的排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
  /// `[1, 4 + nc, N]`
  ChannelFirst,
  /// `[1, N, 4 + nc]`
  ChannelLast,
}

/// 根据类别数判断输出是 `[1, 4 + nc, N]` 还是转置后的 `[1, N, 4 + nc]`
fn match_layout(shape: &[usize], num_classes: usize) -> Option<(Layout, usize)> {
  let &[batch, dim1, dim2] = shape else {
    return None;
  };
  if batch != 1 {
    return None;
  }
  let channels = 4 + num_classes;
  if dim1 == channels {
    debug!("检测输出顺序正常: [1, {}, {}]", dim1, dim2);
    Some((Layout::ChannelFirst, dim2))
  } else if dim2 == channels {
    debug!("检测输出顺序交换: [1, {}, {}]", dim1, dim2);
    Some((Layout::ChannelLast, dim1))
  } else {
    error!(
      "检测输出大小不匹配 - 形状: {:?}, 期望通道数: {}",
      shape, channels
    );
    None
  }
}

/// 解码 YOLOv8 风格的检测输出
///
/// 每个候选框取最高类别分数，低于 `threshold` 的丢弃；框坐标从模型输入空间
/// 映射回原图的归一化坐标，再做按类别的 NMS。返回结果按分数降序排列。
pub fn decode_detections(
  data: &[f32],
  shape: &[usize],
  num_classes: usize,
  letterbox: &Letterbox,
  threshold: f32,
) -> Result<DetectResult, InferenceError> {
  let (layout, anchors) = match_layout(shape, num_classes).ok_or_else(|| {
    InferenceError::OutputShape(format!(
      "期望 [1, {c}, N] 或 [1, N, {c}], 实际 {:?}",
      shape,
      c = 4 + num_classes
    ))
  })?;

  let channels = 4 + num_classes;
  if data.len() != anchors * channels {
    return Err(InferenceError::OutputShape(format!(
      "输出长度 {} 与形状 {:?} 不一致",
      data.len(),
      shape
    )));
  }

  let value = |anchor: usize, channel: usize| match layout {
    Layout::ChannelFirst => data[channel * anchors + anchor],
    Layout::ChannelLast => data[anchor * channels + channel],
  };

  let mut items = Vec::new();
  for anchor in 0..anchors {
    let (score, class_id) = {
      let mut max_score = f32::MIN;
      let mut cls_idx = 0usize;
      for c in 0..num_classes {
        let score = value(anchor, 4 + c);
        if score > max_score {
          max_score = score;
          cls_idx = c;
        }
      }
      (max_score, cls_idx as u32)
    };

    // 与 Ultralytics 一致，分数须严格大于阈值；NaN 同样被丢弃
    if score.is_nan() || score <= threshold {
      continue;
    }

    let cx = value(anchor, 0);
    let cy = value(anchor, 1);
    let w = value(anchor, 2);
    let h = value(anchor, 3);

    let (x_min, y_min) = letterbox.to_normalized(cx - w / 2.0, cy - h / 2.0);
    let (x_max, y_max) = letterbox.to_normalized(cx + w / 2.0, cy + h / 2.0);

    items.push(DetectItem {
      class_id,
      score: score.clamp(0.0, 1.0),
      bbox: Some([x_min, y_min, x_max, y_max]),
    });
  }

  debug!("阈值 {:.2} 过滤后候选框: {}", threshold, items.len());
  let mut items = nms(items, NMS_IOU_THRESHOLD);
  items.truncate(MAX_DETECTIONS);
  debug!("检测到 {} 个物体", items.len());

  Ok(DetectResult::from(items))
}

/// 解码分类输出 `[1, nc]`
///
/// 导出的分类模型通常已包含 softmax，只有输出不是概率分布时才再做一次。
pub fn decode_probabilities(data: &[f32], shape: &[usize]) -> Result<Option<ClassifyResult>, InferenceError> {
  let num_classes = match *shape {
    [1, nc] | [nc] => nc,
    _ => {
      return Err(InferenceError::OutputShape(format!(
        "期望 [1, nc], 实际 {:?}",
        shape
      )));
    }
  };
  if data.len() != num_classes {
    return Err(InferenceError::OutputShape(format!(
      "输出长度 {} 与形状 {:?} 不一致",
      data.len(),
      shape
    )));
  }

  if let Some(idx) = data.iter().position(|p| !p.is_finite()) {
    return Err(InferenceError::OutputShape(format!(
      "分类输出第 {} 项不是有限值: {}",
      idx, data[idx]
    )));
  }

  let is_distribution = data.iter().all(|p| (0.0..=1.0).contains(p))
    && (data.iter().sum::<f32>() - 1.0).abs() < 1e-3;
  let probs = if is_distribution || data.is_empty() {
    data.to_vec()
  } else {
    debug!("分类输出不是概率分布，执行 softmax");
    softmax(data)
  };

  Ok(ClassifyResult::from_probs(probs))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::MIN, f32::max);
  let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

/// 非极大值抑制，只抑制同类别的框
fn nms(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  // 按置信度降序排序
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem> = Vec::new();
  for item in items {
    let suppressed = result.iter().any(|kept| {
      kept.class_id == item.class_id
        && match (&kept.bbox, &item.bbox) {
          (Some(a), Some(b)) => iou(a, b) >= iou_threshold,
          _ => false,
        }
    });
    if !suppressed {
      result.push(item);
    }
  }

  result
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
