// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::debug;

use crate::{
  model::{ClassNames, DetectItem, DetectResult},
  select::Condition,
};

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const GOOD_COLOR: [u8; 3] = [0, 200, 0]; // 绿色
const BAD_COLOR: [u8; 3] = [220, 0, 0]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

pub struct Draw {
  font_size: f32,
  label_text_vertical_padding: i32,
  font: FontRef<'static>,
}

impl Draw {
  pub fn new() -> Result<Self, InvalidFont> {
    let font = FontRef::try_from_slice(FONT_DATA)?;
    Ok(Self {
      font_size: LABEL_FONT_SIZE,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font,
    })
  }

  /// 按分数顺序绘制全部检测框，good 类为绿色，其余为红色
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult, class_names: &ClassNames) {
    for item in result.items.iter() {
      let label = class_names.get(item.class_id).unwrap_or("unknown");
      let color = match Condition::from_label(label) {
        Condition::Good => GOOD_COLOR,
        Condition::Bad => BAD_COLOR,
      };
      self.draw_bbox_with_label(image, item, label, color);
    }
    debug!("绘制 {} 个检测框", result.len());
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, label: &str, color: [u8; 3]) {
    let Some(bbox) = item.bbox else {
      return;
    };
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = ((bbox[0] * w as f32).floor() as i32).clamp(0, w - 1);
    let y_min = ((bbox[1] * h as f32).floor() as i32).clamp(0, h - 1);
    let x_max = ((bbox[2] * w as f32).ceil() as i32).clamp(0, w - 1);
    let y_max = ((bbox[3] * h as f32).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 向内加粗
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    let text = format!("{} {:.2}", label, item.score);
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, &self.font, &text);
    let label_height = text_height as i32 + 2 * self.label_text_vertical_padding;

    // 标签放在框上方，放不下时放在框内
    let label_x = x_min;
    let label_y = if y_min >= label_height {
      y_min - label_height
    } else {
      y_min
    };
    let label_width = (text_width as i32 + 4).min(w - label_x);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x + 2,
      label_y + self.label_text_vertical_padding,
      scale,
      &self.font,
      &text,
    );
  }
}
