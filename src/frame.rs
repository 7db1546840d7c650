// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/frame.rs - NHWC 帧与预处理
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use ndarray::Array4;

const RGB_CHANNELS: usize = 3;
/// letterbox 填充灰度
const LETTERBOX_FILL: u8 = 114;

/// 记录 letterbox 缩放与填充，用于把模型坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub source_width: u32,
  pub source_height: u32,
}

impl Letterbox {
  pub fn fit(source_width: u32, source_height: u32, width: u32, height: u32) -> Self {
    let scale = (width as f32 / source_width as f32).min(height as f32 / source_height as f32);
    let resized_w = ((source_width as f32 * scale).round() as u32).clamp(1, width);
    let resized_h = ((source_height as f32 * scale).round() as u32).clamp(1, height);
    Self {
      scale,
      pad_x: ((width - resized_w) / 2) as f32,
      pad_y: ((height - resized_h) / 2) as f32,
      source_width,
      source_height,
    }
  }

  fn resized_dimensions(&self) -> (u32, u32) {
    (
      ((self.source_width as f32 * self.scale).round() as u32).max(1),
      ((self.source_height as f32 * self.scale).round() as u32).max(1),
    )
  }

  /// 模型输入坐标 -> 原图归一化坐标，结果截断到 [0, 1]
  pub fn to_normalized(&self, x: f32, y: f32) -> (f32, f32) {
    let src_x = (x - self.pad_x) / self.scale;
    let src_y = (y - self.pad_y) / self.scale;
    (
      (src_x / self.source_width as f32).clamp(0.0, 1.0),
      (src_y / self.source_height as f32).clamp(0.0, 1.0),
    )
  }
}

#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl RgbNhwcFrame {
  /// 等比缩放后居中填充到 `width x height`
  pub fn letterbox(image: &RgbImage, width: u32, height: u32) -> (Self, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), width, height);
    let (resized_w, resized_h) = letterbox.resized_dimensions();
    let resized = imageops::resize(image, resized_w, resized_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    (Self::from(canvas), letterbox)
  }

  /// 短边缩放到目标尺寸后居中裁剪，分类模型使用
  pub fn center_crop(image: &RgbImage, width: u32, height: u32) -> Self {
    let scale = (width as f32 / image.width() as f32).max(height as f32 / image.height() as f32);
    let resized_w = ((image.width() as f32 * scale).round() as u32).max(width);
    let resized_h = ((image.height() as f32 * scale).round() as u32).max(height);
    let resized = imageops::resize(image, resized_w, resized_h, FilterType::Triangle);

    let x = (resized_w - width) / 2;
    let y = (resized_h - height) / 2;
    let cropped = imageops::crop_imm(&resized, x, y, width, height).to_image();
    Self::from(cropped)
  }

  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 转为 `[1, 3, H, W]` 的 f32 张量，数值归一化到 [0, 1]
  pub fn to_nchw_tensor(&self) -> Array4<f32> {
    let (height, width) = (self.height(), self.width());
    Array4::from_shape_fn((1, RGB_CHANNELS, height, width), |(_, c, y, x)| {
      self.data[(y * width + x) * RGB_CHANNELS + c] as f32 / 255.0
    })
  }
}
