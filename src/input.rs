// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/input.rs - 图像输入
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

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

mod read_image_file;

pub use self::read_image_file::ImageFileInput;

/// 允许上传的图像格式
pub const ALLOWED_FORMATS: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("不支持的图像格式: {0}，仅支持 jpg / jpeg / png")]
  UnsupportedFormat(String),
  #[error("图像数据损坏: {0}")]
  Corrupt(#[from] image::ImageError),
  #[error("图像读取失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI scheme 不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
}

/// 根据内容识别格式并解码为 RGB 图像，不做缩放
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
  let format = match image::guess_format(bytes) {
    Ok(format) => format,
    Err(e) => {
      warn!("无法识别图像格式: {}", e);
      return Err(DecodeError::UnsupportedFormat("unknown".to_string()));
    }
  };

  if !ALLOWED_FORMATS.contains(&format) {
    warn!("拒绝图像格式: {:?}", format);
    let name = format
      .extensions_str()
      .first()
      .copied()
      .unwrap_or("unknown");
    return Err(DecodeError::UnsupportedFormat(name.to_string()));
  }

  let image = image::load_from_memory_with_format(bytes, format)?.to_rgb8();
  debug!(
    "解码 {:?} 图像: {}x{}",
    format,
    image.width(),
    image.height()
  );
  Ok(image)
}

#[cfg(test)]
pub(crate) fn encode_test_image(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
  use std::io::Cursor;

  let image = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 128]));
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, format).unwrap();
  bytes.into_inner()
}
