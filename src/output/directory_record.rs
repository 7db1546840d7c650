// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, Report},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期归档每次检测：`YYYY/MM/DD/HH-MM-SS-XXXX.png` 与同名 `.json`
///
/// 默认只记录检测到瓶子的结果，URL 带 `?always` 时全部记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn record_id(&self) -> u16 {
    let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn record_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, image: &RgbImage, report: &Report) -> Result<(), Self::Error> {
    if !self.always && !report.is_found() {
      debug!("未检测到瓶子，跳过记录");
      return Ok(());
    }

    let path = self.record_path()?;
    report.annotated.as_ref().unwrap_or(image).save(&path)?;
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path.with_extension("json"), json)?;
    info!("记录检测结果: {}", path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::tests::detection_report;

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = url::Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  #[test]
  fn records_image_and_json_by_date() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "");
    let (image, report) = detection_report(&[(0, 0.61)]);
    output.render_result(&image, &report).unwrap();

    let files = files(dir.path());
    assert_eq!(files.len(), 2);
    let relative = files[0].strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 4);
    assert!(files[0].to_string_lossy().ends_with("-0001.json"));
    assert!(files[1].to_string_lossy().ends_with("-0001.png"));

    let json: serde_json::Value =
      serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
    assert_eq!(json["banner"]["message"], "Bottle Condition: BAD");
  }

  #[test]
  fn skips_empty_results_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let (image, report) = detection_report(&[]);

    output(dir.path(), "").render_result(&image, &report).unwrap();
    assert!(files(dir.path()).is_empty());

    output(dir.path(), "?always").render_result(&image, &report).unwrap();
    assert_eq!(files(dir.path()).len(), 2);
  }
}
