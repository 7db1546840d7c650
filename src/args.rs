// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use pingjian::model::{ConfidenceThreshold, ModelVariant};

/// Pingjian 瓶子状态检测网页
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录，包含 classifier/、non_augmented/、augmented/ 下的 best.onnx
  #[arg(long, value_name = "DIR", default_value = "models")]
  pub models: PathBuf,

  /// 监听地址
  #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
  pub listen: SocketAddr,

  /// 启用的模型，逗号分隔；启动时全部预加载
  #[arg(
    long,
    value_name = "VARIANTS",
    value_delimiter = ',',
    num_args = 1..,
    default_values_t = ModelVariant::all()
  )]
  pub variants: Vec<ModelVariant>,

  /// 页面默认选中的模型，不在启用列表中时使用列表第一项
  #[arg(long, value_name = "VARIANT", default_value_t = ModelVariant::Augmented)]
  pub variant: ModelVariant,

  /// 默认置信度阈值 [0.01, 1.0]
  #[arg(long, value_name = "THRESHOLD", default_value_t = ConfidenceThreshold::default())]
  pub threshold: ConfidenceThreshold,
}

impl Args {
  /// 去重后的启用模型与页面默认模型
  pub fn enabled_variants(&self) -> Option<(Vec<ModelVariant>, ModelVariant)> {
    let mut variants: Vec<ModelVariant> = Vec::with_capacity(self.variants.len());
    for &variant in &self.variants {
      if !variants.contains(&variant) {
        variants.push(variant);
      }
    }
    let default = if variants.contains(&self.variant) {
      self.variant
    } else {
      *variants.first()?
    };
    Some((variants, default))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn all_variants_are_enabled_by_default() {
    let args = Args::parse_from(["pingjian"]);
    let (variants, default) = args.enabled_variants().unwrap();
    assert_eq!(variants, ModelVariant::all().to_vec());
    assert_eq!(default, ModelVariant::Augmented);
  }

  #[test]
  fn classifier_only_deployment() {
    let args = Args::parse_from(["pingjian", "--variants", "classifier"]);
    let (variants, default) = args.enabled_variants().unwrap();
    assert_eq!(variants, vec![ModelVariant::Classifier]);
    assert_eq!(default, ModelVariant::Classifier);

    let args = Args::parse_from([
      "pingjian",
      "--variants",
      "augmented,non-augmented,augmented",
      "--variant",
      "non-augmented",
    ]);
    let (variants, default) = args.enabled_variants().unwrap();
    assert_eq!(variants, vec![ModelVariant::Augmented, ModelVariant::NonAugmented]);
    assert_eq!(default, ModelVariant::NonAugmented);
  }
}
