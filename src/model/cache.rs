// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/model/cache.rs - 模型变体与模型缓存
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
  collections::HashMap,
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
  sync::{Arc, Mutex},
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Model, ModelLoadError, OnnxModelBuilder, Task};

const CHECKPOINT_FILE: &str = "best.onnx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
  /// 分类模型
  Classifier,
  /// 未做数据增强训练的检测模型
  NonAugmented,
  /// 数据增强训练的检测模型
  Augmented,
}

#[derive(Error, Debug, PartialEq)]
#[error("未知模型变体: {0}，可选 classifier / non-augmented / augmented")]
pub struct VariantParseError(String);

impl ModelVariant {
  pub const fn all() -> [ModelVariant; 3] {
    [
      ModelVariant::Classifier,
      ModelVariant::NonAugmented,
      ModelVariant::Augmented,
    ]
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ModelVariant::Classifier => "classifier",
      ModelVariant::NonAugmented => "non-augmented",
      ModelVariant::Augmented => "augmented",
    }
  }

  /// 页面上展示的名称
  pub fn title(self) -> &'static str {
    match self {
      ModelVariant::Classifier => "Classification Model",
      ModelVariant::NonAugmented => "Detection Model (Non-augmented)",
      ModelVariant::Augmented => "Detection Model (Augmented)",
    }
  }

  pub fn task(self) -> Task {
    match self {
      ModelVariant::Classifier => Task::Classify,
      ModelVariant::NonAugmented | ModelVariant::Augmented => Task::Detect,
    }
  }

  fn directory(self) -> &'static str {
    match self {
      ModelVariant::Classifier => "classifier",
      ModelVariant::NonAugmented => "non_augmented",
      ModelVariant::Augmented => "augmented",
    }
  }
}

impl fmt::Display for ModelVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModelVariant {
  type Err = VariantParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
      "classifier" | "classification" => Ok(ModelVariant::Classifier),
      "non-augmented" => Ok(ModelVariant::NonAugmented),
      "augmented" => Ok(ModelVariant::Augmented),
      _ => Err(VariantParseError(s.to_string())),
    }
  }
}

/// 模型变体到检查点路径的映射
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
  paths: HashMap<ModelVariant, PathBuf>,
}

impl ModelRegistry {
  /// `<root>/<variant>/best.onnx`
  pub fn with_root(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    let paths = ModelVariant::all()
      .into_iter()
      .map(|variant| (variant, root.join(variant.directory()).join(CHECKPOINT_FILE)))
      .collect();
    Self { paths }
  }

  pub fn set_path(&mut self, variant: ModelVariant, path: impl Into<PathBuf>) {
    self.paths.insert(variant, path.into());
  }

  pub fn path(&self, variant: ModelVariant) -> Option<&Path> {
    self.paths.get(&variant).map(PathBuf::as_path)
  }
}

/// 把检查点加载为模型句柄，测试中可替换
pub trait ModelLoader: Send + Sync {
  fn load(&self, variant: ModelVariant, path: &Path) -> Result<Arc<dyn Model>, ModelLoadError>;
}

/// 基于 ONNX Runtime 的加载器
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
  fn load(&self, variant: ModelVariant, path: &Path) -> Result<Arc<dyn Model>, ModelLoadError> {
    let model = OnnxModelBuilder::new(path).task(variant.task()).build()?;
    Ok(Arc::new(model))
  }
}

/// 每个变体只加载一次，进程内复用
pub struct ModelCache {
  registry: ModelRegistry,
  loader: Box<dyn ModelLoader>,
  models: Mutex<HashMap<ModelVariant, Arc<dyn Model>>>,
}

impl ModelCache {
  pub fn new(registry: ModelRegistry, loader: impl ModelLoader + 'static) -> Self {
    Self {
      registry,
      loader: Box::new(loader),
      models: Mutex::new(HashMap::new()),
    }
  }

  pub fn registry(&self) -> &ModelRegistry {
    &self.registry
  }

  /// 只读取已缓存的句柄，不触发加载
  pub fn get(&self, variant: ModelVariant) -> Option<Arc<dyn Model>> {
    // 锁中毒时仍可读取缓存内容
    let models = self.models.lock().unwrap_or_else(|e| e.into_inner());
    models.get(&variant).cloned()
  }

  pub fn is_loaded(&self, variant: ModelVariant) -> bool {
    self.get(variant).is_some()
  }

  /// 获取模型句柄，首次访问时从存储加载
  ///
  /// 加载在锁外进行；并发加载同一变体时以先写入的句柄为准。
  pub fn get_or_load(&self, variant: ModelVariant) -> Result<Arc<dyn Model>, ModelLoadError> {
    if let Some(model) = self.get(variant) {
      debug!("使用已缓存模型: {}", variant);
      return Ok(model);
    }

    let path = self
      .registry
      .path(variant)
      .ok_or_else(|| ModelLoadError::ModelPathError(format!("未配置模型变体 {} 的路径", variant)))?;
    info!("加载模型变体 {}: {}", variant, path.display());
    let loaded = self.loader.load(variant, path)?;

    let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
    Ok(models.entry(variant).or_insert(loaded).clone())
  }

  /// 启动时预加载，检查点缺失会直接返回错误
  pub fn preload(&self, variant: ModelVariant) -> Result<(), ModelLoadError> {
    self.get_or_load(variant).map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use image::RgbImage;

  use super::*;
  use crate::model::{ClassNames, InferenceError, InferenceOutput, InferenceParams};

  struct StubModel(ClassNames);

  impl Model for StubModel {
    fn task(&self) -> Task {
      Task::Detect
    }

    fn class_names(&self) -> &ClassNames {
      &self.0
    }

    fn infer(&self, _: &RgbImage, _: &InferenceParams) -> Result<InferenceOutput, InferenceError> {
      Ok(InferenceOutput::Detections(Default::default()))
    }
  }

  #[derive(Clone, Default)]
  struct CountingLoader(Arc<AtomicUsize>);

  impl ModelLoader for CountingLoader {
    fn load(&self, _: ModelVariant, path: &Path) -> Result<Arc<dyn Model>, ModelLoadError> {
      if !path.starts_with("/models") {
        return Err(ModelLoadError::NotFound(path.to_path_buf()));
      }
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(Arc::new(StubModel(ClassNames::new(["bad", "good"]))))
    }
  }

  #[test]
  fn variant_names_round_trip() {
    for variant in ModelVariant::all() {
      assert_eq!(variant.as_str().parse::<ModelVariant>(), Ok(variant));
    }
    assert_eq!("Non_Augmented".parse::<ModelVariant>(), Ok(ModelVariant::NonAugmented));
    assert!("yolo".parse::<ModelVariant>().is_err());
    assert_eq!(ModelVariant::Classifier.task(), Task::Classify);
  }

  #[test]
  fn registry_lays_out_checkpoints() {
    let mut registry = ModelRegistry::with_root("/models");
    assert_eq!(
      registry.path(ModelVariant::NonAugmented),
      Some(Path::new("/models/non_augmented/best.onnx"))
    );
    registry.set_path(ModelVariant::Augmented, "/tmp/aug.onnx");
    assert_eq!(
      registry.path(ModelVariant::Augmented),
      Some(Path::new("/tmp/aug.onnx"))
    );
  }

  #[test]
  fn loads_each_variant_once() {
    let loader = CountingLoader::default();
    let count = loader.0.clone();
    let cache = ModelCache::new(ModelRegistry::with_root("/models"), loader);

    assert!(!cache.is_loaded(ModelVariant::Augmented));
    let first = cache.get_or_load(ModelVariant::Augmented).unwrap();
    let second = cache.get_or_load(ModelVariant::Augmented).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    cache.preload(ModelVariant::Classifier).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(cache.is_loaded(ModelVariant::Classifier));
  }

  #[test]
  fn load_failure_is_not_cached() {
    let cache = ModelCache::new(ModelRegistry::with_root("/missing"), CountingLoader::default());
    assert!(matches!(
      cache.preload(ModelVariant::NonAugmented),
      Err(ModelLoadError::NotFound(_))
    ));
    assert!(!cache.is_loaded(ModelVariant::NonAugmented));
  }

  #[test]
  fn unregistered_variant_is_a_path_error() {
    let cache = ModelCache::new(ModelRegistry::default(), CountingLoader::default());
    assert!(matches!(
      cache.get_or_load(ModelVariant::Classifier),
      Err(ModelLoadError::ModelPathError(_))
    ));
  }
}
