// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/model/onnx.rs - ONNX 模型定义
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

use image::RgbImage;
use ndarray::Array4;
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{
    ClassNames, InferenceError, InferenceOutput, InferenceParams, Model, ModelLoadError, Task,
    yolo::{decode_detections, decode_probabilities},
  },
};

const ONNX_SCHEME: &str = "onnx";
const DEFAULT_INTRA_THREADS: usize = 4;

pub struct OnnxModel {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  class_names: ClassNames,
  task: Task,
  /// 模型声明的固定输入尺寸 (宽, 高)
  input_size: Option<(u32, u32)>,
}

pub struct OnnxModelBuilder {
  model_path: PathBuf,
  labels: Option<ClassNames>,
  task: Option<Task>,
  intra_threads: usize,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = ONNX_SCHEME;
}

impl FromUrl for OnnxModelBuilder {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxModelBuilder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => {
          let labels = ClassNames::from_list(&value)
            .ok_or_else(|| ModelLoadError::ModelPathError(format!("类别列表无效: {}", value)))?;
          builder = builder.labels(labels);
        }
        "task" => {
          let task = value.parse().map_err(ModelLoadError::ModelPathError)?;
          builder = builder.task(task);
        }
        "threads" => {
          let threads = value
            .parse()
            .map_err(|_| ModelLoadError::ModelPathError(format!("线程数无效: {}", value)))?;
          builder = builder.intra_threads(threads);
        }
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl OnnxModelBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels: None,
      task: None,
      intra_threads: DEFAULT_INTRA_THREADS,
    }
  }

  pub fn labels(mut self, labels: ClassNames) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn task(mut self, task: Task) -> Self {
    self.task = Some(task);
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn build(self) -> Result<OnnxModel, ModelLoadError> {
    let path = self.model_path;
    info!("加载模型文件: {}", path.display());
    if !path.is_file() {
      return Err(ModelLoadError::NotFound(path));
    }

    let model_data = std::fs::read(&path).map_err(|source| ModelLoadError::Io {
      path: path.clone(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    #[allow(unused_mut)]
    let mut builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?;

    #[cfg(feature = "rknpu")]
    {
      use ort::execution_providers::RKNPUExecutionProvider;
      info!("启用 RKNPU 执行后端");
      builder = builder.with_execution_providers([RKNPUExecutionProvider::default().build()])?;
    }

    let session = builder
      .commit_from_memory(&model_data)
      .map_err(|e| ModelLoadError::invalid(&path, e))?;

    if session.inputs.len() != 1 {
      return Err(ModelLoadError::invalid(
        &path,
        format!("预期模型输入数量为 1, 实际为 {}", session.inputs.len()),
      ));
    }
    let Some(output) = session.outputs.first() else {
      return Err(ModelLoadError::invalid(&path, "模型没有输出"));
    };

    let input_name = session.inputs[0].name.clone();
    let output_name = output.name.clone();
    let output_rank = output.output_type.tensor_shape().map(|shape| shape.len());
    let input_size = session.inputs[0]
      .input_type
      .tensor_shape()
      .and_then(|shape| match **shape {
        [_, _, h, w] if h > 0 && w > 0 => Some((w as u32, h as u32)),
        _ => None,
      });
    debug!("模型输入: {} {:?}", input_name, input_size);
    debug!("模型输出: {} (维度 {:?})", output_name, output_rank);

    let metadata = read_metadata(&session);

    let class_names = match (self.labels, metadata.names.as_deref()) {
      (Some(labels), _) => labels,
      (None, Some(raw)) => ClassNames::parse_metadata(raw)
        .ok_or_else(|| ModelLoadError::invalid(&path, format!("无法解析类别表: {}", raw)))?,
      (None, None) => {
        return Err(ModelLoadError::invalid(
          &path,
          "模型元数据中没有类别表，请通过 labels 参数指定",
        ));
      }
    };

    let task = match (self.task, metadata.task.as_deref()) {
      (Some(task), _) => task,
      (None, Some(raw)) => raw.parse().map_err(|e| ModelLoadError::invalid(&path, e))?,
      (None, None) => match output_rank {
        Some(2) => Task::Classify,
        Some(3) => Task::Detect,
        other => {
          return Err(ModelLoadError::invalid(
            &path,
            format!("无法根据输出维度 {:?} 判断任务类型", other),
          ));
        }
      },
    };

    let input_size = input_size.or(metadata.imgsz);
    info!(
      "模型加载完成: 任务 {:?}, 类别 {}",
      task, class_names
    );

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_name,
      output_name,
      class_names,
      task,
      input_size,
    })
  }
}

#[derive(Debug, Default)]
struct Metadata {
  names: Option<String>,
  task: Option<String>,
  imgsz: Option<(u32, u32)>,
}

/// 读取 Ultralytics 导出时写入的自定义元数据
fn read_metadata(session: &Session) -> Metadata {
  let metadata = match session.metadata() {
    Ok(metadata) => metadata,
    Err(e) => {
      warn!("读取模型元数据失败: {}", e);
      return Metadata::default();
    }
  };
  let custom = |key: &str| metadata.custom(key).ok().flatten();

  Metadata {
    names: custom("names"),
    task: custom("task"),
    imgsz: custom("imgsz").and_then(|raw| parse_imgsz(&raw)),
  }
}

/// `imgsz` 写作 `[640, 640]` (高, 宽) 或单个整数
fn parse_imgsz(raw: &str) -> Option<(u32, u32)> {
  let values: Vec<u32> = raw
    .trim_matches(|c| c == '[' || c == ']' || c == '(' || c == ')')
    .split(',')
    .map(|v| v.trim().parse().ok())
    .collect::<Option<_>>()?;
  match values.as_slice() {
    [size] => Some((*size, *size)),
    [h, w] => Some((*w, *h)),
    _ => None,
  }
}

impl OnnxModel {
  fn run(&self, tensor: &Array4<f32>) -> Result<(Vec<usize>, Vec<f32>), InferenceError> {
    let input = TensorRef::from_array_view(tensor.view())?;
    let mut session = self
      .session
      .lock()
      .map_err(|_| InferenceError::SessionPoisoned)?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| InferenceError::OutputShape(format!("缺少输出 {}", self.output_name)))?;
    let (shape, data) = output.try_extract_tensor::<f32>()?;

    let shape = shape
      .iter()
      .map(|&d| usize::try_from(d))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| InferenceError::OutputShape(format!("非法输出形状 {:?}", &shape[..])))?;
    Ok((shape, data.to_vec()))
  }

  fn target_size(&self, params: &InferenceParams) -> (u32, u32) {
    match self.input_size {
      Some(size) => {
        if size != (params.image_size, params.image_size) {
          debug!(
            "模型输入尺寸固定为 {}x{}, 忽略请求尺寸 {}",
            size.0, size.1, params.image_size
          );
        }
        size
      }
      None => (params.image_size, params.image_size),
    }
  }
}

impl Model for OnnxModel {
  fn task(&self) -> Task {
    self.task
  }

  fn class_names(&self) -> &ClassNames {
    &self.class_names
  }

  fn infer(
    &self,
    image: &RgbImage,
    params: &InferenceParams,
  ) -> Result<InferenceOutput, InferenceError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(InferenceError::InputShape(format!(
        "图像尺寸为 {}x{}",
        image.width(),
        image.height()
      )));
    }
    let (width, height) = self.target_size(params);

    match self.task {
      Task::Detect => {
        let (frame, letterbox) = RgbNhwcFrame::letterbox(image, width, height);
        let (shape, data) = self.run(&frame.to_nchw_tensor())?;
        let result = decode_detections(
          &data,
          &shape,
          self.class_names.len(),
          &letterbox,
          params.threshold.value(),
        )?;
        Ok(InferenceOutput::Detections(result))
      }
      Task::Classify => {
        let frame = RgbNhwcFrame::center_crop(image, width, height);
        let (shape, data) = self.run(&frame.to_nchw_tensor())?;
        match decode_probabilities(&data, &shape)? {
          Some(result) => Ok(InferenceOutput::Probabilities(result)),
          None => Err(InferenceError::OutputShape("分类输出为空".to_string())),
        }
      }
    }
  }
}

impl std::fmt::Debug for OnnxModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OnnxModel")
      .field("task", &self.task)
      .field("class_names", &self.class_names)
      .field("input_size", &self.input_size)
      .finish()
  }
}
