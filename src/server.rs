// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/server.rs - 网页服务
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

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
  http::StatusCode,
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::{
  model::{ConfidenceThreshold, ModelCache, ModelVariant, ThresholdError, VariantParseError},
  output::{
    Report,
    html::{PageOptions, PageResult, render_page},
  },
  task::{InspectTask, TaskError},
};

/// 上传大小上限
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

struct AppInner {
  cache: ModelCache,
  task: InspectTask,
  variants: Vec<ModelVariant>,
  default_variant: ModelVariant,
  default_threshold: ConfidenceThreshold,
}

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppInner>,
}

impl AppState {
  /// `variants` 为页面可选且接受请求的模型
  pub fn new(
    cache: ModelCache,
    task: InspectTask,
    variants: Vec<ModelVariant>,
    default_variant: ModelVariant,
    default_threshold: ConfidenceThreshold,
  ) -> Self {
    Self {
      inner: Arc::new(AppInner {
        cache,
        task,
        variants,
        default_variant,
        default_threshold,
      }),
    }
  }

  fn page_options(&self, form: &InspectForm) -> (ModelVariant, ConfidenceThreshold) {
    (
      form.variant.unwrap_or(self.inner.default_variant),
      form.threshold.unwrap_or(self.inner.default_threshold),
    )
  }

  fn render(&self, variant: ModelVariant, threshold: ConfidenceThreshold, result: PageResult) -> String {
    let model = self.inner.cache.get(variant);
    let options = PageOptions {
      variants: &self.inner.variants,
      variant,
      threshold,
      class_names: model.as_deref().map(|model| model.class_names()),
    };
    render_page(&options, result)
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(index))
    .route("/inspect", post(inspect_page))
    .route("/api/inspect", post(inspect_api))
    .route("/health", get(health))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[derive(Error, Debug)]
enum FormError {
  #[error("表单读取失败: {0}")]
  Multipart(#[from] MultipartError),
  #[error("请上传一张图像")]
  MissingImage,
  #[error("{0}")]
  Variant(#[from] VariantParseError),
  #[error("模型 {0} 未启用")]
  VariantUnavailable(ModelVariant),
  #[error("{0}")]
  Threshold(#[from] ThresholdError),
}

#[derive(Error, Debug)]
enum InspectError {
  #[error("{0}")]
  Form(#[from] FormError),
  #[error("{0}")]
  Task(#[from] TaskError),
  #[error("任务执行失败: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl InspectError {
  fn status(&self) -> StatusCode {
    match self {
      InspectError::Form(_) => StatusCode::BAD_REQUEST,
      InspectError::Task(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
      InspectError::Task(_) | InspectError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

#[derive(Default)]
struct InspectForm {
  image: Option<Vec<u8>>,
  variant: Option<ModelVariant>,
  threshold: Option<ConfidenceThreshold>,
}

async fn read_form(
  mut multipart: Multipart,
  variants: &[ModelVariant],
) -> Result<InspectForm, FormError> {
  let mut form = InspectForm::default();
  while let Some(field) = multipart.next_field().await? {
    let name = field.name().map(str::to_string);
    match name.as_deref() {
      Some("image") => {
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        debug!("收到上传文件 {:?}, {} 字节", file_name, bytes.len());
        if !bytes.is_empty() {
          form.image = Some(bytes.to_vec());
        }
      }
      Some("variant") => {
        let variant: ModelVariant = field.text().await?.parse()?;
        if !variants.contains(&variant) {
          return Err(FormError::VariantUnavailable(variant));
        }
        form.variant = Some(variant);
      }
      Some("threshold") => form.threshold = Some(field.text().await?.parse()?),
      other => warn!("忽略未知表单字段: {:?}", other),
    }
  }
  Ok(form)
}

async fn run_inspection(state: &AppState, form: &mut InspectForm) -> Result<Report, InspectError> {
  let image = form.image.take().ok_or(FormError::MissingImage)?;
  let (variant, threshold) = state.page_options(form);

  let state = state.clone();
  let (_, report) = tokio::task::spawn_blocking(move || {
    state
      .inner
      .task
      .inspect_upload(&state.inner.cache, variant, &image, threshold)
  })
  .await??;
  Ok(report)
}

async fn index(State(state): State<AppState>) -> Html<String> {
  let inner = &state.inner;
  Html(state.render(inner.default_variant, inner.default_threshold, PageResult::Empty))
}

async fn inspect_page(State(state): State<AppState>, multipart: Multipart) -> Response {
  let mut form = match read_form(multipart, &state.inner.variants).await {
    Ok(form) => form,
    Err(e) => {
      warn!("表单错误: {}", e);
      let message = e.to_string();
      let inner = &state.inner;
      let page = state.render(
        inner.default_variant,
        inner.default_threshold,
        PageResult::Error(&message),
      );
      return (StatusCode::BAD_REQUEST, Html(page)).into_response();
    }
  };

  let (variant, threshold) = state.page_options(&form);
  match run_inspection(&state, &mut form).await {
    Ok(report) => Html(state.render(variant, threshold, PageResult::Report(&report))).into_response(),
    Err(e) => {
      let status = e.status();
      if status.is_server_error() {
        error!("检测失败: {}", e);
      } else {
        warn!("检测请求无效: {}", e);
      }
      let message = e.to_string();
      let page = state.render(variant, threshold, PageResult::Error(&message));
      (status, Html(page)).into_response()
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

async fn inspect_api(State(state): State<AppState>, multipart: Multipart) -> Response {
  let result = match read_form(multipart, &state.inner.variants).await {
    Ok(mut form) => run_inspection(&state, &mut form).await,
    Err(e) => Err(InspectError::from(e)),
  };

  match result {
    Ok(report) => Json(report).into_response(),
    Err(e) => {
      let status = e.status();
      if status.is_server_error() {
        error!("检测失败: {}", e);
      }
      (status, Json(ErrorBody { error: e.to_string() })).into_response()
    }
  }
}

async fn health() -> &'static str {
  "ok"
}
