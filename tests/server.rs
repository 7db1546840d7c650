// 该文件是 Pingjian （瓶检） 项目的一部分。
// tests/server.rs - 网页服务测试
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

use std::{io::Cursor, path::Path, sync::Arc};

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use image::{ImageFormat, RgbImage};
use tower::ServiceExt;

use pingjian::{
  model::{
    ClassNames, ClassifyResult, ConfidenceThreshold, DetectItem, DetectResult, InferenceError,
    InferenceOutput, InferenceParams, Model, ModelCache, ModelLoadError, ModelLoader,
    ModelRegistry, ModelVariant, Task,
  },
  server::{AppState, router},
  task::InspectTask,
};

const BOUNDARY: &str = "pingjian-test-boundary";

/// 按阈值过滤固定候选框的检测模型
struct FakeDetector {
  names: ClassNames,
  candidates: Vec<DetectItem>,
}

impl Model for FakeDetector {
  fn task(&self) -> Task {
    Task::Detect
  }

  fn class_names(&self) -> &ClassNames {
    &self.names
  }

  fn infer(&self, _: &RgbImage, params: &InferenceParams) -> Result<InferenceOutput, InferenceError> {
    let items: Vec<DetectItem> = self
      .candidates
      .iter()
      .filter(|item| item.score > params.threshold.value())
      .cloned()
      .collect();
    Ok(InferenceOutput::Detections(DetectResult::from(items)))
  }
}

struct FakeClassifier {
  names: ClassNames,
}

impl Model for FakeClassifier {
  fn task(&self) -> Task {
    Task::Classify
  }

  fn class_names(&self) -> &ClassNames {
    &self.names
  }

  fn infer(&self, _: &RgbImage, _: &InferenceParams) -> Result<InferenceOutput, InferenceError> {
    let result = ClassifyResult::from_probs(vec![0.10, 0.90]).ok_or_else(|| {
      InferenceError::OutputShape("empty".to_string())
    })?;
    Ok(InferenceOutput::Probabilities(result))
  }
}

struct FakeLoader;

impl ModelLoader for FakeLoader {
  fn load(&self, variant: ModelVariant, path: &Path) -> Result<Arc<dyn Model>, ModelLoadError> {
    let names = ClassNames::new(["bad", "good"]);
    match variant {
      ModelVariant::Classifier => Ok(Arc::new(FakeClassifier { names })),
      ModelVariant::NonAugmented => Ok(Arc::new(FakeDetector {
        names,
        candidates: vec![
          DetectItem {
            class_id: 1,
            score: 0.92,
            bbox: Some([0.2, 0.2, 0.8, 0.8]),
          },
          DetectItem {
            class_id: 0,
            score: 0.40,
            bbox: Some([0.1, 0.1, 0.3, 0.3]),
          },
        ],
      })),
      ModelVariant::Augmented => Err(ModelLoadError::NotFound(path.to_path_buf())),
    }
  }
}

fn app() -> axum::Router {
  let cache = ModelCache::new(ModelRegistry::with_root("/models"), FakeLoader);
  cache.preload(ModelVariant::NonAugmented).unwrap();
  let state = AppState::new(
    cache,
    InspectTask::new().unwrap(),
    ModelVariant::all().to_vec(),
    ModelVariant::NonAugmented,
    ConfidenceThreshold::default(),
  );
  router(state)
}

/// 只启用分类模型的部署
fn classifier_app() -> axum::Router {
  let cache = ModelCache::new(ModelRegistry::with_root("/models"), FakeLoader);
  cache.preload(ModelVariant::Classifier).unwrap();
  let state = AppState::new(
    cache,
    InspectTask::new().unwrap(),
    vec![ModelVariant::Classifier],
    ModelVariant::Classifier,
    ConfidenceThreshold::default(),
  );
  router(state)
}

fn png_bytes() -> Vec<u8> {
  let image = RgbImage::from_pixel(48, 48, image::Rgb([180, 180, 180]));
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Png).unwrap();
  bytes.into_inner()
}

fn multipart(image: Option<&[u8]>, fields: &[(&str, &str)]) -> Body {
  let mut body = Vec::new();
  if let Some(image) = image {
    body.extend_from_slice(
      format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"bottle.png\"\r\n\
         Content-Type: image/png\r\n\r\n"
      )
      .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(b"\r\n");
  }
  for (name, value) in fields {
    body.extend_from_slice(
      format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
        .as_bytes(),
    );
  }
  body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
  Body::from(body)
}

async fn post(uri: &str, body: Body) -> (StatusCode, String) {
  post_to(app(), uri, body).await
}

async fn post_to(app: axum::Router, uri: &str, body: Body) -> (StatusCode, String) {
  let request = Request::builder()
    .method("POST")
    .uri(uri)
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(body)
    .unwrap();
  let response = app.oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn index_and_health() {
  let response = app()
    .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  let html = String::from_utf8(bytes.to_vec()).unwrap();
  assert!(html.contains("<option value=\"non-augmented\" selected>"));
  assert!(html.contains("<td>good</td>"));
  assert!(html.contains("<div class=\"message success\">Model loaded successfully</div>"));

  let response = app()
    .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn detection_page_shows_first_detection() {
  let png = png_bytes();
  let (status, html) = post(
    "/inspect",
    multipart(Some(&png), &[("variant", "non-augmented"), ("threshold", "0.15")]),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert!(html.contains("<div class=\"message success\">Bottle Condition: GOOD</div>"));
  assert!(html.contains("Confidence Score: 92.00%"));
  assert!(html.contains("<img alt=\"Uploaded Image\""));
  assert!(html.contains("<img alt=\"Detection Result\""));
}

#[tokio::test]
async fn high_threshold_yields_no_detection() {
  let png = png_bytes();
  let (status, html) = post(
    "/inspect",
    multipart(Some(&png), &[("variant", "non-augmented"), ("threshold", "0.95")]),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert!(html.contains("<div class=\"message warning\">No bottle detected</div>"));
  assert!(!html.contains("Confidence Score"));
  assert!(html.contains("<img alt=\"Uploaded Image\""));
}

#[tokio::test]
async fn api_returns_json_report() {
  let png = png_bytes();
  let (status, body) = post(
    "/api/inspect",
    multipart(Some(&png), &[("variant", "classifier")]),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  let json: serde_json::Value = serde_json::from_str(&body).unwrap();
  assert_eq!(json["banner"]["message"], "Bottle Condition: GOOD");
  assert_eq!(json["confidence_text"], "Confidence Score: 90.00%");
  assert_eq!(json["probabilities"][1]["name"], "good");
}

#[tokio::test]
async fn request_errors_are_bad_requests() {
  let (status, html) = post("/inspect", multipart(Some(b"GIF89a\x01\x00"), &[])).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(html.contains("message error"));

  let (status, _) = post("/inspect", multipart(None, &[("variant", "classifier")])).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let png = png_bytes();
  let (status, body) = post("/api/inspect", multipart(Some(&png), &[("threshold", "1.5")])).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body.contains("error"));
}

#[tokio::test]
async fn missing_checkpoint_is_a_server_error() {
  let png = png_bytes();
  let (status, body) = post(
    "/api/inspect",
    multipart(Some(&png), &[("variant", "augmented")]),
  )
  .await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(body.contains("模型文件不存在"));
}

#[tokio::test]
async fn classifier_only_deployment_serves_classifier() {
  let response = classifier_app()
    .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
    .await
    .unwrap();
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  let html = String::from_utf8(bytes.to_vec()).unwrap();
  assert!(html.contains("<option value=\"classifier\" selected>"));
  assert!(!html.contains("value=\"augmented\""));

  let png = png_bytes();
  let (status, html) = post_to(classifier_app(), "/inspect", multipart(Some(&png), &[])).await;
  assert_eq!(status, StatusCode::OK);
  assert!(html.contains("Bottle Condition: GOOD"));
  assert!(html.contains("<img alt=\"Uploaded Image\""));

  let (status, body) = post_to(
    classifier_app(),
    "/api/inspect",
    multipart(Some(&png), &[("variant", "augmented")]),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body.contains("未启用"));
}
