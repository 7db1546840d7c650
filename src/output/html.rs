// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/output/html.rs - 网页渲染
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

use std::{fmt::Write as _, io::Cursor};

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{ImageFormat, RgbImage};
use tracing::warn;

use crate::{
  model::{ClassNames, ConfidenceThreshold, MAX_CONFIDENCE, MIN_CONFIDENCE, ModelVariant},
  output::{BannerLevel, Report, format_percent},
};

const STYLE: &str = r#"
body { font-family: sans-serif; max-width: 56rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
form { display: grid; gap: 0.75rem; margin-bottom: 1.5rem; }
.message { padding: 0.75rem 1rem; border-radius: 0.375rem; font-weight: bold; }
.success { background: #e6f4ea; color: #137333; }
.error { background: #fce8e6; color: #c5221f; }
.warning { background: #fef7e0; color: #b06000; }
progress { width: 100%; height: 1.25rem; }
img { max-width: 100%; border: 1px solid #ddd; }
table { border-collapse: collapse; }
td, th { padding: 0.25rem 0.75rem; border-bottom: 1px solid #eee; text-align: left; }
"#;

/// 页面表单当前的取值
pub struct PageOptions<'a> {
  /// 表单中可选的模型，即启动时加载的模型
  pub variants: &'a [ModelVariant],
  pub variant: ModelVariant,
  pub threshold: ConfidenceThreshold,
  pub class_names: Option<&'a ClassNames>,
}

pub enum PageResult<'a> {
  Empty,
  Report(&'a Report),
  Error(&'a str),
}

fn escape(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      c => escaped.push(c),
    }
  }
  escaped
}

/// PNG 编码后的 data URL，编码失败时返回 `None`
pub fn inline_png(image: &RgbImage) -> Option<String> {
  let mut bytes = Cursor::new(Vec::new());
  if let Err(e) = image.write_to(&mut bytes, ImageFormat::Png) {
    warn!("标注图像编码失败: {}", e);
    return None;
  }
  Some(format!(
    "data:image/png;base64,{}",
    STANDARD.encode(bytes.into_inner())
  ))
}

fn message_block(level: BannerLevel, message: &str) -> String {
  format!(
    "<div class=\"message {}\">{}</div>\n",
    level.css_class(),
    escape(message)
  )
}

/// 结果区块：横幅、置信度、进度条、标注图像与各类别概率
pub fn render_report(report: &Report) -> String {
  let mut html = String::from("<section id=\"result\">\n");
  html.push_str(&message_block(report.banner.level, &report.banner.message));

  if let Some(confidence_text) = &report.confidence_text {
    let _ = writeln!(html, "<p>{}</p>", escape(confidence_text));
  }
  if let Some(progress) = report.progress {
    let _ = writeln!(
      html,
      "<progress max=\"1\" value=\"{:.4}\">{}</progress>",
      progress,
      format_percent(progress)
    );
  }
  if let Some(src) = inline_png(&report.uploaded) {
    let _ = writeln!(html, "<img alt=\"Uploaded Image\" src=\"{}\">", src);
  }
  if let Some(src) = report.annotated.as_ref().and_then(inline_png) {
    let _ = writeln!(html, "<img alt=\"Detection Result\" src=\"{}\">", src);
  }
  if !report.probabilities.is_empty() {
    html.push_str("<h3>Class Probabilities</h3>\n<ul>\n");
    for score in &report.probabilities {
      let _ = writeln!(
        html,
        "<li>{}: {}</li>",
        escape(&score.name),
        format_percent(score.probability)
      );
    }
    html.push_str("</ul>\n");
  }

  html.push_str("</section>\n");
  html
}

fn render_form(options: &PageOptions) -> String {
  let mut html = String::from(
    "<form method=\"post\" action=\"/inspect\" enctype=\"multipart/form-data\">\n\
     <label>Upload an image <input type=\"file\" name=\"image\" accept=\".jpg,.jpeg,.png\" required></label>\n\
     <label>Select Model Type <select name=\"variant\">\n",
  );
  for &variant in options.variants {
    let selected = if variant == options.variant {
      " selected"
    } else {
      ""
    };
    let _ = writeln!(
      html,
      "<option value=\"{}\"{}>{}</option>",
      variant,
      selected,
      variant.title()
    );
  }
  html.push_str("</select></label>\n");
  let _ = writeln!(
    html,
    "<label>Detection Confidence Threshold <input type=\"range\" name=\"threshold\" \
     min=\"{}\" max=\"{}\" step=\"0.01\" value=\"{}\" \
     oninput=\"this.nextElementSibling.value = this.value\"><output>{}</output></label>",
    MIN_CONFIDENCE, MAX_CONFIDENCE, options.threshold, options.threshold
  );
  html.push_str("<button type=\"submit\">Inspect</button>\n</form>\n");

  if let Some(class_names) = options.class_names {
    html.push_str(&message_block(BannerLevel::Success, "Model loaded successfully"));
    html.push_str("<h3>Model Classes</h3>\n<table>\n<tr><th>Class</th><th>Name</th></tr>\n");
    for (class_id, name) in class_names.iter() {
      let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", class_id, escape(name));
    }
    html.push_str("</table>\n");
  }

  html
}

/// 完整页面
pub fn render_page(options: &PageOptions, result: PageResult) -> String {
  let body = match result {
    PageResult::Empty => String::new(),
    PageResult::Report(report) => render_report(report),
    PageResult::Error(message) => message_block(BannerLevel::Error, message),
  };

  format!(
    "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
     <title>Bottle Condition Inspection</title>\n<style>{}</style>\n</head>\n<body>\n\
     <h1>Bottle Condition Inspection</h1>\n{}{}</body>\n</html>\n",
    STYLE,
    render_form(options),
    body
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{ClassifyResult, InferenceOutput},
    output::{draw::Draw, tests::detection_report},
    select::select,
  };

  const VARIANTS: [ModelVariant; 3] = ModelVariant::all();

  fn options() -> PageOptions<'static> {
    PageOptions {
      variants: &VARIANTS,
      variant: ModelVariant::Augmented,
      threshold: ConfidenceThreshold::default(),
      class_names: None,
    }
  }

  #[test]
  fn empty_page_has_form_controls() {
    let html = render_page(&options(), PageResult::Empty);
    assert!(html.contains("accept=\".jpg,.jpeg,.png\""));
    assert!(html.contains("<option value=\"augmented\" selected>"));
    assert!(html.contains("min=\"0.01\" max=\"1\" step=\"0.01\" value=\"0.15\""));
    assert!(!html.contains("id=\"result\""));
    assert!(!html.contains("Model loaded successfully"));
  }

  #[test]
  fn form_offers_only_configured_variants() {
    let options = PageOptions {
      variants: &[ModelVariant::Classifier],
      variant: ModelVariant::Classifier,
      ..options()
    };
    let html = render_page(&options, PageResult::Empty);
    assert!(html.contains("<option value=\"classifier\" selected>"));
    assert!(!html.contains("value=\"augmented\""));
    assert!(!html.contains("value=\"non-augmented\""));
  }

  #[test]
  fn loaded_model_shows_banner_and_classes() {
    let names = ClassNames::new(["bad", "good"]);
    let options = PageOptions {
      class_names: Some(&names),
      ..options()
    };
    let html = render_page(&options, PageResult::Empty);
    let banner = html
      .find("<div class=\"message success\">Model loaded successfully</div>")
      .unwrap();
    let table = html.find("<td>good</td>").unwrap();
    assert!(banner < table);
  }

  #[test]
  fn detection_result_is_rendered_with_image() {
    let (_, report) = detection_report(&[(1, 0.92)]);
    let html = render_report(&report);
    assert!(html.contains("<div class=\"message success\">Bottle Condition: GOOD</div>"));
    assert!(html.contains("Confidence Score: 92.00%"));
    assert!(html.contains("<progress max=\"1\" value=\"0.9200\">"));
    assert!(html.contains("<img alt=\"Uploaded Image\" src=\"data:image/png;base64,"));
    assert!(html.contains("<img alt=\"Detection Result\" src=\"data:image/png;base64,"));
  }

  #[test]
  fn classification_result_shows_upload() {
    let names = ClassNames::new(["bad", "good"]);
    let output = InferenceOutput::Probabilities(ClassifyResult::from_probs(vec![0.10, 0.90]).unwrap());
    let selection = select(&output, &names).unwrap();
    let report = Report::build(
      Some(ModelVariant::Classifier),
      ConfidenceThreshold::default(),
      &selection,
      &output,
      &names,
      &RgbImage::new(16, 16),
      &Draw::new().unwrap(),
    );
    let html = render_report(&report);
    assert!(html.contains("<img alt=\"Uploaded Image\" src=\"data:image/png;base64,"));
    assert!(!html.contains("Detection Result"));
    assert!(html.contains("<li>good: 90.00%</li>"));
  }

  #[test]
  fn no_detection_renders_only_warning() {
    let (_, report) = detection_report(&[]);
    let html = render_report(&report);
    assert!(html.contains("<div class=\"message warning\">No bottle detected</div>"));
    assert!(!html.contains("<progress"));
    assert!(html.contains("<img alt=\"Uploaded Image\""));
    assert!(!html.contains("Detection Result"));
  }

  #[test]
  fn error_messages_are_escaped() {
    let names = ClassNames::new(["<bad>", "good"]);
    let options = PageOptions {
      class_names: Some(&names),
      ..options()
    };
    let html = render_page(&options, PageResult::Error("图像数据损坏: <eof>"));
    assert!(html.contains("<div class=\"message error\">图像数据损坏: &lt;eof&gt;</div>"));
    assert!(html.contains("<td>&lt;bad&gt;</td>"));
  }
}
