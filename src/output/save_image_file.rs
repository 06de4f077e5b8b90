// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Kanjian Contributors

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  filter::DetectResult,
  frame::ImageFrame,
  output::{Render, detected_path, draw::Draw},
  report, url_path,
};

/// 将标注后的图像保存为 `B_detected.E`。
/// 默认与输入图像同目录，也可指定输出目录。
#[derive(Debug)]
pub struct SaveImageFileOutput {
  directory: Option<PathBuf>,
  draw: Draw,
  json_report: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  /// `image:///output/dir?report=json`
  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let json_report = uri
      .query_pairs()
      .any(|(k, v)| k == "report" && v == "json");
    let directory = match uri.path() {
      "" | "/" => None,
      _ => Some(url_path(uri)),
    };

    Ok(SaveImageFileOutput {
      directory,
      draw: Draw::default(),
      json_report,
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(draw: Draw) -> Self {
    Self {
      directory: None,
      draw,
      json_report: false,
    }
  }

  pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
    self.directory = directory;
    self
  }

  pub fn with_json_report(mut self, json_report: bool) -> Self {
    self.json_report = json_report;
    self
  }

  /// 输入图像对应的保存路径
  pub fn target_path(&self, source: &Path) -> PathBuf {
    let path = detected_path(source);
    match (&self.directory, path.file_name()) {
      (Some(directory), Some(name)) => directory.join(name),
      _ => path,
    }
  }

  // 编码格式优先取自扩展名，其次为输入文件的格式，最后使用 PNG
  fn save_image(
    &self,
    image: &RgbImage,
    path: &Path,
    source_format: Option<ImageFormat>,
  ) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let format = ImageFormat::from_path(path)
      .ok()
      .filter(|format| format.writing_enabled())
      .or(source_format.filter(|format| format.writing_enabled()))
      .unwrap_or(ImageFormat::Png);
    image.save_with_format(path, format)?;
    info!("检测结果图像已保存: {}", path.display());

    Ok(())
  }
}

impl Render<ImageFrame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<(), Self::Error> {
    if !result.outcome.is_match() {
      debug!("没有匹配的检测结果，不保存: {}", frame.source().display());
      return Ok(());
    }

    let path = self.target_path(frame.source());
    let image = self
      .draw
      .render(frame.image(), result.detections(), &result.class_table);
    self.save_image(&image, &path, frame.format())?;

    if self.json_report {
      let lines = report::format_report(result.detections(), &result.class_table);
      let report_path = path.with_extension("json");
      report::write_json(&lines, &report_path)?;
      info!("检测报告已保存: {}", report_path.display());
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use image::Rgb;

  use super::*;
  use crate::filter::{TargetIdSet, filter_detections};
  use crate::model::{ClassTable, RawDetection};

  fn result(detections: &[RawDetection]) -> DetectResult {
    let class_table: ClassTable = [(0, "person"), (1, "dog")].into_iter().collect();
    let outcome = filter_detections(&class_table, detections, &TargetIdSet::only([0])).unwrap();
    DetectResult {
      class_table: Arc::new(class_table),
      outcome,
    }
  }

  fn frame(dir: &Path) -> ImageFrame {
    ImageFrame::new(dir.join("street.png"), RgbImage::from_pixel(32, 32, Rgb([1, 2, 3])))
  }

  #[test]
  fn saves_beside_input_with_detected_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(Draw::new());
    let frame = frame(dir.path());

    output
      .render_result(&frame, &result(&[RawDetection::new([2.0, 2.0, 20.0, 20.0], 0.9, 0)]))
      .unwrap();

    let saved = image::open(dir.path().join("street_detected.png"))
      .unwrap()
      .into_rgb8();
    assert_eq!(saved.get_pixel(2, 10), &Rgb([0, 255, 0]));
    assert_eq!(saved.get_pixel(10, 10), &Rgb([1, 2, 3]));
    assert!(!dir.path().join("street_detected.json").exists());
  }

  #[test]
  fn skips_saving_without_matches() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(Draw::new());
    let frame = frame(dir.path());

    output.render_result(&frame, &result(&[])).unwrap();
    output
      .render_result(&frame, &result(&[RawDetection::new([2.0, 2.0, 20.0, 20.0], 0.9, 1)]))
      .unwrap();

    assert!(!dir.path().join("street_detected.png").exists());
  }

  #[test]
  fn writes_into_directory_with_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("out").join("nested");
    let output = SaveImageFileOutput::new(Draw::new())
      .with_directory(Some(out_dir.clone()))
      .with_json_report(true);
    let frame = frame(dir.path());

    output
      .render_result(&frame, &result(&[RawDetection::new([2.0, 3.0, 20.0, 21.0], 0.9, 0)]))
      .unwrap();

    assert!(out_dir.join("street_detected.png").exists());
    let text = std::fs::read_to_string(out_dir.join("street_detected.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value[0]["class"], "person");
    assert_eq!(value[0]["box"], serde_json::json!([2, 3, 20, 21]));
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn input_without_extension_keeps_its_format() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("photo");
    RgbImage::from_pixel(32, 32, Rgb([1, 2, 3]))
      .save_with_format(&source, ImageFormat::Png)
      .unwrap();
    let frame = crate::input::read_image(&source).unwrap();
    let output = SaveImageFileOutput::new(Draw::new());

    output
      .render_result(&frame, &result(&[RawDetection::new([2.0, 2.0, 20.0, 20.0], 0.9, 0)]))
      .unwrap();

    let saved_path = dir.path().join("photo_detected");
    let saved = image::ImageReader::open(&saved_path)
      .unwrap()
      .with_guessed_format()
      .unwrap();
    assert_eq!(saved.format(), Some(ImageFormat::Png));
    assert_eq!(saved.decode().unwrap().into_rgb8().get_pixel(2, 10), &Rgb([0, 255, 0]));
  }

  #[test]
  fn from_url_reads_directory_and_report_flag() {
    let url = Url::parse("image:///tmp/results?report=json").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert!(output.json_report);
    assert_eq!(
      output.target_path(Path::new("/data/cat.jpg")),
      PathBuf::from("/tmp/results/cat_detected.jpg")
    );

    let url = Url::parse("image:///").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(
      output.target_path(Path::new("/data/cat.jpg")),
      PathBuf::from("/data/cat_detected.jpg")
    );

    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
