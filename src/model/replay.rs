// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/replay.rs - 回放模型：从 JSON 文件读取预先计算的检测结果
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

//! 文件格式:
//!
//! ```json
//! {
//!   "names": { "0": "person", "1": "dog" },
//!   "detections": {
//!     "street.jpg": [[10, 10, 50, 50, 0.91, 0]],
//!     "default": []
//!   }
//! }
//! ```
//!
//! `names` 也可以是名称数组（下标即编号），缺省时使用 COCO 类别表。
//! 找不到图像文件名时使用 `default`，两者都没有则视为没有检测结果。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageFrame,
  model::{ClassTable, DetectionError, Inference, Model, RawDetection},
  url_path,
};

const DEFAULT_ENTRY: &str = "default";

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("模型路径必须使用 {expected} 方案, 实际为 {found}")]
  SchemeMismatch { expected: String, found: String },
  #[error("回放文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("回放文件不是有效的 JSON: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("回放文件格式错误: {0}")]
  FormatError(String),
  #[error("回放文件 '{entry}' 中的检测结果无效: {source}")]
  Malformed {
    entry: String,
    source: DetectionError,
  },
}

/// 按图像文件名回放检测结果的模型
#[derive(Debug, Clone)]
pub struct ReplayModel {
  class_table: Arc<ClassTable>,
  detections: HashMap<String, Vec<RawDetection>>,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        found: url.scheme().to_string(),
      });
    }

    Self::from_file(&url_path(url))
  }
}

impl ReplayModel {
  pub fn from_file(path: &Path) -> Result<Self, ReplayModelError> {
    info!("加载回放文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let model = Self::from_json_str(&text)?;
    info!(
      "回放文件加载完成: {} 个类别, {} 组检测结果",
      model.class_table.len(),
      model.detections.len()
    );
    Ok(model)
  }

  pub fn from_json_str(text: &str) -> Result<Self, ReplayModelError> {
    let value: Value = serde_json::from_str(text)?;
    Self::from_value(&value)
  }

  pub fn from_value(value: &Value) -> Result<Self, ReplayModelError> {
    let root = value
      .as_object()
      .ok_or_else(|| ReplayModelError::FormatError("顶层必须是对象".to_string()))?;

    let class_table = match root.get("names") {
      Some(names) => parse_names(names)?,
      None => ClassTable::coco(),
    };

    let detections = match root.get("detections") {
      Some(Value::Object(entries)) => parse_entries(entries)?,
      Some(list @ Value::Array(_)) => {
        let mut entries = Map::new();
        entries.insert(DEFAULT_ENTRY.to_string(), list.clone());
        parse_entries(&entries)?
      }
      Some(_) => {
        return Err(ReplayModelError::FormatError(
          "detections 必须是对象或数组".to_string(),
        ));
      }
      None => HashMap::new(),
    };

    Ok(Self {
      class_table: Arc::new(class_table),
      detections,
    })
  }

  pub fn class_table(&self) -> &Arc<ClassTable> {
    &self.class_table
  }
}

impl Model for ReplayModel {
  type Input = ImageFrame;
  type Output = Inference;
  type Error = ReplayModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let entry = input
      .file_name()
      .and_then(|name| self.detections.get(name))
      .or_else(|| self.detections.get(DEFAULT_ENTRY));

    let detections = entry.cloned().unwrap_or_default();
    debug!(
      "回放 {}: {} 个检测结果",
      input.source().display(),
      detections.len()
    );

    Ok(Inference {
      class_table: Arc::clone(&self.class_table),
      detections,
    })
  }
}

fn parse_names(names: &Value) -> Result<ClassTable, ReplayModelError> {
  match names {
    Value::Array(items) => items
      .iter()
      .enumerate()
      .map(|(id, name)| Ok::<_, ReplayModelError>((id as u32, name_str(name)?)))
      .collect(),
    Value::Object(items) => items
      .iter()
      .map(|(id, name)| {
        let id = id
          .parse::<u32>()
          .map_err(|_| ReplayModelError::FormatError(format!("类别编号无效: {}", id)))?;
        Ok::<_, ReplayModelError>((id, name_str(name)?))
      })
      .collect(),
    _ => Err(ReplayModelError::FormatError(
      "names 必须是对象或数组".to_string(),
    )),
  }
}

fn name_str(name: &Value) -> Result<String, ReplayModelError> {
  name
    .as_str()
    .map(str::to_string)
    .ok_or_else(|| ReplayModelError::FormatError(format!("类别名称必须是字符串: {}", name)))
}

fn parse_entries(
  entries: &Map<String, Value>,
) -> Result<HashMap<String, Vec<RawDetection>>, ReplayModelError> {
  entries
    .iter()
    .map(|(entry, rows)| {
      let rows = parse_rows(entry, rows)?;
      let detections = RawDetection::from_rows(&rows).map_err(|source| {
        ReplayModelError::Malformed {
          entry: entry.clone(),
          source,
        }
      })?;
      Ok::<_, ReplayModelError>((entry.clone(), detections))
    })
    .collect()
}

// 非数值字段按 NaN 处理，交给 RawDetection::from_row 判定
fn parse_rows(entry: &str, rows: &Value) -> Result<Vec<Vec<f32>>, ReplayModelError> {
  let rows = rows
    .as_array()
    .ok_or_else(|| ReplayModelError::FormatError(format!("'{}' 的检测结果必须是数组", entry)))?;

  rows
    .iter()
    .map(|row| {
      row
        .as_array()
        .map(|fields| {
          fields
            .iter()
            .map(|v| v.as_f64().map(|v| v as f32).unwrap_or(f32::NAN))
            .collect()
        })
        .ok_or_else(|| ReplayModelError::FormatError(format!("'{}' 的每个检测结果必须是数组", entry)))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::MalformedReason;
  use image::RgbImage;

  fn frame(name: &str) -> ImageFrame {
    ImageFrame::new(format!("/images/{}", name), RgbImage::new(2, 2))
  }

  #[test]
  fn replays_detections_by_file_name() {
    let model = ReplayModel::from_json_str(
      r#"{
        "names": {"0": "person", "1": "dog", "2": "cat"},
        "detections": {
          "street.jpg": [[10, 10, 50, 50, 0.91, 0], [5, 5, 20, 20, 0.40, 2.0]],
          "default": [[1, 1, 2, 2, 0.8, 1]]
        }
      }"#,
    )
    .unwrap();

    let out = model.infer(&frame("street.jpg")).unwrap();
    assert_eq!(out.class_table.name(2), Some("cat"));
    assert_eq!(
      out.detections,
      vec![
        RawDetection::new([10.0, 10.0, 50.0, 50.0], 0.91, 0),
        RawDetection::new([5.0, 5.0, 20.0, 20.0], 0.40, 2),
      ]
    );

    let out = model.infer(&frame("other.jpg")).unwrap();
    assert_eq!(out.detections.len(), 1);
    assert_eq!(out.detections[0].class_id, 1);
  }

  #[test]
  fn unknown_image_without_default_has_no_detections() {
    let model = ReplayModel::from_json_str(r#"{"detections": {"a.png": []}}"#).unwrap();
    assert_eq!(model.class_table().len(), 80);
    assert!(model.infer(&frame("b.png")).unwrap().detections.is_empty());
  }

  #[test]
  fn names_may_be_an_array_and_detections_a_list() {
    let model =
      ReplayModel::from_json_str(r#"{"names": ["person", "dog"], "detections": [[0, 0, 1, 1, 0.5, 1.7]]}"#)
        .unwrap();
    let out = model.infer(&frame("x.png")).unwrap();
    assert_eq!(out.class_table.name(1), Some("dog"));
    assert_eq!(out.detections[0].class_id, 1);
  }

  #[test]
  fn malformed_rows_fail_loading() {
    let err = ReplayModel::from_json_str(r#"{"detections": {"a.png": [[0, 0, 1, 1, 0.5]]}}"#)
      .unwrap_err();
    match err {
      ReplayModelError::Malformed { entry, source } => {
        assert_eq!(entry, "a.png");
        assert_eq!(
          source,
          DetectionError::MalformedDetection {
            index: 0,
            reason: MalformedReason::MissingFields(5),
          }
        );
      }
      other => panic!("unexpected error: {}", other),
    }

    let err = ReplayModel::from_json_str(r#"{"detections": {"a.png": [[0, 0, 1, "x", 0.5, 0]]}}"#)
      .unwrap_err();
    assert!(matches!(err, ReplayModelError::Malformed { .. }));
  }

  #[test]
  fn rejects_bad_structure_and_scheme() {
    assert!(matches!(
      ReplayModel::from_json_str("[]"),
      Err(ReplayModelError::FormatError(_))
    ));
    assert!(matches!(
      ReplayModel::from_json_str(r#"{"names": {"x": "person"}}"#),
      Err(ReplayModelError::FormatError(_))
    ));
    assert!(matches!(
      ReplayModel::from_json_str("{"),
      Err(ReplayModelError::JsonError(_))
    ));

    let url = Url::parse("yolo26:///model.rknn").unwrap();
    assert!(matches!(
      ReplayModel::from_url(&url),
      Err(ReplayModelError::SchemeMismatch { .. })
    ));
  }

  #[test]
  fn loads_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.json");
    std::fs::write(&path, r#"{"names": ["person"], "detections": {}}"#).unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("replay://{}", url.path())).unwrap();

    let model = ReplayModel::from_url(&url).unwrap();
    assert_eq!(model.class_table().len(), 1);
  }
}
