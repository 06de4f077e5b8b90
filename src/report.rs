// 该文件是 Kanjian （看见） 项目的一部分。
// src/report.rs - 检测结果报告
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

use std::fmt;
#[cfg(feature = "json_report")]
use std::path::Path;

#[cfg(feature = "json_report")]
use serde_json::{Value, json};

use crate::model::{ClassTable, RawDetection};

/// 报告中的一行。显示格式:
/// `person (confidence: 0.91) coords: (10,10),(50,50)`
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
  pub class_id: u32,
  pub class_name: String,
  pub score: f32,
  pub top_left: (i32, i32),
  pub bottom_right: (i32, i32),
}

impl ReportLine {
  pub fn new(detection: &RawDetection, class_table: &ClassTable) -> Self {
    let (x1, y1, x2, y2) = detection.corners();
    Self {
      class_id: detection.class_id,
      class_name: class_table.label(detection.class_id).into_owned(),
      score: detection.score,
      top_left: (x1, y1),
      bottom_right: (x2, y2),
    }
  }

  #[cfg(feature = "json_report")]
  pub fn to_json(&self) -> Value {
    json!({
      "class": self.class_name,
      "class_id": self.class_id,
      "confidence": self.score,
      "box": [
        self.top_left.0,
        self.top_left.1,
        self.bottom_right.0,
        self.bottom_right.1,
      ],
    })
  }
}

impl fmt::Display for ReportLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (confidence: {:.2}) coords: ({},{}),({},{})",
      self.class_name,
      self.score,
      self.top_left.0,
      self.top_left.1,
      self.bottom_right.0,
      self.bottom_right.1
    )
  }
}

pub fn format_report(detections: &[RawDetection], class_table: &ClassTable) -> Vec<ReportLine> {
  detections
    .iter()
    .map(|det| ReportLine::new(det, class_table))
    .collect()
}

#[cfg(feature = "json_report")]
pub fn to_json(lines: &[ReportLine]) -> Value {
  Value::Array(lines.iter().map(ReportLine::to_json).collect())
}

#[cfg(feature = "json_report")]
pub fn write_json(lines: &[ReportLine], path: &Path) -> Result<(), std::io::Error> {
  let text = serde_json::to_string_pretty(&to_json(lines))?;
  std::fs::write(path, text)
}
