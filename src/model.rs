// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型接口与检测数据
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

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

mod coco;
pub use self::coco::COCO_CLASSES;

#[cfg(feature = "model_replay")]
mod replay;
#[cfg(feature = "model_replay")]
pub use self::replay::{ReplayModel, ReplayModelError};

/// 检测模型。模型本身（权重、加载、缓存）不属于本库，
/// 只要求可以对不同输入反复调用。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 一次推理的输出：模型的类别表与原始检测结果（已完成 NMS）。
#[derive(Debug, Clone)]
pub struct Inference {
  pub class_table: Arc<ClassTable>,
  pub detections: Vec<RawDetection>,
}

/// 类别编号到类别名称的映射，构造后不可变。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassTable {
  names: BTreeMap<u32, String>,
}

impl ClassTable {
  /// 80 类 COCO 类别表
  pub fn coco() -> Self {
    COCO_CLASSES
      .iter()
      .enumerate()
      .map(|(id, name)| (id as u32, *name))
      .collect()
  }

  pub fn name(&self, class_id: u32) -> Option<&str> {
    self.names.get(&class_id).map(String::as_str)
  }

  /// 用于显示的名称，未知编号显示为 `#<id>`
  pub fn label(&self, class_id: u32) -> Cow<'_, str> {
    match self.name(class_id) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("#{}", class_id)),
    }
  }

  pub fn contains(&self, class_id: u32) -> bool {
    self.names.contains_key(&class_id)
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self.names.iter().map(|(id, name)| (*id, name.as_str()))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl<S: Into<String>> FromIterator<(u32, S)> for ClassTable {
  fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
    Self {
      names: iter
        .into_iter()
        .map(|(id, name)| (id, name.into()))
        .collect(),
    }
  }
}

/// 原始检测行的字段数: x1, y1, x2, y2, score, class
pub const RAW_ROW_FIELDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标，可能超出图像
  pub score: f32,
  pub class_id: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedReason {
  #[error("字段不足: 期望 6 个, 实际 {0} 个")]
  MissingFields(usize),
  #[error("第 {0} 个字段不是有限数值")]
  NonFinite(usize),
  #[error("类别编号无效: {0}")]
  InvalidClassId(f32),
  #[error("类别编号 {0} 不在类别表中")]
  UnknownClassId(u32),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
  #[error("第 {index} 个检测结果格式错误: {reason}")]
  MalformedDetection {
    index: usize,
    reason: MalformedReason,
  },
}

impl RawDetection {
  pub fn new(bbox: [f32; 4], score: f32, class_id: u32) -> Self {
    Self {
      bbox,
      score,
      class_id,
    }
  }

  /// 从模型输出的一行浮点数构造。类别编号按截断取整。
  pub fn from_row(row: &[f32]) -> Result<Self, MalformedReason> {
    if row.len() < RAW_ROW_FIELDS {
      return Err(MalformedReason::MissingFields(row.len()));
    }
    if let Some(i) = row[..RAW_ROW_FIELDS].iter().position(|v| !v.is_finite()) {
      return Err(MalformedReason::NonFinite(i));
    }

    let class = row[5].trunc();
    if class < 0.0 || class >= u32::MAX as f32 {
      return Err(MalformedReason::InvalidClassId(row[5]));
    }

    Ok(Self {
      bbox: [row[0], row[1], row[2], row[3]],
      score: row[4],
      class_id: class as u32,
    })
  }

  /// 整批转换，任何一行出错即整体失败
  pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Vec<Self>, DetectionError> {
    rows
      .iter()
      .enumerate()
      .map(|(index, row)| {
        Self::from_row(row.as_ref())
          .map_err(|reason| DetectionError::MalformedDetection { index, reason })
      })
      .collect()
  }

  /// 截断取整后的角点 (x1, y1, x2, y2)
  pub fn corners(&self) -> (i32, i32, i32, i32) {
    (
      self.bbox[0] as i32,
      self.bbox[1] as i32,
      self.bbox[2] as i32,
      self.bbox[3] as i32,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_table_has_80_classes() {
    let table = ClassTable::coco();
    assert_eq!(table.len(), 80);
    assert_eq!(table.name(0), Some("person"));
    assert_eq!(table.name(16), Some("dog"));
    assert_eq!(table.name(80), None);
  }

  #[test]
  fn label_falls_back_to_id() {
    let table: ClassTable = [(0, "person")].into_iter().collect();
    assert_eq!(table.label(0), "person");
    assert_eq!(table.label(9), "#9");
  }

  #[test]
  fn from_row_truncates_class_id() {
    let det = RawDetection::from_row(&[10.0, 10.0, 50.0, 50.0, 0.91, 1.9]).unwrap();
    assert_eq!(det.class_id, 1);
    assert_eq!(det.bbox, [10.0, 10.0, 50.0, 50.0]);
    assert_eq!(det.score, 0.91);
  }

  #[test]
  fn from_row_rejects_short_rows() {
    assert_eq!(
      RawDetection::from_row(&[1.0, 2.0, 3.0]),
      Err(MalformedReason::MissingFields(3))
    );
  }

  #[test]
  fn from_row_rejects_non_finite_and_negative_class() {
    assert_eq!(
      RawDetection::from_row(&[f32::NAN, 0.0, 1.0, 1.0, 0.5, 0.0]),
      Err(MalformedReason::NonFinite(0))
    );
    assert_eq!(
      RawDetection::from_row(&[0.0, 0.0, 1.0, 1.0, 0.5, -2.0]),
      Err(MalformedReason::InvalidClassId(-2.0))
    );
  }

  #[test]
  fn from_row_rejects_class_id_beyond_u32() {
    let too_large = 4_294_967_296.0_f32;
    assert_eq!(
      RawDetection::from_row(&[0.0, 0.0, 1.0, 1.0, 0.5, too_large]),
      Err(MalformedReason::InvalidClassId(too_large))
    );
    assert_eq!(
      RawDetection::from_row(&[0.0, 0.0, 1.0, 1.0, 0.5, 4_294_967_040.0])
        .map(|det| det.class_id),
      Ok(4_294_967_040)
    );
  }

  #[test]
  fn from_rows_reports_offending_index() {
    let rows: Vec<Vec<f32>> = vec![vec![0.0, 0.0, 1.0, 1.0, 0.5, 0.0], vec![0.0, 0.0]];
    assert_eq!(
      RawDetection::from_rows(&rows),
      Err(DetectionError::MalformedDetection {
        index: 1,
        reason: MalformedReason::MissingFields(2),
      })
    );
  }

  #[test]
  fn corners_truncate_toward_zero() {
    let det = RawDetection::new([-5.7, 3.9, 15.2, 0.99], 0.7, 0);
    assert_eq!(det.corners(), (-5, 3, 15, 0));
  }
}
