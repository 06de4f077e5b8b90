// 该文件是 Kanjian （看见） 项目的一部分。
// src/filter.rs - 类别解析与检测结果筛选
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

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

use crate::model::{ClassTable, DetectionError, MalformedReason, RawDetection};

/// 调用方指定的目标类别名称
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetClasses(BTreeSet<String>);

impl TargetClasses {
  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn resolve(&self, class_table: &ClassTable) -> TargetIdSet {
    resolve_target_ids(class_table, self.iter())
  }
}

impl<S: AsRef<str>> FromIterator<S> for TargetClasses {
  // 名称去掉首尾空白，空名称忽略
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|name| name.as_ref().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect(),
    )
  }
}

impl fmt::Display for TargetClasses {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<&str> = self.iter().collect();
    write!(f, "{}", names.join(", "))
  }
}

/// 需要保留的类别编号。`any()` 表示不筛选，与空集合（全部丢弃）不同。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdSet {
  ids: Option<BTreeSet<u32>>,
}

impl TargetIdSet {
  pub fn any() -> Self {
    Self { ids: None }
  }

  pub fn only(ids: impl IntoIterator<Item = u32>) -> Self {
    Self {
      ids: Some(ids.into_iter().collect()),
    }
  }

  pub fn contains(&self, class_id: u32) -> bool {
    match &self.ids {
      Some(ids) => ids.contains(&class_id),
      None => true,
    }
  }

  pub fn is_any(&self) -> bool {
    self.ids.is_none()
  }

  /// `any()` 时为 `None`
  pub fn ids(&self) -> Option<&BTreeSet<u32>> {
    self.ids.as_ref()
  }
}

/// 将类别名称解析为类别编号。类别表中不存在的名称直接忽略。
pub fn resolve_target_ids<I, S>(class_table: &ClassTable, target_names: I) -> TargetIdSet
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let names: Vec<S> = target_names.into_iter().collect();
  let wanted: HashSet<&str> = names.iter().map(|name| name.as_ref()).collect();

  let ids: BTreeSet<u32> = class_table
    .iter()
    .filter(|(_, name)| wanted.contains(name))
    .map(|(id, _)| id)
    .collect();

  for name in &wanted {
    if !class_table.iter().any(|(_, known)| known == *name) {
      debug!("类别表中没有类别 '{}'，已忽略", name);
    }
  }

  TargetIdSet { ids: Some(ids) }
}

/// 筛选后的检测结果，保持原始顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredDetections(Vec<RawDetection>);

impl FilteredDetections {
  pub fn as_slice(&self) -> &[RawDetection] {
    &self.0
  }
}

impl Deref for FilteredDetections {
  type Target = [RawDetection];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl<'a> IntoIterator for &'a FilteredDetections {
  type Item = &'a RawDetection;
  type IntoIter = std::slice::Iter<'a, RawDetection>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
  /// 模型没有给出任何检测结果
  NoRawDetections,
  /// 有检测结果，但都不属于目标类别
  NoMatches { raw_count: usize },
  Matches(FilteredDetections),
}

impl FilterOutcome {
  /// 保留下来的检测结果，前两种情况均为空
  pub fn detections(&self) -> &[RawDetection] {
    match self {
      FilterOutcome::Matches(filtered) => filtered.as_slice(),
      _ => &[],
    }
  }

  pub fn is_match(&self) -> bool {
    matches!(self, FilterOutcome::Matches(_))
  }
}

/// 按类别筛选检测结果。类别编号不在类别表中时整批拒绝。
pub fn filter_detections(
  class_table: &ClassTable,
  raw_detections: &[RawDetection],
  target_ids: &TargetIdSet,
) -> Result<FilterOutcome, DetectionError> {
  if raw_detections.is_empty() {
    return Ok(FilterOutcome::NoRawDetections);
  }

  if let Some(index) = raw_detections
    .iter()
    .position(|det| !class_table.contains(det.class_id))
  {
    return Err(DetectionError::MalformedDetection {
      index,
      reason: MalformedReason::UnknownClassId(raw_detections[index].class_id),
    });
  }

  let kept: Vec<RawDetection> = raw_detections
    .iter()
    .filter(|det| target_ids.contains(det.class_id))
    .copied()
    .collect();

  debug!("筛选检测结果: {} -> {}", raw_detections.len(), kept.len());

  if kept.is_empty() {
    Ok(FilterOutcome::NoMatches {
      raw_count: raw_detections.len(),
    })
  } else {
    Ok(FilterOutcome::Matches(FilteredDetections(kept)))
  }
}

/// 单张图像的处理结果：类别表与筛选结果
#[derive(Debug, Clone)]
pub struct DetectResult {
  pub class_table: Arc<ClassTable>,
  pub outcome: FilterOutcome,
}

impl DetectResult {
  pub fn detections(&self) -> &[RawDetection] {
    self.outcome.detections()
  }
}
