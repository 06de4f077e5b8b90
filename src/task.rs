// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 检测任务
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

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::{
  filter::{DetectResult, FilterOutcome, TargetClasses, TargetIdSet, filter_detections},
  frame::ImageFrame,
  model::{ClassTable, Inference, Model},
  output::Render,
  report::{ReportLine, format_report},
};

/// 未指定时的目标类别
pub const DEFAULT_TARGET_CLASSES: [&str; 2] = ["person", "dog"];

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageStatus {
  Matched(Vec<ReportLine>),
  NoRawDetections,
  NoMatches { raw_count: usize },
  InferenceFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
  pub source: PathBuf,
  pub status: ImageStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSummary {
  pub images: Vec<ImageRecord>,
  /// 无法读取或解码的输入数
  pub unreadable: usize,
}

impl TaskSummary {
  pub fn matched(&self) -> usize {
    self
      .images
      .iter()
      .filter(|record| matches!(record.status, ImageStatus::Matched(_)))
      .count()
  }

  pub fn total_detections(&self) -> usize {
    self
      .images
      .iter()
      .map(|record| match &record.status {
        ImageStatus::Matched(lines) => lines.len(),
        _ => 0,
      })
      .sum()
  }

  pub fn inference_failures(&self) -> usize {
    self
      .images
      .iter()
      .filter(|record| record.status == ImageStatus::InferenceFailed)
      .count()
  }
}

/// 逐张处理输入图像：推理、按类别筛选、报告并输出标注图像。
///
/// 单张图像读取或推理失败时记录错误并继续处理下一张；
/// 检测结果格式错误与输出错误会中止任务。
#[derive(Debug, Clone)]
pub struct DetectTask {
  targets: Option<TargetClasses>,
}

impl Default for DetectTask {
  fn default() -> Self {
    Self::new(DEFAULT_TARGET_CLASSES.into_iter().collect())
  }
}

impl DetectTask {
  pub fn new(targets: TargetClasses) -> Self {
    Self {
      targets: Some(targets),
    }
  }

  /// 不按类别筛选
  pub fn unfiltered() -> Self {
    Self { targets: None }
  }

  fn describe_targets(&self) -> String {
    match &self.targets {
      Some(targets) => targets.to_string(),
      None => "全部类别".to_string(),
    }
  }
}

// 同一类别表只解析一次
#[derive(Default)]
struct ResolvedTargets {
  cached: Option<(Arc<ClassTable>, TargetIdSet)>,
}

impl ResolvedTargets {
  fn resolve(&mut self, targets: Option<&TargetClasses>, class_table: &Arc<ClassTable>) -> TargetIdSet {
    if let Some((table, ids)) = &self.cached {
      if Arc::ptr_eq(table, class_table) || table == class_table {
        return ids.clone();
      }
    }

    let ids = match targets {
      Some(targets) => {
        let ids = targets.resolve(class_table);
        if !targets.is_empty() && ids.ids().is_some_and(|ids| ids.is_empty()) {
          warn!("请求的类别 ({}) 均不在模型类别表中", targets);
        }
        ids
      }
      None => TargetIdSet::any(),
    };
    debug!("目标类别编号: {:?}", ids.ids());

    self.cached = Some((Arc::clone(class_table), ids.clone()));
    ids
  }
}

impl<
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<ImageFrame, IE>>,
  M: Model<Input = ImageFrame, Output = Inference, Error = ME>,
  O: Render<ImageFrame, DetectResult, Error = RE>,
> Task<I, M, O> for DetectTask
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务，目标类别: {}", self.describe_targets());
    let mut resolved = ResolvedTargets::default();
    let mut summary = TaskSummary::default();

    for frame in input {
      let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
          error!("读取图像失败: {}", e);
          summary.unreadable += 1;
          continue;
        }
      };
      let source = frame.source().to_path_buf();
      info!(
        "处理图像: {} ({}x{})",
        source.display(),
        frame.width(),
        frame.height()
      );

      let now = std::time::Instant::now();
      let Inference {
        class_table,
        detections,
      } = match model.infer(&frame) {
        Ok(inference) => inference,
        Err(e) => {
          error!("推理失败 {}: {}", source.display(), e);
          summary.images.push(ImageRecord {
            source,
            status: ImageStatus::InferenceFailed,
          });
          continue;
        }
      };
      info!("推理完成，耗时: {:.2?}", now.elapsed());

      let target_ids = resolved.resolve(self.targets.as_ref(), &class_table);
      let outcome = filter_detections(&class_table, &detections, &target_ids)
        .with_context(|| format!("图像 {} 的检测结果无效", source.display()))?;

      let status = match &outcome {
        FilterOutcome::NoRawDetections => {
          warn!("{}: 未检测到任何对象", source.display());
          ImageStatus::NoRawDetections
        }
        FilterOutcome::NoMatches { raw_count } => {
          warn!(
            "{}: 未检测到指定类别 ({}) 的对象，另有 {} 个其他类别的检测结果",
            source.display(),
            self.describe_targets(),
            raw_count
          );
          ImageStatus::NoMatches {
            raw_count: *raw_count,
          }
        }
        FilterOutcome::Matches(filtered) => {
          let lines = format_report(filtered, &class_table);
          info!("检测到的对象 ({}):", self.describe_targets());
          for line in &lines {
            info!("- {}", line);
          }
          ImageStatus::Matched(lines)
        }
      };

      let result = DetectResult {
        class_table,
        outcome,
      };
      output
        .render_result(&frame, &result)
        .with_context(|| format!("输出图像 {} 的检测结果失败", source.display()))?;

      summary.images.push(ImageRecord { source, status });
    }

    info!(
      "任务完成: {} 张图像, {} 张有匹配结果, 共 {} 个对象",
      summary.images.len(),
      summary.matched(),
      summary.total_detections()
    );
    Ok(summary)
  }
}
