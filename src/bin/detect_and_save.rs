// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/detect_and_save.rs - 检测指定类别并保存标注图像
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl,
  filter::TargetClasses,
  input::ImageFileInput,
  model::ReplayModel,
  output::{SaveImageFileOutput, draw::Draw},
  task::{DetectTask, Task},
};

/// 检测图像中的指定类别，保存带标注的 `<名称>_detected.<扩展名>` 图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 replay:///path/to/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 待检测的图像文件，可指定多次
  #[arg(long = "input", value_name = "IMAGE", required = true, num_args = 1..)]
  pub inputs: Vec<PathBuf>,

  /// 目标类别，逗号分隔
  #[arg(long, value_name = "NAMES", value_delimiter = ',', default_value = "person,dog")]
  pub classes: Vec<String>,

  /// 不按类别筛选，保留全部检测结果
  #[arg(long, conflicts_with = "classes")]
  pub all_classes: bool,

  /// 标签字体文件（TrueType/OpenType），默认使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 输出目录，默认与输入图像同目录
  #[arg(long, value_name = "DIR")]
  pub output_dir: Option<PathBuf>,

  /// 同时保存 JSON 格式的检测报告
  #[arg(long)]
  pub json_report: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入图像: {} 张", args.inputs.len());

  let model = ReplayModel::from_url(&args.model)?;

  let draw = match &args.font {
    Some(path) => Draw::from_font_file(path)?,
    None => Draw::new(),
  };
  let output = SaveImageFileOutput::new(draw)
    .with_directory(args.output_dir.clone())
    .with_json_report(args.json_report);

  let task = if args.all_classes {
    DetectTask::unfiltered()
  } else {
    DetectTask::new(args.classes.iter().collect::<TargetClasses>())
  };

  let input = ImageFileInput::from_paths(args.inputs);
  let summary = task.run_task(input, model, output)?;

  info!(
    "处理完成: {} 张图像, {} 张有匹配结果, {} 张无法读取, {} 张推理失败",
    summary.images.len(),
    summary.matched(),
    summary.unreadable,
    summary.inference_failures()
  );

  Ok(())
}
