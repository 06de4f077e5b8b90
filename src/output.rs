// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

const DETECTED_SUFFIX: &str = "_detected";

/// 检测结果图像的默认保存路径: `dir/B.E` -> `dir/B_detected.E`
pub fn detected_path(input: &Path) -> PathBuf {
  let mut name = OsString::new();
  name.push(input.file_stem().unwrap_or_default());
  name.push(DETECTED_SUFFIX);
  if let Some(ext) = input.extension() {
    name.push(".");
    name.push(ext);
  }
  input.with_file_name(name)
}
