// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ImageFrame, url_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch: expected '{expected}', found '{found}'")]
  SchemaMismatch { expected: String, found: String },
  #[error("Image file not found: {0}")]
  NotFound(PathBuf),
  #[error("I/O error on {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Image loading error on {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 读取并解码一张图像，路径必须指向已存在的文件
pub fn read_image(path: &Path) -> Result<ImageFrame, ImageFileInputError> {
  if !path.is_file() {
    return Err(ImageFileInputError::NotFound(path.to_path_buf()));
  }

  let reader = ImageReader::open(path)
    .and_then(|reader| reader.with_guessed_format())
    .map_err(|source| ImageFileInputError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
  let format = reader.format();
  let image = reader
    .decode()
    .map_err(|source| ImageFileInputError::ImageLoadError {
      path: path.to_path_buf(),
      source,
    })?;

  debug!(
    "Decoded {} ({}x{}, {:?})",
    path.display(),
    image.width(),
    image.height(),
    format
  );
  Ok(ImageFrame::new(path, image.into_rgb8()).with_format(format))
}

/// 按顺序读取一组图像文件，每次迭代解码一张
pub struct ImageFileInput {
  paths: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch {
        expected: Self::SCHEME.to_string(),
        found: url.scheme().to_string(),
      });
    }

    Ok(Self::from_paths([url_path(url)]))
  }
}

impl ImageFileInput {
  pub fn from_paths<I, P>(paths: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    Self {
      paths: paths.into_iter().map(Into::into).collect(),
    }
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<ImageFrame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.paths.pop_front().map(|path| read_image(&path))
  }
}
