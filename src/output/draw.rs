// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut, text_size};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{ClassTable, RawDetection};

// 绘制常量，所有检测框统一使用
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_OFFSET: i32 = 10; // 标签基线位于框上边沿之上的距离

// DejaVu Sans，许可见 assets/font-LICENSE
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

/// 检测框与标签绘制器。
///
/// 角点按截断取整后不做修正，只在绘制时把每条边裁剪到画布范围内，
/// 完全落在画布外的边和标签直接跳过。
#[derive(Clone)]
pub struct Draw {
  font: FontArc,
  font_size: f32,
  label_offset: i32,
  thickness: i32,
  color: [u8; 3],
}

impl fmt::Debug for Draw {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Draw")
      .field("font_size", &self.font_size)
      .field("label_offset", &self.label_offset)
      .field("thickness", &self.thickness)
      .field("color", &self.color)
      .finish()
  }
}

impl Default for Draw {
  fn default() -> Self {
    let font = FontArc::try_from_slice(DEFAULT_FONT).expect("无法加载嵌入的字体文件");
    Self::with_font(font)
  }
}

impl Draw {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_font(font: FontArc) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_offset: LABEL_OFFSET,
      thickness: BOX_THICKNESS,
      color: BOX_COLOR,
    }
  }

  pub fn from_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载标签字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  /// 在图像副本上绘制，调用方的图像保持不变
  pub fn render(
    &self,
    image: &RgbImage,
    detections: &[RawDetection],
    class_table: &ClassTable,
  ) -> RgbImage {
    self.render_owned(image.clone(), detections, class_table)
  }

  /// 直接在传入的图像上绘制
  pub fn render_owned(
    &self,
    mut image: RgbImage,
    detections: &[RawDetection],
    class_table: &ClassTable,
  ) -> RgbImage {
    self.draw_detections_on_image(&mut image, detections, class_table);
    image
  }

  pub fn draw_detections_on_image(
    &self,
    image: &mut RgbImage,
    detections: &[RawDetection],
    class_table: &ClassTable,
  ) {
    for det in detections {
      let corners = det.corners();
      self.draw_bbox(image, corners);

      let label = format!("{} {:.2}", class_table.label(det.class_id), det.score);
      self.draw_label(image, corners.0, corners.1, &label);
    }
  }

  // 由外向内逐层绘制边框，零宽或零高的框退化为线段
  fn draw_bbox(&self, image: &mut RgbImage, (x1, y1, x2, y2): (i32, i32, i32, i32)) {
    let color = Rgb(self.color);
    let (width, height) = image.dimensions();

    for t in 0..self.thickness {
      let (l, r) = (x1.saturating_add(t), x2.saturating_sub(t));
      let (top, bottom) = (y1.saturating_add(t), y2.saturating_sub(t));
      if t > 0 && (l > r || top > bottom) {
        break;
      }

      if let Some((a, b)) = clip_span(l, r, width) {
        for y in [top, bottom] {
          if on_canvas(y, height) {
            draw_line_segment_mut(image, (a, y as f32), (b, y as f32), color);
          }
        }
      }
      if let Some((a, b)) = clip_span(top, bottom, height) {
        for x in [l, r] {
          if on_canvas(x, width) {
            draw_line_segment_mut(image, (x as f32, a), (x as f32, b), color);
          }
        }
      }
    }
  }

  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, label: &str) {
    let scale = PxScale::from(self.font_size);

    // draw_text_mut 以文本左上角定位，换算为基线在框上方 label_offset 处
    let top = y
      .saturating_sub(self.label_offset)
      .saturating_sub(self.font_size as i32);

    let (text_w, text_h) = text_size(scale, &self.font, label);
    let visible = i64::from(x) < i64::from(image.width())
      && i64::from(top) < i64::from(image.height())
      && i64::from(x) + i64::from(text_w) > 0
      && i64::from(top) + i64::from(text_h) > 0;
    if !visible {
      debug!("标签位于图像之外，跳过: {}", label);
      return;
    }

    draw_text_mut(image, Rgb(self.color), x, top, scale, &self.font, label);
  }
}

fn on_canvas(v: i32, len: u32) -> bool {
  v >= 0 && i64::from(v) < i64::from(len)
}

// 闭区间 [a, b] 与 [0, len) 的交集，没有交集时返回 None
fn clip_span(a: i32, b: i32, len: u32) -> Option<(f32, f32)> {
  let (lo, hi) = (i64::from(a.min(b)), i64::from(a.max(b)));
  let last = i64::from(len) - 1;
  if hi < 0 || lo > last {
    return None;
  }
  Some((lo.max(0) as f32, hi.min(last) as f32))
}
