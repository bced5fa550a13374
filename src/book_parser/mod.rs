//! 解析与导出模块入口。
//!
//! 负责解析页面正文、展开页码范围，并把页面写入 EPUB（必要时光栅化为 JPEG）。

pub mod epub_generator;
pub(crate) mod image_utils;
pub mod meta;
pub mod range;
pub mod rasterize;
pub mod renderer;
pub mod svg_body;
