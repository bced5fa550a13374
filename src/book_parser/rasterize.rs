//! 回退光栅化：用 resvg 把页面正文画到白底位图上，再编码为 JPEG。

use std::sync::Arc;

use resvg::tiny_skia::{Color, Pixmap, Transform};
use resvg::usvg::{self, ImageHrefResolver, ImageKind, fontdb};
use tracing::debug;

use super::image_utils::{ImageFormat, broken_image_png, encode_jpeg, sniff_format};
use super::renderer::RenderError;
use crate::download::models::ResourceTable;

pub struct Rasterizer {
    fontdb: Arc<fontdb::Database>,
    jpeg_quality: u8,
}

impl Rasterizer {
    /// 系统字体只加载一次，所有回退页面共用。
    pub fn new(jpeg_quality: u8) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        debug!(target: "writer", faces = db.len(), "回退光栅化字体已加载");
        Self {
            fontdb: Arc::new(db),
            jpeg_quality,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_fonts(jpeg_quality: u8) -> Self {
        Self {
            fontdb: Arc::new(fontdb::Database::new()),
            jpeg_quality,
        }
    }

    pub fn rasterize(
        &self,
        body: &str,
        resources: &ResourceTable,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        let mut options = usvg::Options::default();
        options.resources_dir = None;
        options.fontdb = Arc::clone(&self.fontdb);
        options.image_href_resolver = ImageHrefResolver {
            resolve_data: ImageHrefResolver::default_data_resolver(),
            resolve_string: Box::new(move |href: &str, _: &usvg::Options<'_>| {
                let bytes = resources
                    .get(href)
                    .map(Vec::as_slice)
                    .unwrap_or_else(|| broken_image_png());
                image_kind(bytes)
            }),
        };

        let tree = usvg::Tree::from_str(body, &options)
            .map_err(|e| RenderError::Raster(e.to_string()))?;
        let size = tree.size();
        if size.width() <= 0.0 || size.height() <= 0.0 {
            return Err(RenderError::Raster("page has no drawable area".into()));
        }

        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| RenderError::Raster(format!("invalid page size {width}x{height}")))?;
        pixmap.fill(Color::WHITE);
        let transform = Transform::from_scale(
            width as f32 / size.width(),
            height as f32 / size.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        // 白底不透明，预乘 alpha 与直通值一致，直接丢弃 alpha 通道
        let rgb: Vec<u8> = pixmap
            .data()
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        encode_jpeg(&rgb, width, height, self.jpeg_quality)
            .map_err(|e| RenderError::Raster(e.to_string()))
    }
}

fn image_kind(bytes: &[u8]) -> Option<ImageKind> {
    let data = Arc::new(bytes.to_vec());
    match sniff_format(bytes) {
        ImageFormat::Jpeg => Some(ImageKind::JPEG(data)),
        ImageFormat::Png => Some(ImageKind::PNG(data)),
        ImageFormat::Gif => Some(ImageKind::GIF(data)),
        ImageFormat::Webp => Some(ImageKind::WEBP(data)),
        ImageFormat::Unknown => None,
    }
}
