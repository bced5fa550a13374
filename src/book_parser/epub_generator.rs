//! EPUB 生成器：每个序列位置一页定长页面，矢量正文内联，资源存放在页面目录下。

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use tracing::debug;
use zip::write::FileOptions;

use super::image_utils::{broken_image_png, mime_for};
use super::meta::MetaInfo;
use super::rasterize::Rasterizer;
use super::renderer::{RenderError, Renderer};
use super::svg_body::svg_root_markup;
use crate::download::models::{PageNumber, ResourceRef, ResourceTable};

fn epub_err(e: impl std::fmt::Display) -> RenderError {
    RenderError::Epub(e.to_string())
}

pub struct EpubRenderer {
    book: EpubBuilder<ZipLibrary>,
    output_path: PathBuf,
    width: u32,
    height: u32,
    rasterizer: Rasterizer,
    /// 已提交的页面数，用作页面目录名。
    committed: usize,
}

impl EpubRenderer {
    pub fn new(
        output_path: &Path,
        info: &MetaInfo,
        page_size: (u32, u32),
        rasterizer: Rasterizer,
    ) -> Result<Self, RenderError> {
        let zip = ZipLibrary::new().map_err(epub_err)?;
        let mut book = EpubBuilder::new(zip).map_err(epub_err)?;
        book.epub_version(EpubVersion::V30);

        let title = if info.title.trim().is_empty() {
            "ebook"
        } else {
            info.title.trim()
        };
        book.metadata("title", title).map_err(epub_err)?;
        book.metadata("toc_name", title).ok();
        book.metadata("lang", "de").map_err(epub_err)?;
        if !info.publisher.trim().is_empty() {
            // dc:creator
            book.metadata("author", info.publisher.trim()).map_err(epub_err)?;
        }
        if !info.sbnr.trim().is_empty() {
            book.metadata("subject", info.sbnr.trim()).ok();
        }
        book.metadata("generator", env!("CARGO_PKG_NAME")).ok();

        let (width, height) = page_size;
        let css = format!(
            "html, body {{ margin:0; padding:0; }}
             body {{ width:{width}px; height:{height}px; background:#fff; }}
             .page {{ width:{width}px; height:{height}px; overflow:hidden; }}
             .page svg, .page img {{ display:block; width:{width}px; height:{height}px; }}"
        );
        book.stylesheet(Cursor::new(css)).map_err(epub_err)?;

        Ok(Self {
            book,
            output_path: output_path.to_path_buf(),
            width,
            height,
            rasterizer,
            committed: 0,
        })
    }

    fn next_dir(&self) -> String {
        format!("p{:05}", self.committed + 1)
    }

    fn add_page(&mut self, page: PageNumber, dir: &str, inner: &str) -> Result<(), RenderError> {
        let html = wrap_page_html(page, self.width, self.height, inner);
        self.book
            .add_content(
                EpubContent::new(format!("{dir}/page.xhtml"), Cursor::new(html))
                    .title(format!("第 {page} 页"))
                    .reftype(ReferenceType::Text),
            )
            .map_err(epub_err)?;
        self.committed += 1;
        Ok(())
    }
}

impl Renderer for EpubRenderer {
    type Output = PathBuf;

    fn page_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn blank_page(&mut self, page: PageNumber) -> Result<(), RenderError> {
        let dir = self.next_dir();
        self.add_page(page, &dir, "")
    }

    fn render(
        &mut self,
        page: PageNumber,
        body: &str,
        resources: &ResourceTable,
        missing: &[ResourceRef],
    ) -> Result<(), RenderError> {
        let markup = svg_root_markup(body).map_err(|e| RenderError::Body(e.to_string()))?;

        // 先校验全部引用，避免失败时残留半页资源
        let mut refs: Vec<&str> = resources.keys().map(String::as_str).collect();
        refs.extend(missing.iter().map(String::as_str));
        refs.sort_unstable();
        refs.dedup();
        if let Some(bad) = refs.iter().find(|r| !is_safe_relative(r)) {
            return Err(RenderError::UnsupportedReference((*bad).to_string()));
        }

        let dir = self.next_dir();
        for reference in refs {
            let bytes = match resources.get(reference) {
                Some(bytes) => bytes.clone(),
                None => broken_image_png().to_vec(),
            };
            let mime = mime_for(reference, &bytes);
            self.book
                .add_resource(format!("{dir}/{reference}"), Cursor::new(bytes), mime)
                .map_err(epub_err)?;
        }
        self.add_page(page, &dir, markup)
    }

    fn raster_fallback(
        &mut self,
        body: &str,
        resources: &ResourceTable,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        self.rasterizer.rasterize(body, resources, width, height)
    }

    fn commit_raster(
        &mut self,
        page: PageNumber,
        raster: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        let dir = self.next_dir();
        self.book
            .add_resource(format!("{dir}/page.jpg"), Cursor::new(raster), "image/jpeg")
            .map_err(epub_err)?;
        let img = format!(
            "<img src=\"page.jpg\" width=\"{width}\" height=\"{height}\" alt=\"{page}\"/>"
        );
        self.add_page(page, &dir, &img)
    }

    fn finalize(mut self) -> Result<PathBuf, RenderError> {
        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut buffer = Vec::new();
        self.book.generate(&mut buffer).map_err(epub_err)?;
        let buffer = mark_fixed_layout(buffer)?;
        fs::write(&self.output_path, buffer)?;
        debug!(target: "writer", path = %self.output_path.display(), pages = self.committed, "EPUB 已写出");
        Ok(self.output_path)
    }
}

const FIXED_LAYOUT_META: &str = "<meta property=\"rendition:layout\">pre-paginated</meta>
    <meta property=\"rendition:orientation\">auto</meta>
    <meta property=\"rendition:spread\">none</meta>
  ";

/// 后处理 EPUB zip：epub-builder 无法声明固定版式，在 content.opf 中补充 `rendition:*`，
/// 阅读器才会按定长页面显示而不是重排。其余条目按原压缩方式原样写回（mimetype 仍为首个条目）。
fn mark_fixed_layout(epub_bytes: Vec<u8>) -> Result<Vec<u8>, RenderError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(epub_bytes)).map_err(epub_err)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(epub_err)?;
        let name = entry.name().to_string();
        let compression = entry.compression();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        entries.push((name, compression, data));
    }
    drop(archive);

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut out);
        for (name, compression, data) in entries {
            let data = if name.ends_with(".opf") {
                let opf = String::from_utf8(data).map_err(epub_err)?;
                with_fixed_layout(&opf)?.into_bytes()
            } else {
                data
            };
            let options = FileOptions::default().compression_method(compression);
            writer.start_file(&name, options).map_err(epub_err)?;
            writer.write_all(&data)?;
        }
        writer.finish().map_err(epub_err)?;
    }
    Ok(out.into_inner())
}

fn with_fixed_layout(opf: &str) -> Result<String, RenderError> {
    if opf.contains("rendition:layout") {
        return Ok(opf.to_string());
    }
    if !opf.contains("</metadata>") {
        return Err(RenderError::Epub("content.opf has no metadata block".into()));
    }
    Ok(opf.replacen("</metadata>", &format!("{FIXED_LAYOUT_META}</metadata>"), 1))
}

/// 只允许不含协议、绝对路径与上级目录的相对引用落进压缩包。
fn is_safe_relative(reference: &str) -> bool {
    !reference.is_empty()
        && !reference.contains("://")
        && !reference.starts_with('/')
        && !reference.contains('\\')
        && !reference.contains(['?', '#', ':'])
        && reference.split('/').all(|seg| !seg.is_empty() && seg != ".." && seg != ".")
}

fn wrap_page_html(page: PageNumber, width: u32, height: u32, inner: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='utf-8'?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"de\" xml:lang=\"de\">\n  <head>\n    <title>{page}</title>\n    <meta name=\"viewport\" content=\"width={width}, height={height}\"/>\n    <link href=\"../stylesheet.css\" rel=\"stylesheet\" type=\"text/css\"/>\n  </head>\n  <body><div class=\"page\">{inner}</div></body>\n</html>"
    )
}
