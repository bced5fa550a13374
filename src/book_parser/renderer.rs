//! 单页渲染器接口：写入端按序调用，渲染器负责把页面提交进最终文档。

use thiserror::Error;

use crate::download::models::{PageNumber, ResourceRef, ResourceTable};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page body rejected: {0}")]
    Body(String),
    #[error("unsupported resource reference {0:?}")]
    UnsupportedReference(String),
    #[error("rasterize failed: {0}")]
    Raster(String),
    #[error("epub error: {0}")]
    Epub(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Renderer {
    type Output;

    /// 页面尺寸（像素），回退光栅化使用同一尺寸。
    fn page_size(&self) -> (u32, u32);

    /// 提交一页空白占位页。
    fn blank_page(&mut self, page: PageNumber) -> Result<(), RenderError>;

    /// 渲染矢量正文并提交。`missing` 中的引用没有对应资源，需要替换为占位图。
    fn render(
        &mut self,
        page: PageNumber,
        body: &str,
        resources: &ResourceTable,
        missing: &[ResourceRef],
    ) -> Result<(), RenderError>;

    /// 将正文独立光栅化，返回可嵌入的位图字节。
    fn raster_fallback(
        &mut self,
        body: &str,
        resources: &ResourceTable,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError>;

    /// 以位图形式提交一页。
    fn commit_raster(
        &mut self,
        page: PageNumber,
        raster: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError>;

    /// 所有页面提交完毕后收尾（写出文件等）。
    fn finalize(self) -> Result<Self::Output, RenderError>;
}
