//! 页面数据源接口。
//!
//! 每次调用只做一次尝试：`Ok(None)` 为瞬时失败（由上层重试），`Err` 为致命错误。

use thiserror::Error;

use super::models::PageNumber;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{context}: invalid response: {status}")]
    UnexpectedStatus { context: &'static str, status: u16 },
    #[error("invalid resource reference {reference:?} on page {page}: {reason}")]
    BadReference {
        page: PageNumber,
        reference: String,
        reason: String,
    },
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

pub trait PageSource: Send + Sync {
    /// 拉取页面正文（SVG 文本）。
    fn fetch_body(&self, page: PageNumber) -> Result<Option<String>, FetchError>;

    /// 拉取页面内引用的子资源。`reference` 是正文中的原始引用值。
    fn fetch_resource(
        &self,
        page: PageNumber,
        reference: &str,
    ) -> Result<Option<Vec<u8>>, FetchError>;
}

impl<S: PageSource + ?Sized> PageSource for &S {
    fn fetch_body(&self, page: PageNumber) -> Result<Option<String>, FetchError> {
        (**self).fetch_body(page)
    }

    fn fetch_resource(
        &self,
        page: PageNumber,
        reference: &str,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        (**self).fetch_resource(page, reference)
    }
}

impl<S: PageSource + ?Sized> PageSource for std::sync::Arc<S> {
    fn fetch_body(&self, page: PageNumber) -> Result<Option<String>, FetchError> {
        (**self).fetch_body(page)
    }

    fn fetch_resource(
        &self,
        page: PageNumber,
        reference: &str,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        (**self).fetch_resource(page, reference)
    }
}
