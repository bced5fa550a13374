//! 基于 reqwest（阻塞）的页面数据源。
//!
//! 网络层错误（连接、超时、读取响应体）视为瞬时失败交给重试；
//! 服务器返回非成功状态码视为致命错误。

use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use super::cookies::Cookies;
use crate::download::models::PageNumber;
use crate::download::source::{FetchError, PageSource};

pub const DEFAULT_BASE_URL: &str = "https://a.digi4school.at/ebook/";

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub book_id: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            book_id: String::new(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string(),
        }
    }
}

pub struct HttpPageSource {
    client: Client,
    book_url: Url,
    cookies: Cookies,
}

impl HttpPageSource {
    pub fn new(config: HttpSourceConfig, cookies: Cookies) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        // 未启用 gzip 解码，要求原样返回
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("*"));
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
        );

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            book_url: book_url(&config.base_url, &config.book_id)?,
            cookies,
        })
    }

    pub fn book_url(&self) -> &Url {
        &self.book_url
    }

    pub(crate) fn page_dir(&self, page: PageNumber) -> Result<Url, FetchError> {
        self.book_url
            .join(&format!("{page}/"))
            .map_err(|e| FetchError::Other(format!("page url: {e}")))
    }

    pub(crate) fn body_url(&self, page: PageNumber) -> Result<Url, FetchError> {
        self.page_dir(page)?
            .join(&format!("{page}.svg"))
            .map_err(|e| FetchError::Other(format!("page url: {e}")))
    }

    pub(crate) fn resource_url(&self, page: PageNumber, reference: &str) -> Result<Url, FetchError> {
        self.page_dir(page)?
            .join(reference)
            .map_err(|e| FetchError::BadReference {
                page,
                reference: reference.to_string(),
                reason: e.to_string(),
            })
    }

    /// 发送一次 GET。`Ok(None)` 表示网络层瞬时失败。
    fn get(&self, url: Url, context: &'static str) -> Result<Option<Response>, FetchError> {
        let mut req = self.client.get(url.clone());
        let cookie = self.cookies.header_value();
        if !cookie.is_empty()
            && let Ok(v) = HeaderValue::from_str(&cookie)
        {
            req = req.header(COOKIE, v);
        }
        match req.send() {
            Ok(resp) if resp.status().is_success() => Ok(Some(resp)),
            Ok(resp) => Err(FetchError::UnexpectedStatus {
                context,
                status: resp.status().as_u16(),
            }),
            Err(e) if is_transient(&e) => {
                debug!(target: "fetch", %url, error = %e, "请求失败，稍后重试");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn book_url(base: &str, book_id: &str) -> Result<Url, FetchError> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    let id = book_id.trim().trim_matches('/');
    if id.is_empty() {
        return Err(FetchError::Other("book id is empty".into()));
    }
    Url::parse(&format!("{base}{id}/")).map_err(|e| FetchError::Other(format!("book url: {e}")))
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

impl PageSource for HttpPageSource {
    fn fetch_body(&self, page: PageNumber) -> Result<Option<String>, FetchError> {
        let url = self.body_url(page)?;
        let Some(resp) = self.get(url, "failed to fetch page")? else {
            return Ok(None);
        };
        match resp.text() {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                warn!(target: "fetch", page, error = %e, "读取页面内容失败");
                Ok(None)
            }
        }
    }

    fn fetch_resource(&self, page: PageNumber, reference: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let url = self.resource_url(page, reference)?;
        let Some(resp) = self.get(url, "failed to download image")? else {
            return Ok(None);
        };
        match resp.bytes() {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(e) => {
                warn!(target: "fetch", page, reference, error = %e, "读取图片内容失败");
                Ok(None)
            }
        }
    }
}
