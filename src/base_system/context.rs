//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};
use crate::book_parser::meta::MetaInfo;
use crate::download::models::PageNumber;
use crate::network_parser::network::DEFAULT_BASE_URL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 书籍配置
    #[serde(default)]
    pub book_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub ranges: String,
    #[serde(default = "default_false")]
    pub use_labels: bool,
    #[serde(default)]
    pub page_count: Option<PageNumber>,
    #[serde(default)]
    pub book_meta: MetaInfo,

    // 网络配置
    #[serde(default = "default_dop")]
    pub dop: usize,
    #[serde(default = "default_retries")]
    pub page_retries: u32,
    #[serde(default = "default_retries")]
    pub image_retries: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    // 输出配置
    #[serde(default)]
    pub save_path: String,
    #[serde(default = "default_page_width")]
    pub page_width: u32,
    #[serde(default = "default_page_height")]
    pub page_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub fallback_jpeg_quality: u8,
    #[serde(default = "default_true")]
    pub show_progress_bars: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            book_id: String::new(),
            base_url: default_base_url(),
            cookie: String::new(),
            ranges: String::new(),
            use_labels: default_false(),
            page_count: None,
            book_meta: MetaInfo::default(),
            dop: default_dop(),
            page_retries: default_retries(),
            image_retries: default_retries(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            save_path: String::new(),
            page_width: default_page_width(),
            page_height: default_page_height(),
            fallback_jpeg_quality: default_jpeg_quality(),
            show_progress_bars: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 17] = [
            FieldMeta {
                name: "book_id",
                description: "书籍 ID，即打开书籍时地址中的部分，例如 /ebook/5432/1/index.html 对应 5432/1",
            },
            FieldMeta {
                name: "base_url",
                description: "书籍页面的根地址",
            },
            FieldMeta {
                name: "cookie",
                description: "已登录会话的 Cookie 请求头内容（也可通过环境变量 PAGED_BOOK_COOKIE 提供）",
            },
            FieldMeta {
                name: "ranges",
                description: "页码范围, 例如: 5-10,12,15-  留空表示整本书",
            },
            FieldMeta {
                name: "use_labels",
                description: "页码范围是否按印刷页码标签解析",
            },
            FieldMeta {
                name: "page_count",
                description: "书籍总页数",
            },
            FieldMeta {
                name: "book_meta",
                description: "书籍元信息（标题、SBNR、出版社及联系方式、页码标签）",
            },
            FieldMeta {
                name: "dop",
                description: "同时下载的页面数",
            },
            FieldMeta {
                name: "page_retries",
                description: "单个页面的最大尝试次数",
            },
            FieldMeta {
                name: "image_retries",
                description: "单张图片的最大尝试次数",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "save_path",
                description: "输出路径，可以是文件或目录（以路径分隔符结尾），留空为当前目录",
            },
            FieldMeta {
                name: "page_width",
                description: "页面宽度（像素）",
            },
            FieldMeta {
                name: "page_height",
                description: "页面高度（像素）",
            },
            FieldMeta {
                name: "fallback_jpeg_quality",
                description: "回退光栅化页面的 JPEG 质量 (1-100)",
            },
            FieldMeta {
                name: "show_progress_bars",
                description: "是否显示进度条",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), String> {
        if self.dop == 0 {
            return Err("dop must be at least 1".into());
        }
        if self.page_width == 0 || self.page_height == 0 {
            return Err(format!(
                "page size must be positive, got {}x{}",
                self.page_width, self.page_height
            ));
        }
        if !(1..=100).contains(&self.fallback_jpeg_quality) {
            return Err(format!(
                "fallback_jpeg_quality must be within 1-100, got {}",
                self.fallback_jpeg_quality
            ));
        }
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(format!("base_url is not a valid url: {}", self.base_url));
        }
        Ok(())
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }

    pub fn page_size(&self) -> (u32, u32) {
        (self.page_width, self.page_height)
    }

    /// 输出目标；未配置时为当前目录。
    pub fn save_target(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            PathBuf::new()
        } else {
            PathBuf::from(&self.save_path)
        }
    }
}

/// 清理文件名中的非法字符与 Windows 保留名，并按字节长度截断。
pub fn safe_fs_name(name: &str, replacement: char, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            ':' | '"' | '<' | '>' | '/' | '\\' | '|' | '?' | '*' => replacement,
            c if (c as u32) < 32 => replacement,
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }
    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = cleaned.split('.').next().unwrap_or("").to_uppercase();
    if RESERVED.contains(&stem.as_str()) {
        cleaned.insert(0, replacement);
    }

    if cleaned.len() > max_len {
        let mut end = max_len;
        while end > 0 && !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }
    cleaned
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_dop() -> usize {
    5
}

fn default_retries() -> u32 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_page_width() -> u32 {
    909
}

fn default_page_height() -> u32 {
    1286
}

fn default_jpeg_quality() -> u8 {
    85
}
