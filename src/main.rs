//! 分页电子书下载器。
//!
//! 按页下载书籍正文（SVG）及其引用的图片，按页序写入 EPUB。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/重试/一次性缓存等基础设施
//! - `download`：下载流程编排（并发下载、乱序重排、顺序写入、进度）
//! - `book_parser`：正文解析、页码范围、EPUB 生成与光栅化回退
//! - `network_parser`：HTTP 页面源与 Cookie

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{error, info, warn};

mod base_system;
mod book_parser;
mod download;
mod network_parser;

use base_system::config::{ConfigSpec, load_or_create_with_base};
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use download::models::{NoticeKind, PageNumber};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "paged-book-downloader")]
#[command(about = "Download a paged online book into an EPUB file")]
struct Cli {
    /// 书籍 ID，例如 5432/1
    #[arg(long)]
    book: Option<String>,

    /// 页码范围，例如 5-10,12,15-
    #[arg(long)]
    ranges: Option<String>,

    /// 输出文件或目录（以路径分隔符结尾表示目录）
    #[arg(long)]
    out: Option<String>,

    /// 同时下载的页面数
    #[arg(long)]
    dop: Option<usize>,

    /// 单个页面的最大尝试次数
    #[arg(long)]
    page_retries: Option<u32>,

    /// 单张图片的最大尝试次数
    #[arg(long)]
    image_retries: Option<u32>,

    /// 页码范围按印刷页码标签解析
    #[arg(long, default_value_t = false)]
    labels: bool,

    /// 已登录会话的 Cookie 请求头
    #[arg(long, env = "PAGED_BOOK_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// 书籍总页数
    #[arg(long)]
    page_count: Option<PageNumber>,

    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    /// 数据目录路径（用于存放 config.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(book) = self.book {
            config.book_id = book;
        }
        if let Some(ranges) = self.ranges {
            config.ranges = ranges;
        }
        if let Some(out) = self.out {
            config.save_path = out;
        }
        if let Some(dop) = self.dop {
            config.dop = dop;
        }
        if let Some(n) = self.page_retries {
            config.page_retries = n;
        }
        if let Some(n) = self.image_retries {
            config.image_retries = n;
        }
        if self.labels {
            config.use_labels = true;
        }
        if let Some(cookie) = self.cookie {
            config.cookie = cookie;
        }
        if let Some(count) = self.page_count {
            config.page_count = Some(count);
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("Paged Book Downloader v{}", VERSION);
        return ExitCode::SUCCESS;
    }

    let _log = match init_logging(cli.debug, cli.data_dir.as_deref()) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "download", "{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    info!(target: "config", "当前版本: v{}", VERSION);
    let mut config: Config =
        load_or_create_with_base(cli.config.as_deref(), cli.data_dir.as_deref())
            .context("load config")?;

    cli.apply(&mut config);
    config.validate().map_err(|e| anyhow!(e))?;

    let report = download::plan::run_download(&config)?;
    info!(
        target: "download",
        "Saved {} pages to {}",
        report.pages,
        report.output.display()
    );
    for kind in NoticeKind::ALL {
        let count = report.summary.notice_count(kind);
        if count > 0 {
            warn!(target: "download", kind = kind.label(), count, "页面告警汇总");
        }
    }
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let logs_dir = base_dir.map_or_else(|| PathBuf::from("logs"), |dir| dir.join("logs"));
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
        logs_dir,
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}
