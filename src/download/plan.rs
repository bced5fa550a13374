//! 下载计划与主流程编排。
//!
//! 解析页码范围、确定输出文件名，然后把下载器与写入端串联起来：
//! 下载器按完成顺序交付页面，写入端按序列顺序写入 EPUB。

use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use tracing::{debug, info, warn};

use crate::base_system::context::{Config, safe_fs_name};
use crate::book_parser::epub_generator::EpubRenderer;
use crate::book_parser::meta::MetaInfo;
use crate::book_parser::range::{parse_ranges, resolve_ranges};
use crate::book_parser::rasterize::Rasterizer;
use crate::network_parser::cookies::Cookies;
use crate::network_parser::network::{HttpPageSource, HttpSourceConfig};

use super::catalog::{CachedCatalog, Catalog, StaticCatalog};
use super::downloader::OrderedDownloader;
use super::models::{EventSender, PageNumber, PipelineEvent};
use super::progress::{ProgressReporter, ProgressSummary};
use super::unit_fetcher::UnitFetcher;
use super::writer::PageWriter;

const EPUB_EXT: &str = ".epub";
const MAX_FILE_NAME_BYTES: usize = 200;

/// 一次下载确定下来的页序列与输出位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub pages: Vec<PageNumber>,
    pub output: PathBuf,
    pub meta: MetaInfo,
}

#[derive(Debug)]
pub struct DownloadReport {
    pub output: PathBuf,
    pub pages: usize,
    pub summary: ProgressSummary,
}

/// 把页号列表压缩为 `a-b` 区间，用 `_` 连接，例如 `1-3_7_9-10`。
pub fn find_ranges(pages: &[PageNumber]) -> String {
    let mut sorted = pages.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for page in iter {
        if page == end + 1 {
            end = page;
            continue;
        }
        parts.push(format_run(start, end));
        start = page;
        end = page;
    }
    parts.push(format_run(start, end));
    parts.join("_")
}

fn format_run(start: PageNumber, end: PageNumber) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// 目标为空或以路径分隔符结尾时视为目录，在其中生成默认文件名。
pub fn output_path(target: &Path, book_id: &str, sbnr: &str, pages: &[PageNumber]) -> PathBuf {
    let raw = target.to_string_lossy();
    let is_dir = raw.is_empty() || raw.ends_with('/') || raw.ends_with(MAIN_SEPARATOR);
    if !is_dir {
        return target.to_path_buf();
    }

    let mut stem = format!("ebook-{}", book_id.replace('/', "_"));
    if !sbnr.trim().is_empty() {
        stem.push_str(&format!("-sbnr_{}", sbnr.trim()));
    }
    stem.push_str(&format!("-p_{}", find_ranges(pages)));
    // 只截断主干，扩展名始终保留
    let mut name = safe_fs_name(&stem, '_', MAX_FILE_NAME_BYTES - EPUB_EXT.len());
    name.push_str(EPUB_EXT);
    target.join(name)
}

pub fn prepare_download_plan(config: &Config, catalog: &dyn Catalog) -> Result<DownloadPlan> {
    let page_count = catalog.page_count().context("query page count")?;
    let meta = catalog.meta_info().context("query book metadata")?;

    let specs = parse_ranges(&config.ranges).context("parse page ranges")?;
    let labels = config.use_labels.then_some(&meta);
    if config.use_labels && !meta.has_labels() {
        warn!(target: "download", "未提供页码标签，按纯数字页码解析");
    }
    let pages = resolve_ranges(&specs, page_count, labels).context("resolve page ranges")?;

    let output = output_path(&config.save_target(), &config.book_id, &meta.sbnr, &pages);
    info!(
        target: "download",
        book_id = %config.book_id,
        page_count,
        pages = pages.len(),
        output = %output.display(),
        "下载计划已生成"
    );
    Ok(DownloadPlan {
        pages,
        output,
        meta,
    })
}

fn log_book_info(meta: &MetaInfo) {
    let fields = [
        ("Title", &meta.title),
        ("SBNR", &meta.sbnr),
        ("Publisher", &meta.publisher),
        ("Publisher website", &meta.publisher_web),
        ("Publisher address", &meta.publisher_address),
        ("Publisher phone", &meta.publisher_phone),
        ("Publisher email", &meta.publisher_mail),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            info!(target: "download", "{label}: {}", value.trim());
        }
    }
}

/// 执行一次完整下载并生成 EPUB。
pub fn run_download(config: &Config) -> Result<DownloadReport> {
    anyhow::ensure!(
        !config.book_id.trim().is_empty(),
        "book_id is empty, set it in config or pass --book"
    );

    let catalog = CachedCatalog::new(StaticCatalog {
        page_count: config.page_count,
        meta: config.book_meta.clone(),
    });
    let plan = prepare_download_plan(config, &catalog)?;
    log_book_info(&plan.meta);

    let total = plan.pages.len();
    let (tx, rx) = channel::unbounded::<PipelineEvent>();
    let progress = ProgressReporter::spawn(rx, total, config.show_progress_bars)
        .context("spawn progress reporter")?;
    let events = EventSender::new(tx);

    let cookies = Cookies::parse(&config.cookie);
    if cookies.is_empty() {
        warn!(target: "download", "未提供 Cookie，受保护的书籍将无法下载");
    }
    let source = HttpPageSource::new(
        HttpSourceConfig {
            base_url: config.base_url.clone(),
            book_id: config.book_id.trim().to_string(),
            request_timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
            ..HttpSourceConfig::default()
        },
        cookies,
    )
    .context("init http client")?;
    debug!(target: "download", url = %source.book_url(), "书籍地址");

    let fetcher = UnitFetcher::new(
        source,
        config.page_retries,
        config.image_retries,
        events.clone(),
    );
    let downloader = OrderedDownloader::new(fetcher, config.dop);

    let renderer = EpubRenderer::new(
        &plan.output,
        &plan.meta,
        config.page_size(),
        Rasterizer::new(config.fallback_jpeg_quality),
    )
    .context("init epub renderer")?;
    let writer = PageWriter::spawn(renderer, total, events.clone()).context("spawn page writer")?;

    let download_events = events.clone();
    let downloaded = downloader.download(&plan.pages, |payload, meta| {
        info!(
            target: "download",
            "Downloaded page {}/{} {}",
            meta.completion_ordinal, meta.total, meta.page
        );
        download_events.send(PipelineEvent::Downloaded(meta));
        if let Err(err) = writer.ingest(meta.unit_index, payload) {
            // 写入线程已停止，真正的原因由 finish 返回
            debug!(target: "download", page = meta.page, error = %err, "写入端不再接收页面");
        }
    });

    let written = match downloaded {
        Ok(()) => writer.finish().context("write epub"),
        Err(err) => {
            // 等待写入线程退出；缺页必然导致 Incomplete，不生成输出文件
            if let Err(stopped) = writer.finish() {
                debug!(target: "download", reason = %stopped, "写入端已停止");
            }
            Err(anyhow::Error::new(err).context("download pages"))
        }
    };

    drop(download_events);
    drop(downloader);
    drop(events);
    let summary = progress.finish();

    let output = written?;
    info!(
        target: "download",
        output = %output.display(),
        pages = summary.written,
        notices = summary.total_notices(),
        "下载完成"
    );
    Ok(DownloadReport {
        output,
        pages: total,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_pages_into_runs() {
        assert_eq!(find_ranges(&[]), "");
        assert_eq!(find_ranges(&[4]), "4");
        assert_eq!(find_ranges(&[3, 1, 2, 7, 9, 10, 2]), "1-3_7_9-10");
    }

    #[test]
    fn default_output_name_in_directory() {
        let path = output_path(Path::new(""), "5432/1", "", &[1, 2, 3]);
        assert_eq!(path, PathBuf::from("ebook-5432_1-p_1-3.epub"));

        let path = output_path(Path::new("out/"), "77", "190123", &[5]);
        assert_eq!(path, Path::new("out/").join("ebook-77-sbnr_190123-p_5.epub"));
    }

    #[test]
    fn long_page_list_keeps_extension() {
        let pages: Vec<PageNumber> = (1..200).step_by(2).collect();
        let path = output_path(Path::new("out/"), "5432/1", "190123", &pages);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".epub"), "{name}");
        assert!(name.len() <= MAX_FILE_NAME_BYTES, "{} bytes", name.len());
        assert!(name.starts_with("ebook-5432_1-sbnr_190123-p_1_3_5_"));
        assert_eq!(path.parent(), Some(Path::new("out/")));
    }

    #[test]
    fn explicit_output_file_is_kept() {
        let path = output_path(Path::new("books/bio.epub"), "77", "1", &[1]);
        assert_eq!(path, PathBuf::from("books/bio.epub"));
    }

    #[test]
    fn plan_resolves_ranges_against_catalog() {
        let config = Config {
            book_id: "5432/1".into(),
            ranges: "2-3,3,9-".into(),
            ..Config::default()
        };
        let catalog = StaticCatalog {
            page_count: Some(10),
            meta: MetaInfo {
                sbnr: "42".into(),
                ..MetaInfo::default()
            },
        };
        let plan = prepare_download_plan(&config, &catalog).unwrap();
        assert_eq!(plan.pages, vec![2, 3, 9, 10]);
        assert_eq!(
            plan.output,
            PathBuf::from("ebook-5432_1-sbnr_42-p_2-3_9-10.epub")
        );
    }

    #[test]
    fn plan_uses_labels_when_enabled() {
        let config = Config {
            book_id: "1".into(),
            ranges: "U1-2".into(),
            use_labels: true,
            ..Config::default()
        };
        let catalog = StaticCatalog {
            page_count: Some(10),
            meta: MetaInfo {
                first_page: Some(3),
                ..MetaInfo::default()
            },
        };
        let plan = prepare_download_plan(&config, &catalog).unwrap();
        assert_eq!(plan.pages, vec![1, 2, 3, 4]);
    }

    #[test]
    fn plan_without_page_count_fails() {
        let config = Config {
            book_id: "1".into(),
            ..Config::default()
        };
        assert!(prepare_download_plan(&config, &StaticCatalog::default()).is_err());
    }
}
