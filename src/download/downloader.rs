//! 有序下载器：固定宽度的页面工作池 + 首页闸门。
//!
//! 页面按任意顺序完成，每完成一页立即回调 `on_unit`（携带序列位置），
//! 由下游的写入端负责恢复顺序。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crossbeam_channel as channel;
use tracing::{debug, error, info};

use super::gate::FirstUnitGate;
use super::models::{PageNumber, UnitIndex, UnitMeta, UnitPayload};
use super::source::{FetchError, PageSource};
use super::unit_fetcher::UnitFetcher;

pub struct OrderedDownloader<S> {
    fetcher: UnitFetcher<S>,
    dop: usize,
}

impl<S: PageSource> OrderedDownloader<S> {
    pub fn new(fetcher: UnitFetcher<S>, dop: usize) -> Self {
        Self {
            fetcher,
            dop: dop.max(1),
        }
    }

    /// 下载整个序列，所有位置完成且所有回调返回后才返回。
    ///
    /// 第 0 个位置总是单独先下载；其余位置等待它完成（无论成败）后再并发进行。
    /// 任一页面出现致命错误时停止派发新任务，并把第一个错误返回给调用者。
    pub fn download<F>(&self, sequence: &[PageNumber], on_unit: F) -> Result<(), FetchError>
    where
        F: Fn(UnitPayload, UnitMeta) + Sync,
    {
        let total = sequence.len();
        if total == 0 {
            return Ok(());
        }

        let start = Instant::now();
        let workers = self.dop.min(total);
        info!(target: "download", total, workers, "开始下载页面");

        let (tx_jobs, rx_jobs) = channel::unbounded::<(UnitIndex, PageNumber)>();
        for job in sequence.iter().copied().enumerate() {
            let _ = tx_jobs.send(job);
        }
        drop(tx_jobs);

        let gate = FirstUnitGate::new();
        let abort = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);
        let failure: Mutex<Option<FetchError>> = Mutex::new(None);

        std::thread::scope(|s| {
            for worker in 0..workers {
                let rx = rx_jobs.clone();
                let gate = &gate;
                let abort = &abort;
                let completed = &completed;
                let failure = &failure;
                let on_unit = &on_unit;
                let spawned = std::thread::Builder::new()
                    .name(format!("page-worker-{worker}"))
                    .spawn_scoped(s, move || {
                        for (unit_index, page) in rx.iter() {
                            if abort.load(Ordering::Relaxed) {
                                return;
                            }
                            if unit_index != 0 {
                                gate.wait();
                                if abort.load(Ordering::Relaxed) {
                                    return;
                                }
                            }

                            let fetched = self.fetcher.fetch(page);
                            let payload = match fetched {
                                Ok(p) => p,
                                Err(e) => {
                                    error!(target: "download", page, unit_index, error = %e, "页面下载出现致命错误");
                                    abort.store(true, Ordering::Relaxed);
                                    failure
                                        .lock()
                                        .unwrap_or_else(|p| p.into_inner())
                                        .get_or_insert(e);
                                    gate.open();
                                    return;
                                }
                            };
                            if unit_index == 0 {
                                gate.open();
                            }

                            let completion_ordinal = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            debug!(target: "download", page, unit_index, completion_ordinal, "页面就绪");
                            on_unit(
                                payload,
                                UnitMeta {
                                    unit_index,
                                    page,
                                    total,
                                    completion_ordinal,
                                },
                            );
                        }
                    });
                if let Err(e) = spawned {
                    abort.store(true, Ordering::Relaxed);
                    gate.open();
                    failure
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .get_or_insert(FetchError::Other(format!("spawn page worker: {e}")));
                    break;
                }
            }
        });

        if let Some(e) = failure.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(e);
        }

        info!(
            target: "download",
            total,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "页面下载阶段结束"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use crate::download::models::EventSender;
    use crate::download::unit_fetcher::tests::{ScriptedSource, svg_with_images};

    /// 记录正文请求的开始/结束顺序，可为页面设置延迟。
    struct TimedSource {
        delays: HashMap<PageNumber, Duration>,
        fatal_pages: HashSet<PageNumber>,
        log: Mutex<Vec<(PageNumber, &'static str)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TimedSource {
        fn new() -> Self {
            Self {
                delays: HashMap::new(),
                fatal_pages: HashSet::new(),
                log: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl PageSource for TimedSource {
        fn fetch_body(&self, page: PageNumber) -> Result<Option<String>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.log.lock().unwrap().push((page, "start"));
            if let Some(d) = self.delays.get(&page) {
                std::thread::sleep(*d);
            }
            self.log.lock().unwrap().push((page, "end"));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fatal_pages.contains(&page) {
                return Err(FetchError::UnexpectedStatus {
                    context: "failed to fetch page",
                    status: 401,
                });
            }
            Ok(Some(svg_with_images(&[])))
        }

        fn fetch_resource(&self, _: PageNumber, _: &str) -> Result<Option<Vec<u8>>, FetchError> {
            Ok(None)
        }
    }

    #[test]
    fn first_position_finishes_before_others_start() {
        let mut source = TimedSource::new();
        source.delays.insert(100, Duration::from_millis(60));
        let sequence: Vec<PageNumber> = (100..110).collect();
        let downloader = OrderedDownloader::new(
            UnitFetcher::new(&source, 1, 1, EventSender::disconnected()),
            5,
        );

        downloader.download(&sequence, |_, _| {}).unwrap();

        let log = source.log.lock().unwrap().clone();
        let first_end = log.iter().position(|e| *e == (100, "end")).unwrap();
        let first_other = log.iter().position(|(p, _)| *p != 100).unwrap();
        assert_eq!(log[0], (100, "start"));
        assert!(first_end < first_other, "log: {log:?}");
    }

    #[test]
    fn in_flight_pages_never_exceed_dop() {
        let mut source = TimedSource::new();
        for page in 1..=12 {
            source.delays.insert(page, Duration::from_millis(15));
        }
        let sequence: Vec<PageNumber> = (1..=12).collect();
        let downloader = OrderedDownloader::new(
            UnitFetcher::new(&source, 1, 1, EventSender::default()),
            3,
        );

        downloader.download(&sequence, |_, _| {}).unwrap();

        let peak = source.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak >= 2, "pool never ran concurrently, peak {peak}");
        assert_eq!(source.log.lock().unwrap().len(), 24);
    }

    #[test]
    fn every_position_is_delivered_once_with_ordinals() {
        let mut source = TimedSource::new();
        source.delays.insert(2, Duration::from_millis(30));
        source.delays.insert(5, Duration::from_millis(10));
        let sequence: Vec<PageNumber> = (1..=8).collect();
        let downloader = OrderedDownloader::new(
            UnitFetcher::new(&source, 1, 1, EventSender::disconnected()),
            3,
        );

        let seen = Mutex::new(Vec::new());
        downloader
            .download(&sequence, |payload, meta| {
                assert_eq!(payload.page, meta.page);
                assert_eq!(meta.total, 8);
                seen.lock().unwrap().push(meta);
            })
            .unwrap();

        let mut seen = seen.into_inner().unwrap();
        let mut indices: Vec<_> = seen.iter().map(|m| m.unit_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        seen.sort_by_key(|m| m.completion_ordinal);
        let ordinals: Vec<_> = seen.iter().map(|m| m.completion_ordinal).collect();
        assert_eq!(ordinals, (1..=8).collect::<Vec<_>>());
        assert_eq!(seen[0].unit_index, 0);
        for m in &seen {
            assert_eq!(sequence[m.unit_index], m.page);
        }
    }

    #[test]
    fn fatal_error_aborts_download() {
        let mut source = TimedSource::new();
        source.fatal_pages.insert(3);
        let sequence: Vec<PageNumber> = (1..=6).collect();
        let downloader = OrderedDownloader::new(
            UnitFetcher::new(&source, 1, 1, EventSender::disconnected()),
            1,
        );

        let delivered = Mutex::new(Vec::new());
        let err = downloader
            .download(&sequence, |p, _| delivered.lock().unwrap().push(p.page))
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStatus { status: 401, .. }));
        // 单线程下第 3 页之后不再派发
        assert_eq!(delivered.into_inner().unwrap(), vec![1, 2]);
    }

    #[test]
    fn fatal_first_position_releases_waiters() {
        let mut source = TimedSource::new();
        source.fatal_pages.insert(1);
        source.delays.insert(1, Duration::from_millis(20));
        let sequence: Vec<PageNumber> = (1..=5).collect();
        let downloader = OrderedDownloader::new(
            UnitFetcher::new(&source, 1, 1, EventSender::disconnected()),
            4,
        );

        assert!(downloader.download(&sequence, |_, _| {}).is_err());
        let log = source.log.lock().unwrap().clone();
        assert!(log.iter().all(|(p, _)| *p == 1), "log: {log:?}");
    }

    #[test]
    fn failed_first_body_does_not_block_pipeline() {
        let mut source = ScriptedSource::default();
        source.bodies.insert(2, svg_with_images(&[]));
        source.bodies.insert(3, svg_with_images(&[]));
        let downloader = OrderedDownloader::new(
            UnitFetcher::new(&source, 2, 1, EventSender::disconnected()),
            2,
        );

        let blanks = Mutex::new(Vec::new());
        downloader
            .download(&[1, 2, 3], |p, m| blanks.lock().unwrap().push((m.unit_index, p.is_blank())))
            .unwrap();
        let mut blanks = blanks.into_inner().unwrap();
        blanks.sort_unstable();
        assert_eq!(blanks, vec![(0, true), (1, false), (2, false)]);
    }
}
