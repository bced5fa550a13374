//! 单页下载：正文 + 正文引用的子资源。
//!
//! 子资源在页内以固定的小并发（`RESOURCE_WORKERS`）拉取，避免单页请求过多压垮源站。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel as channel;
use tracing::debug;

use super::models::{
    EventSender, Notice, NoticeKind, PageNumber, ResourceRef, ResourceTable, UnitPayload,
};
use super::source::{FetchError, PageSource};
use crate::base_system::retry::retry_transient;
use crate::book_parser::svg_body::collect_resource_refs;

pub const RESOURCE_WORKERS: usize = 2;

pub struct UnitFetcher<S> {
    source: S,
    page_retries: u32,
    image_retries: u32,
    events: EventSender,
}

impl<S: PageSource> UnitFetcher<S> {
    pub fn new(source: S, page_retries: u32, image_retries: u32, events: EventSender) -> Self {
        Self {
            source,
            page_retries: page_retries.max(1),
            image_retries: image_retries.max(1),
            events,
        }
    }

    pub fn fetch(&self, page: PageNumber) -> Result<UnitPayload, FetchError> {
        let body = retry_transient(self.page_retries, |_| {
            self.source
                .fetch_body(page)
                .map(|b| b.filter(|s| !s.trim().is_empty()))
        })?;

        let Some(body) = body else {
            self.events.notice(Notice::new(
                NoticeKind::PageUnavailable,
                page,
                format!("failed to fetch page after {} attempts", self.page_retries),
            ));
            return Ok(UnitPayload::blank(page));
        };

        let refs = match collect_resource_refs(&body) {
            Ok(refs) => refs,
            Err(e) => {
                self.events.notice(
                    Notice::new(NoticeKind::MalformedBody, page, "page body is not valid svg")
                        .cause(e),
                );
                return Ok(UnitPayload::blank(page));
            }
        };

        let (resources, missing) = self.fetch_resources(page, &refs)?;
        for reference in &missing {
            self.events.notice(
                Notice::new(
                    NoticeKind::ResourceMissing,
                    page,
                    format!("failed to fetch image after {} attempts", self.image_retries),
                )
                .resource(reference.clone()),
            );
        }

        debug!(target: "fetch", page, resources = resources.len(), missing = missing.len(), "页面下载完成");
        Ok(UnitPayload {
            body: Some(body),
            resources,
            missing,
            page,
        })
    }

    fn fetch_resource(&self, page: PageNumber, reference: &str) -> Result<Option<Vec<u8>>, FetchError> {
        retry_transient(self.image_retries, |_| {
            self.source.fetch_resource(page, reference)
        })
    }

    fn fetch_resources(
        &self,
        page: PageNumber,
        refs: &[ResourceRef],
    ) -> Result<(ResourceTable, Vec<ResourceRef>), FetchError> {
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; refs.len()];
        if refs.len() == 1 {
            slots[0] = self.fetch_resource(page, &refs[0])?;
        } else if !refs.is_empty() {
            let (tx_jobs, rx_jobs) = channel::unbounded::<usize>();
            let (tx_res, rx_res) = channel::unbounded::<(usize, Option<Vec<u8>>)>();
            for slot in 0..refs.len() {
                let _ = tx_jobs.send(slot);
            }
            drop(tx_jobs);

            let abort = AtomicBool::new(false);
            let failure: Mutex<Option<FetchError>> = Mutex::new(None);
            let workers = RESOURCE_WORKERS.min(refs.len());

            std::thread::scope(|s| {
                for _ in 0..workers {
                    let rx = rx_jobs.clone();
                    let tx = tx_res.clone();
                    let abort = &abort;
                    let failure = &failure;
                    s.spawn(move || {
                        for slot in rx.iter() {
                            if abort.load(Ordering::Relaxed) {
                                return;
                            }
                            match self.fetch_resource(page, &refs[slot]) {
                                Ok(data) => {
                                    let _ = tx.send((slot, data));
                                }
                                Err(e) => {
                                    abort.store(true, Ordering::Relaxed);
                                    let mut guard = failure.lock().unwrap_or_else(|p| p.into_inner());
                                    guard.get_or_insert(e);
                                    return;
                                }
                            }
                        }
                    });
                }
            });
            drop(tx_res);

            if let Some(e) = failure.into_inner().unwrap_or_else(|p| p.into_inner()) {
                return Err(e);
            }
            for (slot, data) in rx_res.try_iter() {
                slots[slot] = data;
            }
        }

        let mut resources = ResourceTable::with_capacity(refs.len());
        let mut missing = Vec::new();
        for (reference, data) in refs.iter().zip(slots) {
            match data {
                Some(bytes) => {
                    resources.insert(reference.clone(), bytes);
                }
                None => missing.push(reference.clone()),
            }
        }
        Ok((resources, missing))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use crate::download::models::PipelineEvent;

    /// 内存数据源：记录每次调用，按预设脚本返回结果。
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pub bodies: HashMap<PageNumber, String>,
        /// 前 N 次正文请求返回瞬时失败。
        pub body_failures: HashMap<PageNumber, u32>,
        pub resources: HashMap<String, Vec<u8>>,
        pub fatal_resources: Vec<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PageSource for ScriptedSource {
        fn fetch_body(&self, page: PageNumber) -> Result<Option<String>, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            let prior = calls.iter().filter(|c| **c == format!("body:{page}")).count() as u32;
            calls.push(format!("body:{page}"));
            drop(calls);
            if prior < self.body_failures.get(&page).copied().unwrap_or(0) {
                return Ok(None);
            }
            Ok(self.bodies.get(&page).cloned())
        }

        fn fetch_resource(
            &self,
            page: PageNumber,
            reference: &str,
        ) -> Result<Option<Vec<u8>>, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("res:{page}:{reference}"));
            if self.fatal_resources.iter().any(|r| r == reference) {
                return Err(FetchError::UnexpectedStatus {
                    context: "failed to download image",
                    status: 403,
                });
            }
            Ok(self.resources.get(reference).cloned())
        }
    }

    pub(crate) fn svg_with_images(refs: &[&str]) -> String {
        let images: String = refs
            .iter()
            .map(|r| format!(r#"<image xlink:href="{r}" width="4" height="4"/>"#))
            .collect();
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="10" height="10">{images}</svg>"#
        )
    }

    fn notices(rx: &channel::Receiver<PipelineEvent>) -> Vec<crate::download::models::Notice> {
        rx.try_iter()
            .filter_map(|e| match e {
                PipelineEvent::Notice(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn absent_body_skips_resource_fetches() {
        let source = ScriptedSource::default();
        let (tx, rx) = channel::unbounded();
        let fetcher = UnitFetcher::new(&source, 3, 3, EventSender::new(tx));

        let payload = fetcher.fetch(7).unwrap();
        assert_eq!(payload, UnitPayload::blank(7));
        assert!(payload.resources.is_empty());
        assert_eq!(source.calls(), vec!["body:7", "body:7", "body:7"]);

        let notices = notices(&rx);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::PageUnavailable);
    }

    #[test]
    fn body_retry_recovers_transient_failures() {
        let mut source = ScriptedSource::default();
        source.bodies.insert(1, svg_with_images(&[]));
        source.body_failures.insert(1, 2);
        let fetcher = UnitFetcher::new(&source, 3, 1, EventSender::disconnected());

        let payload = fetcher.fetch(1).unwrap();
        assert!(payload.body.is_some());
        assert_eq!(source.calls().len(), 3);
    }

    #[test]
    fn missing_resource_is_dropped_and_reported() {
        let mut source = ScriptedSource::default();
        source
            .bodies
            .insert(2, svg_with_images(&["img/x.png", "img/y.png", "img/x.png"]));
        source.resources.insert("img/y.png".into(), vec![1, 2, 3]);
        let (tx, rx) = channel::unbounded();
        let fetcher = UnitFetcher::new(&source, 1, 2, EventSender::new(tx));

        let payload = fetcher.fetch(2).unwrap();
        assert!(!payload.resources.contains_key("img/x.png"));
        assert_eq!(payload.resources.get("img/y.png"), Some(&vec![1, 2, 3]));
        assert_eq!(payload.missing, vec!["img/x.png".to_string()]);

        let calls = source.calls();
        assert_eq!(calls.iter().filter(|c| *c == "res:2:img/x.png").count(), 2);
        assert_eq!(calls.iter().filter(|c| *c == "res:2:img/y.png").count(), 1);

        let notices = notices(&rx);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::ResourceMissing);
        assert_eq!(notices[0].resource.as_deref(), Some("img/x.png"));
    }

    /// 统计同时进行中的资源请求数。
    struct SlowResources {
        body: String,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fetched: Mutex<Vec<String>>,
    }

    impl PageSource for SlowResources {
        fn fetch_body(&self, _: PageNumber) -> Result<Option<String>, FetchError> {
            Ok(Some(self.body.clone()))
        }

        fn fetch_resource(
            &self,
            _: PageNumber,
            reference: &str,
        ) -> Result<Option<Vec<u8>>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            self.fetched.lock().unwrap().push(reference.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(reference.as_bytes().to_vec()))
        }
    }

    #[test]
    fn resource_fetches_stay_within_worker_limit() {
        let refs = ["a.png", "b.png", "c.png", "d.png", "e.png", "f.png"];
        let source = SlowResources {
            body: svg_with_images(&refs),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        };
        let fetcher = UnitFetcher::new(&source, 1, 1, EventSender::default());

        let payload = fetcher.fetch(9).unwrap();
        assert_eq!(payload.resources.len(), refs.len());
        assert!(payload.missing.is_empty());
        assert_eq!(payload.resources.get("c.png"), Some(&b"c.png".to_vec()));

        let peak = source.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= RESOURCE_WORKERS, "peak {peak}");
        let mut fetched = source.fetched.into_inner().unwrap();
        fetched.sort();
        assert_eq!(fetched, refs);
    }

    #[test]
    fn fatal_resource_error_propagates() {
        let mut source = ScriptedSource::default();
        source
            .bodies
            .insert(3, svg_with_images(&["img/a.png", "img/denied.png"]));
        source.resources.insert("img/a.png".into(), vec![0]);
        source.fatal_resources.push("img/denied.png".into());
        let fetcher = UnitFetcher::new(&source, 1, 5, EventSender::disconnected());

        let err = fetcher.fetch(3).unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStatus { status: 403, .. }));
        let denied = source
            .calls()
            .iter()
            .filter(|c| *c == "res:3:img/denied.png")
            .count();
        assert_eq!(denied, 1);
    }

    #[test]
    fn malformed_body_becomes_blank_unit() {
        let mut source = ScriptedSource::default();
        source.bodies.insert(4, "<svg><g></svg>".into());
        let (tx, rx) = channel::unbounded();
        let fetcher = UnitFetcher::new(&source, 1, 1, EventSender::new(tx));

        let payload = fetcher.fetch(4).unwrap();
        assert!(payload.is_blank());
        assert_eq!(notices(&rx)[0].kind, NoticeKind::MalformedBody);
    }
}
