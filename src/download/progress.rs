//! 进度上报与 CLI 进度条管理。
//!
//! 事件在独立线程中消费：下载进度按实际完成顺序推进，写入进度按序列顺序推进。

use std::collections::HashMap;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::{NoticeKind, PipelineEvent};

struct CliBars {
    _mp: MultiProgress,
    download_bar: ProgressBar,
    write_bar: ProgressBar,
}

impl CliBars {
    fn new(total: usize) -> Self {
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        let download_bar = mp.add(ProgressBar::new(total as u64));
        download_bar.set_style(style.clone());
        download_bar.set_prefix("页面下载");

        let write_bar = mp.add(ProgressBar::new(total as u64));
        write_bar.set_style(style);
        write_bar.set_prefix("页面写入");

        Self {
            _mp: mp,
            download_bar,
            write_bar,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSummary {
    pub downloaded: usize,
    pub written: usize,
    pub notices: HashMap<NoticeKind, usize>,
}

impl ProgressSummary {
    pub fn notice_count(&self, kind: NoticeKind) -> usize {
        self.notices.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_notices(&self) -> usize {
        self.notices.values().sum()
    }

    fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Downloaded(_) => self.downloaded += 1,
            PipelineEvent::Written { .. } => self.written += 1,
            PipelineEvent::Notice(n) => *self.notices.entry(n.kind).or_insert(0) += 1,
        }
    }
}

pub struct ProgressReporter {
    handle: JoinHandle<ProgressSummary>,
}

impl ProgressReporter {
    /// 启动事件消费线程。所有发送端释放后线程结束。
    pub fn spawn(
        rx: Receiver<PipelineEvent>,
        total: usize,
        show_bars: bool,
    ) -> std::io::Result<Self> {
        let handle = std::thread::Builder::new()
            .name("progress".into())
            .spawn(move || {
                let cli = (show_bars && total > 0).then(|| CliBars::new(total));
                let mut summary = ProgressSummary::default();
                for event in rx.iter() {
                    summary.apply(&event);
                    if let Some(cli) = cli.as_ref() {
                        match event {
                            PipelineEvent::Downloaded(_) => cli.download_bar.inc(1),
                            PipelineEvent::Written { .. } => cli.write_bar.inc(1),
                            PipelineEvent::Notice(_) => {}
                        }
                    }
                }
                if let Some(cli) = cli {
                    cli.download_bar.finish_and_clear();
                    cli.write_bar.finish_and_clear();
                }
                summary
            })?;
        Ok(Self { handle })
    }

    /// 等待事件线程结束并返回汇总。调用前须释放所有事件发送端。
    pub fn finish(self) -> ProgressSummary {
        self.handle.join().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel as channel;

    use crate::download::models::{EventSender, Notice, UnitMeta};

    #[test]
    fn summary_counts_every_event_kind() {
        let (tx, rx) = channel::unbounded();
        let reporter = ProgressReporter::spawn(rx, 2, false).unwrap();
        let events = EventSender::new(tx);
        let meta = UnitMeta {
            unit_index: 0,
            page: 4,
            total: 2,
            completion_ordinal: 1,
        };
        events.send(PipelineEvent::Downloaded(meta));
        events.send(PipelineEvent::Downloaded(UnitMeta {
            unit_index: 1,
            completion_ordinal: 2,
            ..meta
        }));
        events.send(PipelineEvent::Written {
            unit_index: 0,
            page: 4,
            total: 2,
        });
        events.notice(Notice::new(NoticeKind::ResourceMissing, 4, "failed to fetch image"));
        events.notice(Notice::new(NoticeKind::ResourceMissing, 5, "failed to fetch image"));
        events.notice(Notice::new(NoticeKind::RenderFailed, 5, "failed to render page"));
        drop(events);

        let summary = reporter.finish();
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.notice_count(NoticeKind::ResourceMissing), 2);
        assert_eq!(summary.notice_count(NoticeKind::RenderFailed), 1);
        assert_eq!(summary.notice_count(NoticeKind::FallbackFailed), 0);
        assert_eq!(summary.total_notices(), 3);
        let per_kind: usize = NoticeKind::ALL
            .iter()
            .map(|kind| summary.notice_count(*kind))
            .sum();
        assert_eq!(per_kind, summary.total_notices());
    }
}
