//! 有序写入端：独立写入线程持有重排缓冲区，严格按序列位置提交页面。
//!
//! 下载线程调用 `ingest` 只是把页面投递到通道中，立即返回；
//! 写入线程负责缓冲、按序渲染、失败时回退光栅化，最后调用渲染器收尾。

use std::thread::JoinHandle;

use crossbeam_channel::{self as channel, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{
    EventSender, Notice, NoticeKind, PageNumber, PipelineEvent, UnitIndex, UnitPayload,
};
use super::reorder::{Insert, ReorderBuffer};
use crate::book_parser::renderer::{RenderError, Renderer};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer already stopped")]
    Closed,
    #[error("writer stopped after {written} of {total} pages")]
    Incomplete { written: usize, total: usize },
    #[error("failed to write blank page {page}: {source}")]
    Blank {
        page: PageNumber,
        #[source]
        source: RenderError,
    },
    #[error("failed to finalize output: {0}")]
    Finalize(#[source] RenderError),
    #[error("spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("writer thread panicked")]
    Panicked,
}

enum Msg {
    Unit(UnitIndex, UnitPayload),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Draining,
    Finalizing,
    Done,
}

pub struct PageWriter<O> {
    tx: Sender<Msg>,
    handle: Option<JoinHandle<Result<O, WriterError>>>,
}

impl<O: Send + 'static> PageWriter<O> {
    /// 启动写入线程。`total` 为序列长度，写入端只接受 `0..total` 的位置。
    pub fn spawn<R>(renderer: R, total: usize, events: EventSender) -> Result<Self, WriterError>
    where
        R: Renderer<Output = O> + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("page-writer".into())
            .spawn(move || run(renderer, total, rx, events))
            .map_err(WriterError::Spawn)?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// 投递一个页面，从不阻塞。写入线程已退出时返回 `Closed`。
    pub fn ingest(&self, unit_index: UnitIndex, payload: UnitPayload) -> Result<(), WriterError> {
        self.tx
            .send(Msg::Unit(unit_index, payload))
            .map_err(|_| WriterError::Closed)
    }

    /// 通知不再有新页面，等待写入线程排空缓冲区并收尾。
    pub fn finish(mut self) -> Result<O, WriterError> {
        let _ = self.tx.send(Msg::End);
        let handle = self.handle.take().ok_or(WriterError::Closed)?;
        handle.join().map_err(|_| WriterError::Panicked)?
    }
}

fn run<R: Renderer>(
    mut renderer: R,
    total: usize,
    rx: Receiver<Msg>,
    events: EventSender,
) -> Result<R::Output, WriterError> {
    let mut buffer = ReorderBuffer::new(total);
    let mut state = WriterState::Idle;

    for msg in rx.iter() {
        let (unit_index, payload) = match msg {
            Msg::Unit(i, p) => (i, p),
            Msg::End => break,
        };
        match buffer.insert(unit_index, payload) {
            Insert::Buffered => {}
            rejected => {
                warn!(target: "writer", unit_index, total, outcome = ?rejected, "忽略重复或越界的页面");
                continue;
            }
        }
        if state == WriterState::Idle {
            state = WriterState::Draining;
            debug!(target: "writer", ?state, "开始写入");
        }
        while let Some((index, payload)) = buffer.pop_ready() {
            write_unit(&mut renderer, index, payload, total, &events)?;
        }
    }

    if !buffer.is_complete() {
        warn!(
            target: "writer",
            written = buffer.next_expected(),
            total,
            buffered = buffer.len(),
            "写入未完成即停止"
        );
        return Err(WriterError::Incomplete {
            written: buffer.next_expected(),
            total,
        });
    }

    state = WriterState::Finalizing;
    debug!(target: "writer", ?state, peak_buffered = buffer.peak(), "所有页面已写入");
    let output = renderer.finalize().map_err(WriterError::Finalize)?;
    state = WriterState::Done;
    debug!(target: "writer", ?state, "写入端结束");
    Ok(output)
}

fn write_unit<R: Renderer>(
    renderer: &mut R,
    unit_index: UnitIndex,
    payload: UnitPayload,
    total: usize,
    events: &EventSender,
) -> Result<(), WriterError> {
    let page = payload.page;
    let blank = |renderer: &mut R| {
        renderer
            .blank_page(page)
            .map_err(|source| WriterError::Blank { page, source })
    };

    match payload.body.as_deref() {
        None => blank(renderer)?,
        Some(body) => {
            if let Err(e) = renderer.render(page, body, &payload.resources, &payload.missing) {
                events.notice(
                    Notice::new(NoticeKind::RenderFailed, page, "failed to render page, rasterizing")
                        .at(unit_index)
                        .cause(e),
                );
                let (width, height) = renderer.page_size();
                let fallback = renderer
                    .raster_fallback(body, &payload.resources, width, height)
                    .and_then(|raster| renderer.commit_raster(page, raster, width, height));
                if let Err(e) = fallback {
                    events.notice(
                        Notice::new(NoticeKind::FallbackFailed, page, "failed to rasterize page")
                            .at(unit_index)
                            .cause(e),
                    );
                    blank(renderer)?;
                }
            }
        }
    }
    drop(payload);

    info!(target: "writer", "Wrote page {}/{} {}", unit_index + 1, total, page);
    events.send(PipelineEvent::Written {
        unit_index,
        page,
        total,
    });
    Ok(())
}
