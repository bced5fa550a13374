//! 下载流水线的数据模型。
//!
//! 包含页面载荷、完成元信息、进度/告警事件等在下载线程与写入线程之间流转的结构。

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::Sender;
use tracing::warn;

/// 远端页面编号（用于拼接页面地址）。
pub type PageNumber = u32;
/// 页面在输出序列中的位置（从 0 开始），是唯一的装配顺序依据。
pub type UnitIndex = usize;
/// 页面正文中引用的子资源（`image` 元素的 href 值）。
pub type ResourceRef = String;
pub type ResourceTable = HashMap<ResourceRef, Vec<u8>>;

/// 一个页面的完整下载结果。
///
/// `body == None` 表示正文在重试耗尽后仍不可用，写入端输出空白页。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitPayload {
    pub body: Option<String>,
    pub resources: ResourceTable,
    /// 下载失败而被剔除的引用（按正文中出现的顺序），渲染器需为其替换占位图。
    pub missing: Vec<ResourceRef>,
    pub page: PageNumber,
}

impl UnitPayload {
    pub fn blank(page: PageNumber) -> Self {
        Self {
            body: None,
            resources: ResourceTable::new(),
            missing: Vec::new(),
            page,
        }
    }

    #[cfg(test)]
    pub fn is_blank(&self) -> bool {
        self.body.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitMeta {
    pub unit_index: UnitIndex,
    pub page: PageNumber,
    pub total: usize,
    /// 实际完成顺序（从 1 开始），只用于进度展示，不参与装配排序。
    pub completion_ordinal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    PageUnavailable,
    MalformedBody,
    ResourceMissing,
    RenderFailed,
    FallbackFailed,
}

impl NoticeKind {
    pub const ALL: [NoticeKind; 5] = [
        NoticeKind::PageUnavailable,
        NoticeKind::MalformedBody,
        NoticeKind::ResourceMissing,
        NoticeKind::RenderFailed,
        NoticeKind::FallbackFailed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            NoticeKind::PageUnavailable => "page-unavailable",
            NoticeKind::MalformedBody => "malformed-body",
            NoticeKind::ResourceMissing => "resource-missing",
            NoticeKind::RenderFailed => "render-failed",
            NoticeKind::FallbackFailed => "fallback-failed",
        }
    }
}

/// 非致命问题的结构化描述（消息 + 上下文）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub page: PageNumber,
    pub unit_index: Option<UnitIndex>,
    pub resource: Option<ResourceRef>,
    pub message: String,
    pub cause: Option<String>,
}

impl Notice {
    pub fn new(kind: NoticeKind, page: PageNumber, message: impl Into<String>) -> Self {
        Self {
            kind,
            page,
            unit_index: None,
            resource: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn at(mut self, unit_index: UnitIndex) -> Self {
        self.unit_index = Some(unit_index);
        self
    }

    pub fn resource(mut self, resource: impl Into<ResourceRef>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] 第 {} 页: {}", self.kind.label(), self.page, self.message)?;
        if let Some(res) = &self.resource {
            write!(f, " ({res})")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// 下载完成（按实际完成顺序）。
    Downloaded(UnitMeta),
    /// 写入完成（严格按序列顺序）。
    Written {
        unit_index: UnitIndex,
        page: PageNumber,
        total: usize,
    },
    Notice(Notice),
}

/// 事件通道的发送端，未连接时所有发送都是空操作。
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<Sender<PipelineEvent>>,
}

impl EventSender {
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    #[cfg(test)]
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notice(&self, notice: Notice) {
        warn!(target: "download", kind = notice.kind.label(), "{}", notice);
        self.send(PipelineEvent::Notice(notice));
    }
}
