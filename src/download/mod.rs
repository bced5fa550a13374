//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`      ：数据模型（UnitPayload / UnitMeta / Notice / PipelineEvent）
//! - `source`      ：页面源接口与错误类型
//! - `unit_fetcher`：单页正文与资源下载
//! - `downloader`  ：有序并发下载
//! - `reorder`     ：乱序到达页面的重排缓冲
//! - `writer`      ：按序写入线程
//! - `catalog`     ：总页数与元信息
//! - `progress`    ：进度上报与 CLI 进度条
//! - `plan`        ：下载计划与主流程编排

pub mod catalog;
pub mod downloader;
pub(crate) mod gate;
pub mod models;
pub mod plan;
pub mod progress;
pub mod reorder;
pub mod source;
pub mod unit_fetcher;
pub mod writer;
