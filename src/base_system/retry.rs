//! 有限次数的立即重试执行器。
//!
//! 约定：操作返回 `Ok(Some(v))` 表示成功，`Ok(None)` 表示瞬时失败（网络层错误，可重试），
//! `Err(e)` 表示非瞬时失败（响应异常/鉴权失效等），不重试、立即向上传播。
//! 重试之间不做退避等待。

use tracing::debug;

/// 最多调用 `attempts` 次（至少 1 次），返回第一次成功的值；全部瞬时失败时返回 `Ok(None)`。
///
/// 闭包参数为从 1 开始的尝试序号，仅用于日志。
pub fn retry_transient<T, E, F>(attempts: u32, mut op: F) -> Result<Option<T>, E>
where
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(value) = op(attempt)? {
            return Ok(Some(value));
        }
        if attempt < attempts {
            debug!(target: "fetch", attempt, attempts, "瞬时失败，立即重试");
        }
    }
    Ok(None)
}
