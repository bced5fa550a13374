//! 书籍元信息与页码标签解析。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::models::PageNumber;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("page label {0} cannot be resolved")]
pub struct LabelError(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaInfo {
    pub title: String,
    pub sbnr: String,
    pub publisher: String,
    pub publisher_web: String,
    pub publisher_address: String,
    pub publisher_phone: String,
    pub publisher_mail: String,
    /// 每个物理页对应的印刷页码标签（下标 0 对应第 1 页）。
    pub page_labels: Option<Vec<String>>,
    /// 印刷页码 1 所在的物理页。
    pub first_page: Option<u32>,
}

impl MetaInfo {
    /// 把印刷页码标签换算为物理页号。
    ///
    /// 有 `page_labels` 时按标签表查找（只看 `-` 之前的部分）；
    /// 否则有 `first_page` 时，`U<n>` 表示物理页 n，纯数字标签按偏移换算
    /// （`/` 之后的内容忽略）；两者都没有时只接受纯数字。
    pub fn label_page(&self, label: &str) -> Result<PageNumber, LabelError> {
        let label = label.trim();
        if let Some(labels) = &self.page_labels {
            let key = label.split('-').next().unwrap_or(label);
            if let Some(pos) = labels.iter().position(|l| l == key) {
                return Ok(pos as PageNumber + 1);
            }
        } else if let Some(first) = self.first_page.filter(|f| *f > 0) {
            let key = label.split('/').next().unwrap_or(label);
            if let Some(rest) = key.strip_prefix('U') {
                if let Ok(page) = rest.parse::<PageNumber>() {
                    return Ok(page);
                }
            } else if let Ok(printed) = key.parse::<i64>() {
                let page = printed + i64::from(first) - 1;
                if let Ok(page) = PageNumber::try_from(page) {
                    return Ok(page);
                }
            }
        } else if !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(page) = label.parse::<PageNumber>() {
                return Ok(page);
            }
        }
        Err(LabelError(label.to_string()))
    }

    pub fn has_labels(&self) -> bool {
        self.page_labels.is_some() || self.first_page.is_some_and(|f| f > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_table_lookup_is_one_based() {
        let info = MetaInfo {
            page_labels: Some(vec!["I".into(), "II".into(), "1".into(), "2".into()]),
            ..MetaInfo::default()
        };
        assert_eq!(info.label_page("I"), Ok(1));
        assert_eq!(info.label_page("1"), Ok(3));
        assert_eq!(info.label_page("2-3"), Ok(4));
        assert_eq!(info.label_page("III"), Err(LabelError("III".into())));
    }

    #[test]
    fn first_page_offsets_numeric_labels() {
        let info = MetaInfo {
            first_page: Some(5),
            ..MetaInfo::default()
        };
        assert_eq!(info.label_page("1"), Ok(5));
        assert_eq!(info.label_page("10/11"), Ok(14));
        assert_eq!(info.label_page("U2"), Ok(2));
        assert!(info.label_page("Ux").is_err());
        assert!(info.label_page("-10").is_err());
    }

    #[test]
    fn without_labels_only_numbers_resolve() {
        let info = MetaInfo::default();
        assert!(!info.has_labels());
        assert_eq!(info.label_page("42"), Ok(42));
        assert!(info.label_page("4a").is_err());
        assert!(info.label_page("").is_err());
    }
}
