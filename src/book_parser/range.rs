//! 页码范围：解析 `5-10,12,15-` 形式的范围串，并展开为去重后的页号序列。

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::meta::{LabelError, MetaInfo};
use crate::download::models::PageNumber;

static RE_RANGE: OnceLock<Regex> = OnceLock::new();

fn re_range() -> &'static Regex {
    RE_RANGE.get_or_init(|| {
        Regex::new(r"^\s*([^-\s]*)\s*(?:-\s*([^-\s]*)\s*)?$").expect("compile RE_RANGE")
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range syntax: {0:?}")]
    Syntax(String),
    #[error("range {0} has invalid from")]
    OpenFrom(usize),
    #[error("range {0} has invalid to")]
    OpenTo(usize),
    #[error("range {index} ends before it starts ({from}-{to})")]
    Reversed {
        index: usize,
        from: PageNumber,
        to: PageNumber,
    },
    #[error("invalid page number {0:?}")]
    InvalidNumber(String),
    #[error(transparent)]
    Label(#[from] LabelError),
}

/// 一段页码范围；某一侧为 `None` 表示开放端。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSpec {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl RangeSpec {
    #[cfg(test)]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.as_deref().unwrap_or("");
        let to = self.to.as_deref().unwrap_or("");
        if from == to {
            write!(f, "{from}")
        } else {
            write!(f, "{from}-{to}")
        }
    }
}

/// 解析范围串。单个值 `12` 等价于 `12-12`，空串表示整本书（返回空列表）。
pub fn parse_ranges(input: &str) -> Result<Vec<RangeSpec>, RangeError> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }

    input
        .split(',')
        .map(|part| {
            let caps = re_range()
                .captures(part)
                .ok_or_else(|| RangeError::Syntax(part.to_string()))?;
            let side = |i: usize| {
                caps.get(i)
                    .map(|m| m.as_str().to_string())
                    .filter(|s| !s.is_empty())
            };
            let from = side(1);
            let to = match caps.get(2) {
                Some(_) => side(2),
                None => from.clone(),
            };
            Ok(RangeSpec { from, to })
        })
        .collect()
}

/// 把范围展开为页号序列。
///
/// 开放的起点只允许出现在第一段（取 1），开放的终点只允许出现在最后一段（取总页数）；
/// 每个页号都截断到总页数以内，重复页号只保留第一次出现的位置。
/// `labels` 存在时范围两端按印刷页码标签解析。
pub fn resolve_ranges(
    ranges: &[RangeSpec],
    page_count: PageNumber,
    labels: Option<&MetaInfo>,
) -> Result<Vec<PageNumber>, RangeError> {
    let whole = [RangeSpec::default()];
    let ranges = if ranges.is_empty() { &whole[..] } else { ranges };

    let bound = |raw: Option<&str>| -> Result<Option<PageNumber>, RangeError> {
        let Some(raw) = raw else { return Ok(None) };
        match labels {
            Some(info) => Ok(Some(info.label_page(raw)?)),
            None => raw
                .trim()
                .parse::<PageNumber>()
                .map(Some)
                .map_err(|_| RangeError::InvalidNumber(raw.to_string())),
        }
    };

    let mut seen = HashSet::new();
    let mut pages = Vec::new();
    let last = ranges.len() - 1;
    for (index, range) in ranges.iter().enumerate() {
        let from = bound(range.from.as_deref())?;
        let to = bound(range.to.as_deref())?;
        if from.is_none() && index != 0 {
            return Err(RangeError::OpenFrom(index + 1));
        }
        if to.is_none() && index != last {
            return Err(RangeError::OpenTo(index + 1));
        }
        let from = from.unwrap_or(1).max(1);
        let to = to.unwrap_or(page_count);
        if to < from {
            // 空书的整本范围 1-0 不算错误
            if range.from.is_none() && range.to.is_none() {
                continue;
            }
            return Err(RangeError::Reversed {
                index: index + 1,
                from,
                to,
            });
        }
        for n in from..=to {
            let page = page_count.min(n);
            if seen.insert(page) {
                pages.push(page);
            }
            if n >= page_count {
                break;
            }
        }
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(input: &str, count: PageNumber) -> Result<Vec<PageNumber>, RangeError> {
        resolve_ranges(&parse_ranges(input)?, count, None)
    }

    #[test]
    fn parses_mixed_ranges() {
        let ranges = parse_ranges("5-10, 12,15-").unwrap();
        assert_eq!(
            ranges,
            vec![
                RangeSpec::new("5", "10"),
                RangeSpec::new("12", "12"),
                RangeSpec {
                    from: Some("15".into()),
                    to: None
                },
            ]
        );
        assert_eq!(ranges[0].to_string(), "5-10");
        assert_eq!(ranges[1].to_string(), "12");
        assert!(parse_ranges("").unwrap().is_empty());
        assert!(matches!(parse_ranges("1-2-3"), Err(RangeError::Syntax(_))));
    }

    #[test]
    fn resolves_open_ends_and_clamps() {
        assert_eq!(resolve("5-7,12,15-", 17).unwrap(), vec![5, 6, 7, 12, 15, 16, 17]);
        assert_eq!(resolve("-3", 10).unwrap(), vec![1, 2, 3]);
        assert_eq!(resolve("", 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(resolve("8-20", 10).unwrap(), vec![8, 9, 10]);
        assert_eq!(resolve("", 0).unwrap(), Vec::<PageNumber>::new());
    }

    #[test]
    fn duplicates_keep_first_occurrence_order() {
        assert_eq!(resolve("3-5,1-4", 10).unwrap(), vec![3, 4, 5, 1, 2]);
    }

    #[test]
    fn rejects_misplaced_open_ends_and_bad_numbers() {
        assert_eq!(resolve("1-2,-5", 10), Err(RangeError::OpenFrom(2)));
        assert_eq!(resolve("3-,5", 10), Err(RangeError::OpenTo(1)));
        assert!(matches!(resolve("7-3", 10), Err(RangeError::Reversed { index: 1, .. })));
        assert_eq!(resolve("x-3", 10), Err(RangeError::InvalidNumber("x".into())));
    }

    #[test]
    fn labels_are_translated_before_expansion() {
        let info = MetaInfo {
            first_page: Some(3),
            ..MetaInfo::default()
        };
        let ranges = parse_ranges("U1-U2,1-2").unwrap();
        assert_eq!(resolve_ranges(&ranges, 20, Some(&info)).unwrap(), vec![1, 2, 3, 4]);
        let bad = parse_ranges("zz").unwrap();
        assert!(matches!(
            resolve_ranges(&bad, 20, Some(&info)),
            Err(RangeError::Label(_))
        ));
    }
}
