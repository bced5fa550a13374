//! 书籍目录信息（总页数、元信息）的提供方与缓存。

use crate::base_system::memo::Memo;
use crate::book_parser::meta::MetaInfo;

use super::models::PageNumber;

pub trait Catalog: Send + Sync {
    fn page_count(&self) -> anyhow::Result<PageNumber>;
    fn meta_info(&self) -> anyhow::Result<MetaInfo>;
}

/// 由配置直接提供的目录信息。
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    pub page_count: Option<PageNumber>,
    pub meta: MetaInfo,
}

impl Catalog for StaticCatalog {
    fn page_count(&self) -> anyhow::Result<PageNumber> {
        self.page_count
            .ok_or_else(|| anyhow::anyhow!("page count is unknown, set page_count in config or pass --page-count"))
    }

    fn meta_info(&self) -> anyhow::Result<MetaInfo> {
        Ok(self.meta.clone())
    }
}

/// 每个查询只实际执行一次；并发调用者等待同一次查询，失败不缓存。
pub struct CachedCatalog<C> {
    inner: C,
    page_count: Memo<PageNumber>,
    meta: Memo<MetaInfo>,
}

impl<C: Catalog> CachedCatalog<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            page_count: Memo::new(),
            meta: Memo::new(),
        }
    }
}

impl<C: Catalog> Catalog for CachedCatalog<C> {
    fn page_count(&self) -> anyhow::Result<PageNumber> {
        self.page_count.get_or_try_init(|| self.inner.page_count())
    }

    fn meta_info(&self) -> anyhow::Result<MetaInfo> {
        self.meta.get_or_try_init(|| self.inner.meta_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl Catalog for Counting {
        fn page_count(&self) -> anyhow::Result<PageNumber> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                anyhow::bail!("temporarily unavailable");
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(120)
        }

        fn meta_info(&self) -> anyhow::Result<MetaInfo> {
            Ok(MetaInfo {
                title: "Biologie".into(),
                ..MetaInfo::default()
            })
        }
    }

    #[test]
    fn concurrent_lookups_run_once() {
        let catalog = CachedCatalog::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        std::thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| assert_eq!(catalog.page_count().unwrap(), 120));
            }
        });
        assert_eq!(catalog.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.meta_info().unwrap().title, "Biologie");
    }

    #[test]
    fn failed_lookup_is_retried_on_next_call() {
        let catalog = CachedCatalog::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        assert!(catalog.page_count().is_err());
        assert_eq!(catalog.page_count().unwrap(), 120);
        assert_eq!(catalog.page_count().unwrap(), 120);
        assert_eq!(catalog.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn static_catalog_requires_page_count() {
        let catalog = StaticCatalog::default();
        assert!(catalog.page_count().is_err());
        let catalog = StaticCatalog {
            page_count: Some(7),
            ..StaticCatalog::default()
        };
        assert_eq!(catalog.page_count().unwrap(), 7);
    }
}
