//! 目录拉取服务 - 业务能力层
//!
//! 只负责"翻页拉取课程和作业并过滤"，不关心选哪门课

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clients::LmsProvider;
use crate::error::{ApiError, CatalogError};
use crate::models::{Assignment, CatalogListing, Course, Page, PageCursor, Session};

/// 目录拉取服务
///
/// 职责：
/// - 聚合所有分页，直到 LMS 表示没有下一页
/// - 课程只保留当前用户为教师/助教且状态为 available 的
/// - 作业只保留已发布且未删除的
/// - 中途某页失败时返回已拿到的部分并附带警告
pub struct CatalogFetcher {
    provider: Arc<dyn LmsProvider>,
    max_pages: usize,
}

impl CatalogFetcher {
    pub fn new(provider: Arc<dyn LmsProvider>, max_pages: usize) -> Self {
        Self {
            provider,
            max_pages: max_pages.max(1),
        }
    }

    pub async fn list_courses(&self, session: &Session) -> Result<CatalogListing<Course>, CatalogError> {
        let mut collector = PageCollector::new("课程列表", self.max_pages);
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = self.provider.courses_page(session, cursor.as_ref()).await;
            match collector.absorb(page)? {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let listing = collector.finish(Course::is_gradable_by_user);
        info!(
            "📚 找到 {} 门可批改的课程 (共 {} 页)",
            listing.items.len(),
            listing.pages_fetched
        );
        Ok(listing)
    }

    pub async fn list_assignments(
        &self,
        session: &Session,
        course_id: &str,
    ) -> Result<CatalogListing<Assignment>, CatalogError> {
        let mut collector = PageCollector::new(format!("课程 {} 的作业列表", course_id), self.max_pages);
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = self
                .provider
                .assignments_page(session, course_id, cursor.as_ref())
                .await;
            match collector.absorb(page)? {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let listing = collector.finish(Assignment::is_listable);
        info!(
            "📝 [课程 {}] 找到 {} 个已发布的作业",
            course_id,
            listing.items.len()
        );
        Ok(listing)
    }
}

/// 分页累加器
struct PageCollector<T> {
    resource: String,
    max_pages: usize,
    items: Vec<T>,
    pages_fetched: usize,
    warning: Option<String>,
}

impl<T> PageCollector<T> {
    fn new(resource: impl Into<String>, max_pages: usize) -> Self {
        Self {
            resource: resource.into(),
            max_pages,
            items: Vec::new(),
            pages_fetched: 0,
            warning: None,
        }
    }

    /// 吸收一页结果，返回下一页游标；None 表示结束
    fn absorb(&mut self, page: Result<Page<T>, ApiError>) -> Result<Option<PageCursor>, CatalogError> {
        let page = match page {
            Ok(page) => page,
            Err(source) if self.pages_fetched == 0 => {
                return Err(CatalogError::FetchFailed {
                    resource: self.resource.clone(),
                    source,
                });
            }
            Err(e) => {
                let message = format!(
                    "{}第 {} 页拉取失败，只返回前 {} 页: {}",
                    self.resource,
                    self.pages_fetched + 1,
                    self.pages_fetched,
                    e
                );
                warn!("⚠️ {}", message);
                self.warning = Some(message);
                return Ok(None);
            }
        };

        self.pages_fetched += 1;
        debug!("{} 第 {} 页: {} 条", self.resource, self.pages_fetched, page.items.len());
        self.items.extend(page.items);

        match page.next {
            Some(_) if self.pages_fetched >= self.max_pages => {
                let message = format!("{}超过 {} 页，其余页已忽略", self.resource, self.max_pages);
                warn!("⚠️ {}", message);
                self.warning = Some(message);
                Ok(None)
            }
            next => Ok(next),
        }
    }

    fn finish(self, keep: impl Fn(&T) -> bool) -> CatalogListing<T> {
        CatalogListing {
            items: self.items.into_iter().filter(|item| keep(item)).collect(),
            pages_fetched: self.pages_fetched,
            warning: self.warning,
        }
    }
}
