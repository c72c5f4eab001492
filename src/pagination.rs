use std::any::type_name;
use std::future::Future;

use anyhow::{bail, Context, Result};
use sct_domain::Page;
use tracing::{event, trace_span, Instrument, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationInput {
    /// 0-based
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagedFetch<T> {
    /// everything in front of the stop marker, in page order
    pub items: Vec<T>,
    pub pages_fetched: u32,
    pub stop_marker_found: bool,
}

/// Walks the pages from 0 until an item matches `is_stop_marker`, the last page is reached,
/// or `max_pages` pages have been read (an error: the feed is longer than we are willing to walk).
///
/// Pages behind the one carrying the stop marker are never requested.
pub async fn fetch_pages_until<T, F, Fut, P>(mut fetch_page: F, mut is_stop_marker: P, max_pages: u32) -> Result<PagedFetch<T>>
where
    F: FnMut(PaginationInput) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
    P: FnMut(&T) -> bool,
{
    let output_parameter_type_name = type_name::<T>();
    let span = trace_span!("pagination");

    async move {
        event!(Level::TRACE, "Start downloading pages of type {}", output_parameter_type_name);

        let mut items = Vec::new();
        let mut current_input = PaginationInput { page: 0 };

        loop {
            if current_input.page >= max_pages {
                bail!("Stop marker not found within {} pages", max_pages);
            }

            event!(Level::DEBUG, "Fetching page {}", current_input.page);
            let page = fetch_page(current_input)
                .await
                .with_context(|| format!("Failed to fetch page {}", current_input.page))?;
            let pages_fetched = current_input.page + 1;

            if let Some(index) = page.content.iter().position(&mut is_stop_marker) {
                event!(Level::DEBUG, "Found stop marker at index {} of page {}", index, current_input.page);
                items.extend(page.content.into_iter().take(index));
                return Ok(PagedFetch {
                    items,
                    pages_fetched,
                    stop_marker_found: true,
                });
            }

            let is_last = page.last;
            items.extend(page.content);

            if is_last {
                event!(Level::TRACE, "Done downloading all {} pages", pages_fetched);
                return Ok(PagedFetch {
                    items,
                    pages_fetched,
                    stop_marker_found: false,
                });
            }

            current_input.page += 1;
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn pages() -> Vec<Page<u32>> {
        vec![
            Page::new(vec![9, 8, 7], false),
            Page::new(vec![6, 5, 4], false),
            Page::new(vec![3, 2, 1], true),
        ]
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stops_at_marker_without_requesting_later_pages() {
        let pages = pages();
        let requested = AtomicU32::new(0);

        let result = fetch_pages_until(
            |input| {
                requested.fetch_add(1, Ordering::SeqCst);
                let page = pages[input.page as usize].clone();
                async move { Ok::<_, anyhow::Error>(page) }
            },
            |item| *item == 5,
            100,
        )
        .await
        .unwrap();

        assert_eq!(result.items, vec![9, 8, 7, 6]);
        assert_eq!(result.pages_fetched, 2);
        assert!(result.stop_marker_found);
        assert_eq!(requested.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_marker_on_first_position_yields_nothing() {
        let pages = pages();

        let result = fetch_pages_until(|input| futures::future::ready(Ok(pages[input.page as usize].clone())), |item| *item == 9, 100)
            .await
            .unwrap();

        assert!(result.items.is_empty());
        assert_eq!(result.pages_fetched, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_walks_to_last_page_without_marker() {
        let pages = pages();

        let result = fetch_pages_until(|input| futures::future::ready(Ok(pages[input.page as usize].clone())), |_| false, 100)
            .await
            .unwrap();

        assert_eq!(result.items, vec![9, 8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(result.pages_fetched, 3);
        assert!(!result.stop_marker_found);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_page_limit_is_an_error() {
        let pages = pages();

        let result = fetch_pages_until(|input| futures::future::ready(Ok(pages[input.page as usize].clone())), |_| false, 2).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_page_aborts() {
        let result = fetch_pages_until(
            |input| async move {
                if input.page == 1 {
                    anyhow::bail!("connection reset")
                }
                Ok::<_, anyhow::Error>(Page::new(vec![input.page], false))
            },
            |_| false,
            100,
        )
        .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to fetch page 1"));
    }
}
