//! Lazy, page-at-a-time query results.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use crate::adapter::{Adapter, PageRequest, Record};
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::key::Key;
use crate::model::Registry;
use crate::query::Query;
use crate::types::Cursor;

/// Results of a query, fetched from the adapter one batch at a time.
///
/// Iterating may block on each page boundary. A failed fetch yields one
/// error and ends the iteration.
pub struct Resultset {
    adapter: Arc<dyn Adapter>,
    registry: Arc<Registry>,
    query: Query,
    batch_size: usize,
    cursor: Option<Cursor>,
    offset: usize,
    remaining: Option<usize>,
    buffer: VecDeque<Record>,
    done: bool,
}

impl Resultset {
    pub(crate) fn new(
        adapter: Arc<dyn Adapter>,
        registry: Arc<Registry>,
        query: Query,
        batch_size: usize,
        start: Option<Cursor>,
    ) -> Self {
        // a cursor already accounts for the offset
        let offset = if start.is_some() { 0 } else { query.skip() };
        let remaining = query.max_results();
        Self {
            adapter,
            registry,
            query,
            batch_size: batch_size.max(1),
            cursor: start,
            offset,
            remaining,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// The query being run.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Cursor after the last fetched page. Pass it to
    /// [`Session::query_from`](crate::Session::query_from) to resume.
    #[must_use]
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Groups the remaining results into pages, one per adapter round trip.
    #[must_use]
    pub fn pages(self) -> Pages {
        Pages { results: self }
    }

    /// Yields keys only, without loading entities.
    pub fn keys(mut self) -> impl Iterator<Item = CoreResult<Key>> {
        std::iter::from_fn(move || self.next_record().map(|r| r.map(|record| record.key)))
    }

    fn fetch_page(&mut self) -> CoreResult<bool> {
        if self.done {
            return Ok(false);
        }
        let limit = self
            .remaining
            .map_or(self.batch_size, |left| left.min(self.batch_size));
        if limit == 0 {
            self.done = true;
            return Ok(false);
        }

        let request = PageRequest {
            cursor: self.cursor.clone(),
            offset: self.offset,
            limit,
        };
        let response = match self.adapter.run_query(&self.query, &request) {
            Ok(response) => response,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        trace!(
            kind = self.query.kind().unwrap_or("*"),
            fetched = response.records.len(),
            more = response.more_results,
            "fetched query page"
        );

        self.offset = 0;
        if let Some(left) = self.remaining.as_mut() {
            *left = left.saturating_sub(response.records.len());
        }
        if response.end_cursor.is_some() {
            self.cursor = response.end_cursor;
        }
        self.done = !response.more_results
            || response.records.is_empty()
            || self.remaining == Some(0);
        let fetched = !response.records.is_empty();
        self.buffer.extend(response.records);
        Ok(fetched)
    }

    fn next_record(&mut self) -> Option<CoreResult<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            match self.fetch_page() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn load(&self, record: Record) -> CoreResult<Entity> {
        let model = match self.query.model() {
            Some(model) => Arc::clone(model),
            None => self.registry.lookup(record.key.kind())?,
        };
        model.load(record)
    }
}

impl Iterator for Resultset {
    type Item = CoreResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
            .map(|record| record.and_then(|record| self.load(record)))
    }
}

impl std::fmt::Debug for Resultset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resultset")
            .field("query", &self.query)
            .field("batch_size", &self.batch_size)
            .field("cursor", &self.cursor)
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// One batch of results.
#[derive(Debug)]
pub struct Page {
    /// Entities in query order.
    pub entities: Vec<Entity>,
    /// Cursor positioned after the last entity.
    pub cursor: Option<Cursor>,
}

/// Iterator over [`Page`]s of a [`Resultset`].
#[derive(Debug)]
pub struct Pages {
    results: Resultset,
}

impl Iterator for Pages {
    type Item = CoreResult<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.results.buffer.is_empty() {
            match self.results.fetch_page() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
        let records: Vec<Record> = self.results.buffer.drain(..).collect();
        let entities = records
            .into_iter()
            .map(|record| self.results.load(record))
            .collect::<CoreResult<Vec<_>>>();
        Some(entities.map(|entities| Page {
            entities,
            cursor: self.results.cursor.clone(),
        }))
    }
}
