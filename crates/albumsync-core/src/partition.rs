use std::num::NonZeroUsize;

use crate::media::MediaItem;

/// One bounded group of items sent in a single request.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub items: &'a [MediaItem],
    pub start_offset: usize,
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Slice the next batch starting at `cursor`.
///
/// The returned cursor always advances by the full `batch_size`, even when
/// fewer items remained. An empty batch means the input is exhausted.
pub fn next_batch(
    all: &[MediaItem],
    cursor: usize,
    batch_size: NonZeroUsize,
) -> (Batch<'_>, usize) {
    let start = cursor.min(all.len());
    let end = cursor.saturating_add(batch_size.get()).min(all.len());
    let batch = Batch {
        items: &all[start..end],
        start_offset: cursor,
    };
    (batch, cursor.saturating_add(batch_size.get()))
}

/// Iterator over the non-empty batches of a list, in order.
pub struct Batches<'a> {
    all: &'a [MediaItem],
    cursor: usize,
    batch_size: NonZeroUsize,
}

impl<'a> Batches<'a> {
    pub fn new(all: &'a [MediaItem], batch_size: NonZeroUsize) -> Self {
        Self {
            all,
            cursor: 0,
            batch_size,
        }
    }
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (batch, cursor) = next_batch(self.all, self.cursor, self.batch_size);
        if batch.is_empty() {
            return None;
        }
        self.cursor = cursor;
        Some(batch)
    }
}
