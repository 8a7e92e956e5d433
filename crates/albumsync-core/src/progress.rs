use std::cell::Cell;

/// Progress callback: overall percentage, 0..=100.
pub type ProgressCallback<'a> = dyn Fn(u8) + Send + Sync + 'a;

/// Percentage of the whole run completed.
///
/// `cursor` is the index of the first item of the batch in flight and
/// `batch_len` its length; the byte counters describe that batch's request.
/// A zero `bytes_total` counts as one byte so the result stays defined.
/// Once `cursor` reaches `total_items` (including an empty run) the result is 100.
pub fn overall_progress(
    cursor: usize,
    batch_len: usize,
    total_items: usize,
    bytes_loaded: u64,
    bytes_total: u64,
) -> u8 {
    if cursor >= total_items {
        return 100;
    }
    let fraction = bytes_loaded as f64 / bytes_total.max(1) as f64;
    let done = cursor as f64 + fraction * batch_len as f64;
    to_percent(done / total_items.max(1) as f64)
}

/// Percentage for a single upload or download.
pub fn single_transfer_progress(bytes_loaded: u64, bytes_total: u64) -> u8 {
    to_percent(bytes_loaded as f64 / bytes_total.max(1) as f64)
}

fn to_percent(ratio: f64) -> u8 {
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Forwards run progress to a callback, dropping repeats and regressions.
/// The starting point of each batch is always forwarded unless it regresses.
pub struct TransferReporter<'a> {
    inner: &'a ProgressCallback<'a>,
    last: Cell<Option<u8>>,
}

impl<'a> TransferReporter<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last: Cell::new(None),
        }
    }

    pub fn report(&self, percent: u8) {
        self.emit(percent, false);
    }

    fn emit(&self, percent: u8, allow_repeat: bool) {
        let skip = match self.last.get() {
            Some(last) => percent < last || (percent == last && !allow_repeat),
            None => false,
        };
        if skip {
            return;
        }
        self.last.set(Some(percent));
        (self.inner)(percent);
    }

    /// Coarse update before a batch starts sending.
    pub fn batch_started(&self, cursor: usize, batch_len: usize, total_items: usize) {
        self.emit(overall_progress(cursor, batch_len, total_items, 0, 1), true);
    }

    pub fn bytes(
        &self,
        cursor: usize,
        batch_len: usize,
        total_items: usize,
        bytes_loaded: u64,
        bytes_total: u64,
    ) {
        self.report(overall_progress(
            cursor,
            batch_len,
            total_items,
            bytes_loaded,
            bytes_total,
        ));
    }

    pub fn finish(&self) {
        self.report(100);
    }

    pub fn last(&self) -> Option<u8> {
        self.last.get()
    }
}
