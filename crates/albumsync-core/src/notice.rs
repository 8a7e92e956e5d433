/// User-facing notices raised by a run.
///
/// `error` is the blocking message for a run that could not start; `info`
/// is the single non-blocking summary at the end of a run.
pub trait Notifier: Send + Sync {
    fn error(&self, title: &str, message: &str);
    fn info(&self, title: &str, message: &str);
}

/// Sends notices to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, title: &str, message: &str) {
        tracing::error!("{}: {}", title, message);
    }

    fn info(&self, title: &str, message: &str) {
        tracing::info!("{}: {}", title, message);
    }
}
