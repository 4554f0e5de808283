//! Reporter trait for dependency injection
//!
//! Lets the build pipeline report progress without being coupled to a
//! particular terminal renderer.

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Probing", "Vendoring").
    fn section(&self, title: &str);

    /// An archive build has started for `tree`.
    fn building(&self, tree: &str);

    /// An archive was written.
    fn done(&self, archive: &str, detail: &str, size: Option<u64>);

    /// An archive already existed and the build was skipped.
    fn skipped(&self, archive: &str);

    /// A build failed. `kind` is the coarse error category.
    fn failed(&self, tree: &str, kind: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of a batch.
    fn summary(&self, built: usize, skipped: usize, failed: usize, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn building(&self, tree: &str) {
        (**self).building(tree);
    }
    fn done(&self, archive: &str, detail: &str, size: Option<u64>) {
        (**self).done(archive, detail, size);
    }
    fn skipped(&self, archive: &str) {
        (**self).skipped(archive);
    }
    fn failed(&self, tree: &str, kind: &str, reason: &str) {
        (**self).failed(tree, kind, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, built: usize, skipped: usize, failed: usize, elapsed_secs: f64) {
        (**self).summary(built, skipped, failed, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g. tests).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn building(&self, _: &str) {}
    fn done(&self, _: &str, _: &str, _: Option<u64>) {}
    fn skipped(&self, _: &str) {}
    fn failed(&self, _: &str, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: usize, _: f64) {}
}
