/// Receives coarse progress from a running pipeline.
///
/// Reports are synchronous and cheap; implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u32, phase: &str);
}
