use tokio::sync::mpsc::UnboundedSender;

/// Push-only receiver of human-readable progress lines. Must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Forwards progress lines into an unbounded channel.
pub struct ChannelProgress(UnboundedSender<String>);

impl ChannelProgress {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self(tx)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, message: &str) {
        if self.0.send(message.to_string()).is_err() {
            log::debug!("Progress receiver dropped: {}", message);
        }
    }
}
