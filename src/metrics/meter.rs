//! Running mean / last-value tracker for a scalar metric.

/// Tracks the current value and running average of a scalar metric.
///
/// Reset at the start of each epoch; updated once per logged step by the
/// owning loop. `update` must be called at least once after `reset` before
/// `avg` is read, otherwise the average is 0.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    val: f64,
    sum: f64,
    count: f64,
    avg: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all fields.
    pub fn reset(&mut self) {
        self.val = 0.0;
        self.sum = 0.0;
        self.count = 0.0;
        self.avg = 0.0;
    }

    /// Record `val` with weight `n` (typically the batch size).
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n as f64;
        self.avg = self.sum / self.count;
    }

    /// Most recently recorded value.
    pub fn val(&self) -> f64 {
        self.val
    }

    /// Weighted running average since the last reset.
    pub fn avg(&self) -> f64 {
        self.avg
    }

    /// Total weight recorded since the last reset.
    pub fn count(&self) -> f64 {
        self.count
    }
}
