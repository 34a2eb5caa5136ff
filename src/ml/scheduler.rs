// ============================================================
// Layer 5 — Learning Rate Schedule
// ============================================================
// BERT warmup-linear schedule over the whole run:
//
//   x = step / t_total
//   factor(x) = x / warmup                     if x < warmup
//             = max((x - 1) / (warmup - 1), 0) otherwise
//
//   lr(step) = base_lr * factor
//
// Linear ramp from 0 to base_lr over the first `warmup` fraction
// of steps, then linear decay back to 0 at t_total.

#[derive(Debug, Clone)]
pub struct WarmupLinear {
    step:    usize,
    base_lr: f64,
    warmup:  f64,
    t_total: usize,
}

impl WarmupLinear {
    pub fn new(base_lr: f64, warmup: f64, t_total: usize) -> Self {
        tracing::info!(
            "Total iters: {} | warm-up iters: {}",
            t_total,
            (t_total as f64 * warmup) as usize
        );
        Self { step: 0, base_lr, warmup, t_total }
    }

    /// Learning rate for the current step
    pub fn current_lr(&self) -> f64 {
        self.base_lr * self.factor()
    }

    /// Advance one optimiser step
    pub fn step(&mut self) {
        self.step += 1;
    }

    fn factor(&self) -> f64 {
        if self.t_total == 0 {
            return 1.0;
        }
        let x = self.step as f64 / self.t_total as f64;
        if x < self.warmup {
            x / self.warmup
        } else if self.warmup >= 1.0 {
            1.0
        } else {
            ((x - 1.0) / (self.warmup - 1.0)).max(0.0)
        }
    }
}
