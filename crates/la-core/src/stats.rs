//! Running session counters and context-usage warnings.

use crate::backend::BackendTimings;

/// Context-window utilization thresholds that trigger a one-shot warning.
const WARN_AT_70: f64 = 0.70;
const WARN_AT_80: f64 = 0.80;

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_prompt_ms: f64,
    pub total_predict_ms: f64,
    /// Tokens occupying the context window after the latest completion.
    pub current_context_tokens: u32,
    pub context_window: u32,
    warned_70: bool,
    warned_80: bool,
}

impl SessionStats {
    pub fn new(context_window: u32) -> Self {
        Self {
            context_window,
            ..Default::default()
        }
    }

    /// Fold one completion's timings into the counters and return a
    /// utilization warning if a threshold was newly crossed. Each warning
    /// fires at most once for the life of the stats instance.
    pub fn record(&mut self, timings: &BackendTimings) -> Option<String> {
        self.total_input_tokens += u64::from(timings.prompt_tokens);
        self.total_output_tokens += u64::from(timings.predicted_tokens);
        self.total_cached_tokens += u64::from(timings.cached_tokens);
        self.total_prompt_ms += timings.prompt_ms;
        self.total_predict_ms += timings.predict_ms;
        self.current_context_tokens = timings.context_tokens;

        if self.context_window == 0 {
            return None;
        }

        let used = f64::from(self.current_context_tokens) / f64::from(self.context_window);
        if used >= WARN_AT_80 && !self.warned_80 {
            self.warned_80 = true;
            self.warned_70 = true;
            return Some(self.warning_text(80));
        }
        if used >= WARN_AT_70 && !self.warned_70 {
            self.warned_70 = true;
            return Some(self.warning_text(70));
        }
        None
    }

    fn warning_text(&self, percent: u32) -> String {
        format!(
            "Context usage above {}% ({} / {} tokens). Consider /compact.",
            percent, self.current_context_tokens, self.context_window
        )
    }

    pub fn context_utilization(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        f64::from(self.current_context_tokens) / f64::from(self.context_window)
    }
}
