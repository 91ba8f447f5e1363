/// Dollars per million tokens used for the running estimate.
pub const DEFAULT_COST_PER_MILLION: f64 = 3.0;

/// Running token count for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub cost_per_million: f64,
}

impl Default for TokenUsage {
    fn default() -> Self {
        Self {
            total_tokens: 0,
            cost_per_million: DEFAULT_COST_PER_MILLION,
        }
    }
}

impl TokenUsage {
    pub fn add(&mut self, tokens: u64) {
        self.total_tokens += tokens;
    }

    pub fn cost(&self) -> f64 {
        self.total_tokens as f64 / 1_000_000.0 * self.cost_per_million
    }

    pub fn summary(&self) -> String {
        format!(
            "Total tokens: {}\nEstimated cost: ${:.4}",
            group_thousands(self.total_tokens),
            self.cost()
        )
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
