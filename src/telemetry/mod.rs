//! Usage and latency telemetry for a session.
//!
//! [`Metrics::record`] takes one [`UsageSample`] per completed turn. It never
//! fails: anything missing or malformed in the usage block counts as zero.

use serde::Serialize;
use serde_json::Value;

/// Token and latency figures for one completed turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSample {
    pub input_text_tokens: u64,
    pub input_audio_tokens: u64,
    pub output_text_tokens: u64,
    pub output_audio_tokens: u64,
    pub cached_tokens: u64,
    pub cached_text_tokens: u64,
    pub cached_audio_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: Option<u64>,
}

/// Non-negative finite number, rounded. Anything else is absent.
fn non_negative(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.round() as u64)
}

fn count(value: Option<&Value>) -> u64 {
    non_negative(value).unwrap_or(0)
}

impl UsageSample {
    /// Extract a sample from a `response.usage` block and the optional
    /// externally reported latency.
    ///
    /// `input_tokens` / `output_tokens` are `{text, audio}` objects; a bare
    /// number is taken as text tokens. Per-modality cached counts come only from
    /// `input_tokens.cached_tokens_details`. The shared cached count uses
    /// `cache_creation_input_tokens`, falling back to `cache_read_input_tokens`.
    pub fn from_usage(usage: Option<&Value>, latency: Option<&Value>) -> Self {
        let mut sample = UsageSample {
            latency_ms: non_negative(latency),
            ..Default::default()
        };
        let Some(usage) = usage else {
            return sample;
        };

        let (text, audio) = split_modalities(usage.get("input_tokens"));
        sample.input_text_tokens = text;
        sample.input_audio_tokens = audio;

        let (text, audio) = split_modalities(usage.get("output_tokens"));
        sample.output_text_tokens = text;
        sample.output_audio_tokens = audio;

        let cached_details = usage
            .get("input_tokens")
            .and_then(|t| t.get("cached_tokens_details"));
        sample.cached_text_tokens = count(cached_details.and_then(|d| d.get("text")));
        sample.cached_audio_tokens = count(cached_details.and_then(|d| d.get("audio")));

        sample.cached_tokens = non_negative(usage.get("cache_creation_input_tokens"))
            .filter(|&n| n > 0)
            .or_else(|| non_negative(usage.get("cache_read_input_tokens")))
            .unwrap_or(0);
        sample.total_tokens = count(usage.get("total_tokens"));

        sample
    }
}

fn split_modalities(value: Option<&Value>) -> (u64, u64) {
    match value {
        Some(Value::Object(map)) => (count(map.get("text")), count(map.get("audio"))),
        other => (count(other), 0),
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub min: u64,
    pub avg: u64,
    pub max: u64,
    pub p90: u64,
}

/// p90 by nearest rank over the ascending samples: index `floor(n * 0.9) - 1`,
/// clamped to the sequence. No interpolation.
///
/// Small samples sit well below the top value:
///
/// | n  | index | `[100, 200, ...]` gives |
/// |----|-------|-------------------------|
/// | 1  | 0     | 100                     |
/// | 2  | 0     | 100 (the minimum)       |
/// | 3  | 1     | 200 (the median)        |
/// | 5  | 3     | 400                     |
/// | 10 | 8     | 900                     |
pub fn nearest_rank_p90(sorted: &[u64]) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = sorted.len() * 9 / 10;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

pub fn latency_stats(values: &[u64]) -> LatencyStats {
    if values.is_empty() {
        return LatencyStats::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let sum: u128 = sorted.iter().map(|&v| v as u128).sum();
    let avg = (sum as f64 / sorted.len() as f64).round() as u64;

    LatencyStats {
        min: sorted[0],
        avg,
        max: sorted[sorted.len() - 1],
        p90: nearest_rank_p90(&sorted),
    }
}

/// Running totals for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub turns: u64,
    pub input_text_tokens: u64,
    pub input_audio_tokens: u64,
    pub output_text_tokens: u64,
    pub output_audio_tokens: u64,
    pub cached_tokens: u64,
    pub cached_text_tokens: u64,
    pub cached_audio_tokens: u64,
    pub total_tokens: u64,
    /// Append-only, in arrival order
    pub latencies_ms: Vec<u64>,
    pub latency: LatencyStats,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: &UsageSample) {
        self.turns += 1;
        self.input_text_tokens = self.input_text_tokens.saturating_add(sample.input_text_tokens);
        self.input_audio_tokens = self.input_audio_tokens.saturating_add(sample.input_audio_tokens);
        self.output_text_tokens = self.output_text_tokens.saturating_add(sample.output_text_tokens);
        self.output_audio_tokens = self
            .output_audio_tokens
            .saturating_add(sample.output_audio_tokens);
        self.cached_tokens = self.cached_tokens.saturating_add(sample.cached_tokens);
        self.cached_text_tokens = self.cached_text_tokens.saturating_add(sample.cached_text_tokens);
        self.cached_audio_tokens = self
            .cached_audio_tokens
            .saturating_add(sample.cached_audio_tokens);
        self.total_tokens = self.total_tokens.saturating_add(sample.total_tokens);

        if let Some(latency) = sample.latency_ms {
            self.latencies_ms.push(latency);
            self.latency = latency_stats(&self.latencies_ms);
        }

        tracing::debug!(
            "[Telemetry] turn {} recorded: total {} tokens, latency {:?}",
            self.turns,
            self.total_tokens,
            sample.latency_ms
        );
    }

    /// Cached text tokens as a percentage of input text tokens.
    pub fn text_cache_hit_pct(&self) -> f64 {
        percent(self.cached_text_tokens, self.input_text_tokens)
    }

    /// Cached audio tokens as a percentage of input audio tokens.
    pub fn audio_cache_hit_pct(&self) -> f64 {
        percent(self.cached_audio_tokens, self.input_audio_tokens)
    }

    /// Read-only projection for the external reporting page, form-encoded.
    pub fn export_query(&self, model: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("turns", &self.turns.to_string())
            .append_pair("input_text", &self.input_text_tokens.to_string())
            .append_pair("input_audio", &self.input_audio_tokens.to_string())
            .append_pair("output_text", &self.output_text_tokens.to_string())
            .append_pair("output_audio", &self.output_audio_tokens.to_string())
            .append_pair("cached", &self.cached_tokens.to_string())
            .append_pair("total", &self.total_tokens.to_string())
            .append_pair("model", model)
            .append_pair("text_cache_hit", &format!("{:.1}", self.text_cache_hit_pct()))
            .append_pair("audio_cache_hit", &format!("{:.1}", self.audio_cache_hit_pct()))
            .append_pair("lat_min", &self.latency.min.to_string())
            .append_pair("lat_avg", &self.latency.avg.to_string())
            .append_pair("lat_max", &self.latency.max.to_string())
            .append_pair("lat_p90", &self.latency.p90.to_string())
            .finish()
    }

    pub fn summary(&self) -> String {
        format!(
            "turns {} | in text {} audio {} | out text {} audio {} | cached {} (text {:.1}%, audio {:.1}%) | total {} | latency min {} avg {} max {} p90 {} ms",
            self.turns,
            self.input_text_tokens,
            self.input_audio_tokens,
            self.output_text_tokens,
            self.output_audio_tokens,
            self.cached_tokens,
            self.text_cache_hit_pct(),
            self.audio_cache_hit_pct(),
            self.total_tokens,
            self.latency.min,
            self.latency.avg,
            self.latency.max,
            self.latency.p90
        )
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
