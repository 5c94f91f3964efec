use serde::{Deserialize, Serialize};

/// Where the token counts of a measurement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// Both counts taken from the server's usage metadata.
    Reported,
    /// Both counts estimated from word counts.
    Estimated,
    /// One count reported, the other estimated.
    Partial,
}

impl TokenSource {
    pub fn from_flags(prompt_reported: bool, completion_reported: bool) -> Self {
        match (prompt_reported, completion_reported) {
            (true, true) => TokenSource::Reported,
            (false, false) => TokenSource::Estimated,
            _ => TokenSource::Partial,
        }
    }
}

/// Result of one streamed request/response cycle. Durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub prompt_tokens: u32,
    pub time_to_first_token: f64,
    pub completion_tokens: u32,
    pub total_duration: f64,
    pub prompt_speed: f64,
    pub completion_speed: f64,
    pub token_source: TokenSource,
}

impl Measurement {
    pub fn new(
        prompt_tokens: u32,
        time_to_first_token: f64,
        completion_tokens: u32,
        total_duration: f64,
        token_source: TokenSource,
    ) -> Self {
        Self {
            prompt_tokens,
            time_to_first_token,
            completion_tokens,
            total_duration,
            prompt_speed: prompt_speed(prompt_tokens, time_to_first_token),
            completion_speed: completion_speed(completion_tokens, total_duration, time_to_first_token),
            token_source,
        }
    }

    /// Seconds spent generating after the first token arrived.
    pub fn generation_duration(&self) -> f64 {
        (self.total_duration - self.time_to_first_token).max(0.0)
    }
}

/// Prompt-processing throughput in tokens/sec, 0 when TTFT is not positive.
pub fn prompt_speed(prompt_tokens: u32, ttft: f64) -> f64 {
    if ttft > 0.0 {
        prompt_tokens as f64 / ttft
    } else {
        0.0
    }
}

/// Generation throughput in tokens/sec, 0 when no time elapsed after TTFT.
pub fn completion_speed(completion_tokens: u32, total_duration: f64, ttft: f64) -> f64 {
    let generation = total_duration - ttft;
    if generation > 0.0 {
        completion_tokens as f64 / generation
    } else {
        0.0
    }
}

/// Token estimate used whenever the server omits usage: whitespace word count.
pub fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speeds_from_reference_measurement() {
        let m = Measurement::new(100, 2.0, 50, 5.0, TokenSource::Reported);
        assert_eq!(m.prompt_speed, 50.0);
        assert!((m.completion_speed - 16.666_666).abs() < 1e-3);
        assert_eq!(format!("{:.2}", m.completion_speed), "16.67");
        assert_eq!(m.generation_duration(), 3.0);
    }

    #[test]
    fn test_zero_ttft_yields_zero_prompt_speed() {
        let m = Measurement::new(100, 0.0, 50, 5.0, TokenSource::Reported);
        assert_eq!(m.prompt_speed, 0.0);
        assert_eq!(m.completion_speed, 10.0);
    }

    #[test]
    fn test_total_equal_to_ttft_yields_zero_completion_speed() {
        let m = Measurement::new(100, 2.0, 50, 2.0, TokenSource::Reported);
        assert_eq!(m.completion_speed, 0.0);
        assert_eq!(m.generation_duration(), 0.0);
    }

    #[test]
    fn test_degenerate_denominators_never_negative_or_nan() {
        for (ttft, total) in [(0.0, 0.0), (-1.0, 0.5), (3.0, 1.0), (f64::NAN, 1.0), (1.0, f64::NAN)] {
            let p = prompt_speed(10, ttft);
            let c = completion_speed(10, total, ttft);
            assert!(p >= 0.0 && p.is_finite(), "prompt speed {} for ttft {}", p, ttft);
            assert!(c >= 0.0 && c.is_finite(), "completion speed {} for {}/{}", c, total, ttft);
        }
    }

    #[test]
    fn test_zero_tokens_generated() {
        let m = Measurement::new(20, 1.0, 0, 1.5, TokenSource::Estimated);
        assert_eq!(m.completion_speed, 0.0);
    }

    #[test]
    fn test_estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("  one two\tthree\nfour  "), 4);
    }

    #[test]
    fn test_token_source_flags() {
        assert_eq!(TokenSource::from_flags(true, true), TokenSource::Reported);
        assert_eq!(TokenSource::from_flags(false, false), TokenSource::Estimated);
        assert_eq!(TokenSource::from_flags(true, false), TokenSource::Partial);
    }
}
