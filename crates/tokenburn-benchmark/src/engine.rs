use std::time::Instant;

use futures::StreamExt;
use tokenburn_core::{
    estimate_tokens, Measurement, Result, SamplingConfig, SystemPromptRotation, TokenBurnConfig,
    TokenBurnError, TokenSource,
};
use reqwest_eventsource::{Error as SourceError, Event};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ChatChunk, ChatClient, ChatCompletionRequest, ChatMessage, StreamOptions, Usage};
use crate::runner::BenchmarkEvent;

/// Where streamed tokens are forwarded and what interrupts the stream.
pub struct StreamObserver<'a> {
    pub cancel: &'a CancellationToken,
    pub events: &'a mpsc::Sender<BenchmarkEvent>,
}

/// Accumulates timing, text and usage as chunks arrive.
#[derive(Debug, Default)]
pub struct StreamTally {
    ttft: Option<f64>,
    text: String,
    usage: Option<Usage>,
}

impl StreamTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttft(&self) -> Option<f64> {
        self.ttft
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fold one chunk in; `elapsed` is seconds since the request was sent.
    /// Returns the chunk's content when it carried any.
    pub fn observe(&mut self, chunk: ChatChunk, elapsed: f64) -> Option<String> {
        if let Some(usage) = chunk.usage.clone() {
            self.usage = Some(usage);
        }

        let content = chunk.content().filter(|c| !c.is_empty())?.to_string();
        if self.ttft.is_none() {
            self.ttft = Some(elapsed);
        }
        self.text.push_str(&content);
        Some(content)
    }

    /// Build the measurement, estimating any count the server did not report.
    pub fn finish(self, prompt_text: &str, total_duration: f64) -> Measurement {
        let usage = self.usage.unwrap_or_default();
        let reported_prompt = usage.prompt_tokens;
        let reported_completion = usage.completion_tokens;

        let prompt_tokens = reported_prompt.unwrap_or_else(|| estimate_tokens(prompt_text));
        let completion_tokens = reported_completion.unwrap_or_else(|| estimate_tokens(&self.text));
        // No content at all: first token never came, so TTFT spans the whole request.
        let ttft = self.ttft.unwrap_or(total_duration);

        Measurement::new(
            prompt_tokens,
            ttft,
            completion_tokens,
            total_duration,
            TokenSource::from_flags(reported_prompt.is_some(), reported_completion.is_some()),
        )
    }
}

/// Times streamed completions for one model.
pub struct MeasurementEngine {
    client: ChatClient,
    model: String,
    sampling: SamplingConfig,
    rotation: SystemPromptRotation,
    warmup_system_prompt: String,
    warmup_prompt: String,
}

impl MeasurementEngine {
    pub fn new(client: ChatClient, model: impl Into<String>, config: &TokenBurnConfig) -> Self {
        Self {
            client,
            model: model.into(),
            sampling: config.sampling.clone(),
            rotation: SystemPromptRotation::new(config.run.system_prompts.clone()),
            warmup_system_prompt: config.run.warmup_system_prompt.clone(),
            warmup_prompt: config.run.warmup_prompt.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// System prompt sent with the most recent measured request.
    pub fn current_system_prompt(&self) -> Option<&str> {
        self.rotation.current()
    }

    /// One throwaway request so model loading does not land in the first measurement.
    pub async fn warmup(&self) -> Result<Measurement> {
        info!(model = %self.model, "Warming up model");
        let request = self.request(&self.warmup_system_prompt, &self.warmup_prompt);
        self.run_stream(&request, &self.warmup_prompt, None).await
    }

    pub async fn measure(&mut self, prompt: &str, rotate: bool) -> Result<Measurement> {
        let system = self.system_prompt(rotate);
        let request = self.request(&system, prompt);
        self.run_stream(&request, prompt, None).await
    }

    /// Like [`measure`](Self::measure), forwarding tokens and honouring cancellation.
    pub async fn measure_observed(
        &mut self,
        prompt: &str,
        rotate: bool,
        observer: StreamObserver<'_>,
    ) -> Result<Measurement> {
        if observer.cancel.is_cancelled() {
            return Err(TokenBurnError::Cancelled);
        }
        let system = self.system_prompt(rotate);
        let request = self.request(&system, prompt);
        self.run_stream(&request, prompt, Some(&observer)).await
    }

    fn system_prompt(&mut self, rotate: bool) -> String {
        if rotate {
            self.rotation.rotate().to_string()
        } else {
            self.rotation.current_or_rotate()
        }
    }

    fn request(&self, system: &str, user: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            max_tokens: self.sampling.max_tokens,
            seed: self.sampling.seed,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        }
    }

    async fn run_stream(
        &self,
        request: &ChatCompletionRequest,
        prompt_text: &str,
        observer: Option<&StreamObserver<'_>>,
    ) -> Result<Measurement> {
        let started = Instant::now();
        let mut source = self.client.stream_chat(request)?;
        let mut tally = StreamTally::new();
        let mut opened = false;

        loop {
            let next = match observer {
                Some(obs) => tokio::select! {
                    biased;
                    _ = obs.cancel.cancelled() => return Err(TokenBurnError::Cancelled),
                    next = source.next() => next,
                },
                None => source.next().await,
            };

            match next {
                None | Some(Err(SourceError::StreamEnded)) => break,
                Some(Ok(Event::Open)) => opened = true,
                Some(Ok(Event::Message(message))) => {
                    if message.data == "[DONE]" {
                        break;
                    }
                    if let Err(e) = handle_payload(&message.data, &mut tally, started, observer).await {
                        source.close();
                        return Err(e);
                    }
                }
                Some(Err(e)) => {
                    source.close();
                    return Err(stream_error(e, opened).await);
                }
            }
        }
        source.close();

        let total = started.elapsed().as_secs_f64();
        debug!(chars = tally.text().len(), total, "Stream finished");
        Ok(tally.finish(prompt_text, total))
    }
}

async fn stream_error(err: SourceError, opened: bool) -> TokenBurnError {
    match err {
        SourceError::InvalidStatusCode(status, resp) => {
            let body = resp.text().await.unwrap_or_default();
            TokenBurnError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            }
        }
        SourceError::Transport(e) if opened => TokenBurnError::Http(format!("stream interrupted: {}", e)),
        SourceError::Transport(e) => TokenBurnError::Http(e.to_string()),
        SourceError::InvalidContentType(content_type, _) => TokenBurnError::Protocol(format!(
            "expected an event stream, got {}",
            content_type.to_str().unwrap_or("a non-text content type")
        )),
        other => TokenBurnError::Protocol(other.to_string()),
    }
}

async fn handle_payload(
    payload: &str,
    tally: &mut StreamTally,
    started: Instant,
    observer: Option<&StreamObserver<'_>>,
) -> Result<()> {
    let chunk: ChatChunk = serde_json::from_str(payload).map_err(|e| {
        TokenBurnError::Protocol(format!(
            "malformed stream chunk: {} - {}",
            e,
            payload.chars().take(200).collect::<String>()
        ))
    })?;

    if let Some(error) = &chunk.error {
        return Err(TokenBurnError::Protocol(format!("server reported error: {}", error)));
    }

    let first = tally.ttft().is_none();
    let Some(content) = tally.observe(chunk, started.elapsed().as_secs_f64()) else {
        return Ok(());
    };

    if let Some(obs) = observer {
        if first {
            if let Some(ttft) = tally.ttft() {
                let _ = obs.events.send(BenchmarkEvent::FirstToken { ttft }).await;
            }
        }
        let _ = obs.events.send(BenchmarkEvent::Token { content }).await;
    }
    Ok(())
}
