//! The normalization pipeline.
//!
//! Upstream bytes → [`SseParser`] → [`extract`] → [`PrefixFilter`] →
//! [`encode_frame`]. The pipeline is pull-driven: a new upstream chunk is only
//! read once every frame derived from the previous one has been taken by the
//! consumer. Dropping the output stream drops the upstream body with it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use tokio::time::{timeout_at, Instant};

use super::delta::{extract, DeltaStep};
use super::encode::encode_frame;
use super::filter::{FilterState, PrefixFilter, DEFAULT_PREFIX_SKIP};
use super::sse::{SseEvent, SseParser, DEFAULT_MAX_BUFFERED_BYTES};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::upstream::{CompletionRequest, ProviderAdapter, UpstreamBody, UpstreamRequester};

/// Normalized downstream stream: encoded SSE frames, or the error that ended it.
pub type NormalizedStream = BoxStream<'static, Result<Bytes>>;

/// Knobs for one normalization.
#[derive(Debug, Clone)]
pub struct NormalizerOptions {
    pub prefix_skip: u32,
    pub max_duration: Duration,
    pub max_buffered_bytes: usize,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            prefix_skip: DEFAULT_PREFIX_SKIP,
            max_duration: Duration::from_secs(60),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }
}

impl From<&StreamConfig> for NormalizerOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            prefix_skip: config.prefix_skip,
            max_duration: config.max_duration(),
            max_buffered_bytes: config.max_buffered_bytes,
        }
    }
}

/// Opens an upstream stream and normalizes it.
///
/// Holds no per-stream state: every [`StreamNormalizer::open`] builds its
/// own parser and filter state, so one normalizer can serve concurrent
/// requests.
#[derive(Clone)]
pub struct StreamNormalizer {
    requester: UpstreamRequester,
    options: NormalizerOptions,
}

impl StreamNormalizer {
    pub fn new(
        client: Client,
        adapter: Arc<dyn ProviderAdapter>,
        options: NormalizerOptions,
    ) -> Self {
        Self {
            requester: UpstreamRequester::new(client, adapter),
            options,
        }
    }

    /// Dispatch `request` and return the normalized stream.
    ///
    /// The wall-clock ceiling starts here and covers both the request and
    /// the whole body.
    pub async fn open(&self, request: &CompletionRequest) -> Result<NormalizedStream> {
        let deadline = Instant::now() + self.options.max_duration;

        let upstream = match timeout_at(deadline, self.requester.send(request)).await {
            Ok(upstream) => upstream?,
            Err(_) => {
                tracing::warn!(
                    provider = %self.requester.adapter().name(),
                    max_duration = ?self.options.max_duration,
                    "Upstream did not answer before the deadline"
                );
                return Err(Error::Timeout(self.options.max_duration));
            }
        };

        Ok(normalize(
            upstream,
            Arc::clone(self.requester.adapter()),
            &self.options,
            deadline,
        ))
    }
}

/// Normalize an already-open upstream body.
pub fn normalize(
    upstream: UpstreamBody,
    adapter: Arc<dyn ProviderAdapter>,
    options: &NormalizerOptions,
    deadline: Instant,
) -> NormalizedStream {
    let pipeline = Pipeline {
        upstream,
        parser: SseParser::with_max_buffered(options.max_buffered_bytes),
        adapter,
        filter: PrefixFilter::new(options.prefix_skip),
        state: FilterState::new(),
        pending: VecDeque::new(),
        finished: false,
        deadline,
        max_duration: options.max_duration,
        frames: 0,
    };

    futures::stream::unfold(pipeline, |mut pipeline| async move {
        let frame = pipeline.next_frame().await?;
        Some((frame, pipeline))
    })
    .boxed()
}

struct Pipeline {
    upstream: UpstreamBody,
    parser: SseParser,
    adapter: Arc<dyn ProviderAdapter>,
    filter: PrefixFilter,
    state: FilterState,
    /// Output derived from the last chunk, not yet taken downstream.
    pending: VecDeque<Result<Bytes>>,
    /// No further upstream reads once set.
    finished: bool,
    deadline: Instant,
    max_duration: Duration,
    frames: usize,
}

impl Pipeline {
    async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.finished {
                return None;
            }

            match timeout_at(self.deadline, self.upstream.next()).await {
                Ok(Some(Ok(chunk))) => self.absorb(&chunk),
                Ok(Some(Err(e))) => {
                    tracing::error!(error = %e, provider = %self.adapter.name(), "Stream reading error");
                    self.fail(e);
                }
                Ok(None) => {
                    let mut events = Vec::new();
                    let parsed = self.parser.finish(&mut events);
                    self.handle_events(events);
                    if let Err(e) = parsed {
                        if !self.finished {
                            self.fail(e);
                        }
                    }
                    if !self.finished {
                        tracing::debug!(frames = self.frames, "Upstream closed without [DONE]");
                        self.finished = true;
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %self.adapter.name(),
                        frames = self.frames,
                        "Answer stream hit its deadline"
                    );
                    self.fail(Error::Timeout(self.max_duration));
                }
            }
        }
    }

    fn absorb(&mut self, chunk: &[u8]) {
        let mut events = Vec::new();
        let parsed = self.parser.feed(chunk, &mut events);
        self.handle_events(events);

        if let Err(e) = parsed {
            if !self.finished {
                self.fail(e);
            }
        }
    }

    fn handle_events(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                break;
            }
            match event {
                SseEvent::Event { data, .. } => self.handle_data(&data),
                SseEvent::ReconnectInterval(ms) => {
                    tracing::trace!(retry_ms = ms, "Upstream announced reconnect interval");
                }
            }
        }
    }

    fn handle_data(&mut self, data: &str) {
        match extract(data, self.adapter.as_ref()) {
            DeltaStep::Continue(fragment) => {
                if let Some(fragment) = self.filter.step(&mut self.state, fragment) {
                    self.frames += 1;
                    self.pending.push_back(Ok(encode_frame(&fragment)));
                }
            }
            DeltaStep::EndOfStream => {
                tracing::debug!(frames = self.frames, "Upstream sent [DONE]");
                self.finished = true;
            }
            DeltaStep::Fatal(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: Error) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                provider = %self.adapter.name(),
                frames = self.frames,
                "Consumer went away, releasing upstream connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::upstream::ChatCompletionsProvider;

    fn adapter() -> Arc<dyn ProviderAdapter> {
        Arc::new(ChatCompletionsProvider::new(
            "test",
            ProviderKind::OpenAi,
            "https://e.com",
            None,
        ))
    }

    fn body(chunks: Vec<&'static str>) -> UpstreamBody {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_frames_in_order() {
        let upstream = body(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let out: Vec<_> = normalize(upstream, adapter(), &NormalizerOptions::default(), far_deadline())
            .collect()
            .await;

        let frames: Vec<Bytes> = out.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"data: {\"text\":\"Hel\"}\n\n"),
                Bytes::from_static(b"data: {\"text\":\"lo\"}\n\n"),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_not_read_after_done() {
        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
            Err(Error::Transport("should never be read".to_string())),
        ])
        .boxed();

        let out: Vec<_> = normalize(upstream, adapter(), &NormalizerOptions::default(), far_deadline())
            .collect()
            .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Err(Error::Transport("connection reset".to_string())),
        ])
        .boxed();

        let out: Vec<_> = normalize(upstream, adapter(), &NormalizerOptions::default(), far_deadline())
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_oversized_event_fails_stream() {
        let options = NormalizerOptions {
            max_buffered_bytes: 16,
            ..NormalizerOptions::default()
        };
        let upstream = body(vec!["data: this line never ends and keeps growing"]);

        let out: Vec<_> = normalize(upstream, adapter(), &options, far_deadline())
            .collect()
            .await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(Error::MalformedEvent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_stalled_upstream() {
        let upstream = futures::stream::iter(vec![Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
        ))])
        .chain(futures::stream::pending())
        .boxed();

        let options = NormalizerOptions {
            max_duration: Duration::from_secs(5),
            ..NormalizerOptions::default()
        };
        let deadline = Instant::now() + options.max_duration;
        let out: Vec<_> = normalize(upstream, adapter(), &options, deadline)
            .collect()
            .await;

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(Error::Timeout(d)) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_prefix_skip_from_options() {
        let options = NormalizerOptions {
            prefix_skip: 0,
            ..NormalizerOptions::default()
        };
        let upstream = body(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Role:\\n\"}}]}\n\n",
        ]);
        let out: Vec<_> = normalize(upstream, adapter(), &options, far_deadline())
            .collect()
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].as_ref().unwrap(),
            &Bytes::from_static(b"data: {\"text\":\"Role:\\n\"}\n\n")
        );
    }
}
