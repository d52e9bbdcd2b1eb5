//! Queue-based generation worker.
//!
//! Stateful models (token LMs with inference caches) are not safely
//! shareable mid-inference, so each one lives on a single dedicated OS
//! thread. Requests are queued and served strictly FIFO; each request
//! carries its own response channel so the caller starts receiving audio
//! fragments while generation is still running. A failing request is
//! reported on its own channel and never takes the worker down.
//!
//! Async callers bridge to the worker through [`WorkerHandle::generate`],
//! which delegates every blocking `recv()` to `spawn_blocking` so the
//! caller's scheduler threads are never parked.

use std::sync::mpsc;
use std::thread;

use anyhow::anyhow;

use crate::error::TtsError;
use crate::reference::ReferenceTokens;

/// Token-sampling knobs forwarded to the underlying model.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            repetition_penalty: 1.2,
        }
    }
}

/// One synthesis request, consumed exactly once by the worker.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    /// Precomputed reference-audio tokens conditioning the voice.
    pub prompt_tokens: Option<ReferenceTokens>,
    pub max_new_tokens: usize,
    /// Segment length for iterative prompting; 0 disables it.
    pub chunk_length: usize,
    pub sampling: SamplingOptions,
}

/// One message on a request's response channel: zero or more `Success`
/// fragments followed by exactly one terminal `Done` or `Error`.
#[derive(Debug)]
pub enum ResponseChunk {
    Success(Vec<f32>),
    Error(String),
    Done,
}

/// The opaque generation routine the worker drives. Implementations may
/// emit any number of waveform fragments through `emit` before returning;
/// fragments are forwarded to the caller the moment they are produced.
pub trait GenerationModel: Send + 'static {
    fn generate(
        &mut self,
        request: &GenerationRequest,
        emit: &mut dyn FnMut(Vec<f32>),
    ) -> anyhow::Result<()>;
}

struct QueuedJob {
    request: GenerationRequest,
    response: mpsc::Sender<ResponseChunk>,
}

/// Cloneable handle to a generation worker thread.
///
/// The worker loop ends once every handle clone is dropped and the
/// request channel disconnects; an in-flight request still runs to its
/// terminal chunk.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<QueuedJob>,
}

impl WorkerHandle {
    /// Spawn the worker thread and load the model on it.
    ///
    /// Blocks until the model has finished loading (or failed to), so a
    /// returned handle is always ready to accept requests. Intended to be
    /// called once, at backend construction.
    pub fn spawn<M, F>(name: &str, load: F) -> Result<Self, TtsError>
    where
        M: GenerationModel,
        F: FnOnce() -> anyhow::Result<M> + Send + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<QueuedJob>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let thread_name = format!("tts-worker-{name}");

        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut model = match load() {
                    Ok(model) => {
                        let _ = ready_tx.send(Ok(()));
                        model
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                tracing::info!(worker = %thread_name, "generation model loaded");

                while let Ok(QueuedJob { request, response }) = job_rx.recv() {
                    let mut emit = |frame: Vec<f32>| {
                        // An abandoned caller makes this send fail; the
                        // request still runs to completion.
                        let _ = response.send(ResponseChunk::Success(frame));
                    };
                    match model.generate(&request, &mut emit) {
                        Ok(()) => {
                            let _ = response.send(ResponseChunk::Done);
                        }
                        Err(e) => {
                            tracing::error!(worker = %thread_name, error = %e, "generation failed");
                            let _ = response.send(ResponseChunk::Error(e.to_string()));
                        }
                    }
                }
                tracing::debug!(worker = %thread_name, "all handles dropped, worker exiting");
            })
            .map_err(|e| TtsError::synthesis(anyhow!("spawning worker thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { sender: job_tx }),
            Ok(Err(e)) => Err(TtsError::Synthesis(e.context("loading generation model"))),
            Err(_) => Err(TtsError::synthesis(anyhow!(
                "worker thread died before signalling readiness"
            ))),
        }
    }

    /// Enqueue a request and hand back its response channel. Requests are
    /// dequeued in submission order; no priority, no preemption.
    pub fn submit(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<ResponseChunk>, TtsError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.sender
            .send(QueuedJob {
                request,
                response: response_tx,
            })
            .map_err(|_| TtsError::synthesis(anyhow!("generation worker is gone")))?;
        Ok(response_rx)
    }

    /// Submit a request and collect its fragments in arrival order.
    ///
    /// On a terminal `Error` every already-received fragment is discarded
    /// and the call fails — all-or-nothing. Blocking waits happen on the
    /// blocking thread pool, never on the async scheduler.
    pub async fn generate(&self, request: GenerationRequest) -> Result<Vec<Vec<f32>>, TtsError> {
        let mut response_rx = self.submit(request)?;
        let mut fragments = Vec::new();

        loop {
            let (message, receiver) = tokio::task::spawn_blocking(move || {
                let message = response_rx.recv();
                (message, response_rx)
            })
            .await
            .map_err(|e| TtsError::synthesis(anyhow!("response wait task failed: {e}")))?;
            response_rx = receiver;

            match message {
                Ok(ResponseChunk::Success(fragment)) => fragments.push(fragment),
                Ok(ResponseChunk::Done) => return Ok(fragments),
                Ok(ResponseChunk::Error(cause)) => {
                    return Err(TtsError::synthesis(anyhow!(cause)));
                }
                Err(_) => {
                    return Err(TtsError::synthesis(anyhow!(
                        "worker disconnected before completing the request"
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits `frames` fragments of one sample each, then fails after
    /// `fail_after` fragments if set.
    struct ScriptedModel {
        frames: usize,
        fail_after: Option<usize>,
    }

    impl GenerationModel for ScriptedModel {
        fn generate(
            &mut self,
            request: &GenerationRequest,
            emit: &mut dyn FnMut(Vec<f32>),
        ) -> anyhow::Result<()> {
            for i in 0..self.frames {
                if self.fail_after == Some(i) {
                    anyhow::bail!("model exploded on {:?}", request.text);
                }
                emit(vec![i as f32]);
            }
            Ok(())
        }
    }

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest {
            text: text.to_string(),
            prompt_tokens: None,
            max_new_tokens: 128,
            chunk_length: 0,
            sampling: SamplingOptions::default(),
        }
    }

    #[test]
    fn load_failure_is_reported_at_spawn() {
        let result = WorkerHandle::spawn("broken", || -> anyhow::Result<ScriptedModel> {
            anyhow::bail!("weights missing")
        });
        let err = result.err().expect("spawn must fail");
        assert!(err.to_string().contains("synthesis failed"));
    }

    #[test]
    fn fragments_arrive_in_generation_order_then_done() {
        let handle = WorkerHandle::spawn("ordered", || {
            Ok(ScriptedModel {
                frames: 4,
                fail_after: None,
            })
        })
        .unwrap();

        let rx = handle.submit(request("hello")).unwrap();
        let mut seen = Vec::new();
        loop {
            match rx.recv().unwrap() {
                ResponseChunk::Success(frame) => seen.push(frame[0] as usize),
                ResponseChunk::Done => break,
                ResponseChunk::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(rx.try_recv().is_err(), "nothing may follow the terminal chunk");
    }

    #[test]
    fn failed_request_does_not_kill_the_worker() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_in_model = calls.clone();

        struct FlakyModel {
            calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        }
        impl GenerationModel for FlakyModel {
            fn generate(
                &mut self,
                _request: &GenerationRequest,
                emit: &mut dyn FnMut(Vec<f32>),
            ) -> anyhow::Result<()> {
                let call = self
                    .calls
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if call == 0 {
                    emit(vec![0.0]);
                    emit(vec![1.0]);
                    anyhow::bail!("cache corruption");
                }
                emit(vec![2.0]);
                Ok(())
            }
        }

        let handle =
            WorkerHandle::spawn("flaky", move || Ok(FlakyModel { calls: calls_in_model })).unwrap();

        // R1 and R2 queued in order; R1 fails after two fragments.
        let r1 = handle.submit(request("first")).unwrap();
        let r2 = handle.submit(request("second")).unwrap();

        let mut r1_fragments = 0;
        let r1_terminal = loop {
            match r1.recv().unwrap() {
                ResponseChunk::Success(_) => r1_fragments += 1,
                terminal => break terminal,
            }
        };
        assert_eq!(r1_fragments, 2);
        assert!(matches!(r1_terminal, ResponseChunk::Error(_)));

        let mut r2_fragments = Vec::new();
        loop {
            match r2.recv().unwrap() {
                ResponseChunk::Success(frame) => r2_fragments.push(frame[0]),
                ResponseChunk::Done => break,
                ResponseChunk::Error(e) => panic!("R2 must succeed, got: {e}"),
            }
        }
        assert_eq!(r2_fragments, vec![2.0]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_generate_collects_all_fragments() {
        let handle = WorkerHandle::spawn("collect", || {
            Ok(ScriptedModel {
                frames: 3,
                fail_after: None,
            })
        })
        .unwrap();

        let fragments = handle.generate(request("collect me")).await.unwrap();
        assert_eq!(fragments, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn async_generate_discards_partial_output_on_error() {
        let handle = WorkerHandle::spawn("partial", || {
            Ok(ScriptedModel {
                frames: 5,
                fail_after: Some(2),
            })
        })
        .unwrap();

        let err = handle.generate(request("doomed")).await.unwrap_err();
        assert!(matches!(err, TtsError::Synthesis(_)));
    }

    #[tokio::test]
    async fn requests_are_served_fifo() {
        let handle = WorkerHandle::spawn("fifo", || {
            struct EchoIndex(usize);
            impl GenerationModel for EchoIndex {
                fn generate(
                    &mut self,
                    _request: &GenerationRequest,
                    emit: &mut dyn FnMut(Vec<f32>),
                ) -> anyhow::Result<()> {
                    emit(vec![self.0 as f32]);
                    self.0 += 1;
                    Ok(())
                }
            }
            Ok(EchoIndex(0))
        })
        .unwrap();

        let a = handle.submit(request("a")).unwrap();
        let b = handle.submit(request("b")).unwrap();
        let c = handle.submit(request("c")).unwrap();

        let order: Vec<f32> = [a, b, c]
            .into_iter()
            .map(|rx| loop {
                if let ResponseChunk::Success(frame) = rx.recv().unwrap() {
                    break frame[0];
                }
            })
            .collect();
        assert_eq!(order, vec![0.0, 1.0, 2.0]);
    }
}
