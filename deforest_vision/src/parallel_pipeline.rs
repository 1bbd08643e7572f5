// THEORY:
// Pairs of a sequence are independent: comparing frames 3 and 4 needs nothing
// from the comparison of frames 1 and 2. The parallel driver exploits that with a
// small worker pool. A dispatcher hands pair tasks round-robin to workers, each
// worker runs the CPU-bound comparison on the blocking thread pool and answers
// through a oneshot channel.
//
// Results are collected in pair order, so the report is identical to the one the
// sequential driver produces, including which error surfaces first under the
// `Abort` policy.

use crate::config::PipelineConfig;
use crate::core_modules::image_loader::Frame;
use crate::error::{Result, VisionError};
use crate::pipeline::{PairOutcome, SequencePipeline, SequenceReport, ensure_enough};
use futures::future::join_all;
use image::GrayImage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// One pair to compare: frames `index` and `index + 1` of the shared series.
struct PairTask {
    index: usize,
    frames: Arc<Vec<Frame>>,
    result_sender: oneshot::Sender<Result<PairOutcome>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<PairTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers. Must be called from within a tokio runtime.
    pub fn new(pipeline: Arc<SequencePipeline>, size: usize) -> Self {
        let size = size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<PairTask>();
        let mut workers = Vec::with_capacity(size + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| mpsc::unbounded_channel::<PairTask>())
            .unzip();

        // Dispatcher
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % size;
            }
        }));

        for mut worker_receiver in worker_receivers {
            let pipeline = pipeline.clone();
            workers.push(tokio::spawn(async move {
                while let Some(PairTask {
                    index,
                    frames,
                    result_sender,
                }) = worker_receiver.recv().await
                {
                    let pipeline = pipeline.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        pipeline.pair_outcome(
                            index,
                            frames[index].require_image(),
                            frames[index + 1].require_image(),
                        )
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(VisionError::Worker {
                            message: e.to_string(),
                        })
                    });
                    let _ = result_sender.send(outcome);
                }
            }));
        }

        Self {
            task_sender,
            workers,
        }
    }

    /// Number of comparison workers, not counting the dispatcher.
    pub fn size(&self) -> usize {
        self.workers.len() - 1
    }

    fn submit(&self, index: usize, frames: Arc<Vec<Frame>>) -> Result<oneshot::Receiver<Result<PairOutcome>>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(PairTask {
                index,
                frames,
                result_sender,
            })
            .map_err(|_| VisionError::Worker {
                message: "failed to send task to worker pool".into(),
            })?;
        Ok(result_receiver)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// Compares the pairs of a sequence concurrently.
pub struct ParallelSequencePipeline {
    pipeline: Arc<SequencePipeline>,
    worker_pool: WorkerPool,
}

impl ParallelSequencePipeline {
    /// Builds the driver and its pool. Must be called from within a tokio runtime.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let pipeline = Arc::new(SequencePipeline::new(config)?);
        let size = config.sequence.parallelism.unwrap_or_else(num_cpus::get);
        let worker_pool = WorkerPool::new(pipeline.clone(), size);
        debug!(workers = worker_pool.size(), "parallel pipeline ready");
        Ok(Self {
            pipeline,
            worker_pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.worker_pool.size()
    }

    pub async fn run(&self, images: Vec<GrayImage>) -> Result<SequenceReport> {
        let frames = images
            .into_iter()
            .enumerate()
            .map(|(i, image)| Frame::Decoded {
                name: format!("frame_{}", i + 1),
                image,
            })
            .collect();
        self.run_frames(frames).await
    }

    pub async fn run_frames(&self, frames: Vec<Frame>) -> Result<SequenceReport> {
        ensure_enough(frames.len())?;
        let frames = Arc::new(frames);

        let mut receivers = Vec::with_capacity(frames.len() - 1);
        for index in 0..frames.len() - 1 {
            receivers.push(self.worker_pool.submit(index, frames.clone())?);
        }

        let mut pairs = Vec::with_capacity(receivers.len());
        for received in join_all(receivers).await {
            let outcome = received.map_err(|_| VisionError::Worker {
                message: "failed to receive result from worker".into(),
            })?;
            pairs.push(outcome?);
        }
        Ok(self.pipeline.finish(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use image::Luma;

    fn series(sizes: &[(u32, u32)]) -> Vec<GrayImage> {
        sizes
            .iter()
            .map(|&(size, side)| {
                GrayImage::from_fn(size, size, |x, y| {
                    if x < side && y > size - side { Luma([230]) } else { Luma([15]) }
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn matches_sequential_driver() {
        let images = series(&[(48, 6), (48, 14), (48, 22), (48, 30), (48, 38)]);
        let config = PipelineConfig::default();
        let sequential = SequencePipeline::new(&config).unwrap().run(&images).unwrap();
        let parallel = ParallelSequencePipeline::new(&config)
            .unwrap()
            .run(images)
            .await
            .unwrap();

        assert_eq!(parallel.labels(), sequential.labels());
        assert_eq!(parallel.percentages(), sequential.percentages());
        assert_eq!(parallel.trend, sequential.trend);
        for (p, s) in parallel.overlays().iter().zip(sequential.overlays()) {
            assert_eq!(*p, s);
        }
    }

    #[tokio::test]
    async fn skips_and_aborts_like_sequential() {
        let images = series(&[(32, 4), (32, 12), (40, 4), (40, 12)]);

        let skipping = ParallelSequencePipeline::new(&PipelineConfig::default()).unwrap();
        let report = skipping.run(images.clone()).await.unwrap();
        assert!(matches!(report.pairs[1], PairOutcome::Skipped { .. }));
        assert_eq!(report.trend.skipped_pairs, 1);

        let mut config = PipelineConfig::default();
        config.sequence.failure_policy = FailurePolicy::Abort;
        let aborting = ParallelSequencePipeline::new(&config).unwrap();
        assert!(matches!(
            aborting.run(images).await,
            Err(VisionError::ShapeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn respects_configured_parallelism() {
        let mut config = PipelineConfig::default();
        config.sequence.parallelism = Some(2);
        let pipeline = ParallelSequencePipeline::new(&config).unwrap();
        assert_eq!(pipeline.workers(), 2);
        assert!(matches!(
            pipeline.run(series(&[(16, 4)])).await,
            Err(VisionError::InsufficientInput { provided: 1, .. })
        ));
    }
}
