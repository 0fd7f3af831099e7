//! # Capture Source
//!
//! Owns the microphone lifecycle and emits a continuous sequence of
//! encoded frames via callback.
//!
//! The cpal stream lives on a dedicated capture thread (cpal streams are
//! not `Send` on every platform), so the owning handle stays movable
//! between tasks. The audio callback assembles fixed-size blocks,
//! conditions them, encodes them to PCM16LE, and hands each frame to the
//! registered callback — one frame per `block_size / sample_rate` seconds
//! (~171 ms for 4096 samples at 24 kHz) for as long as the device is open.

use crate::audio::processor::{encode_pcm16, Conditioner};
use crate::config::AudioSettings;
use crate::error::{PipelineError, PipelineResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Callback invoked with each encoded frame. Ownership of the frame bytes
/// transfers to the callback the instant the block is encoded.
pub type FrameCallback = std::sync::Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Capture configuration derived from the shared audio settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl From<&AudioSettings> for CaptureConfig {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            block_size: settings.block_size,
            noise_suppression: settings.noise_suppression,
            auto_gain: settings.auto_gain,
        }
    }
}

/// Accumulates raw input samples into fixed-size blocks and emits one
/// encoded frame per completed block.
///
/// Block boundaries never split across callbacks: a partial block is
/// carried until the device delivers enough samples to complete it.
pub(crate) struct BlockAssembler {
    block: Vec<f32>,
    block_size: usize,
    conditioner: Conditioner,
}

impl BlockAssembler {
    pub(crate) fn new(block_size: usize, conditioner: Conditioner) -> Self {
        Self {
            block: Vec::with_capacity(block_size),
            block_size,
            conditioner,
        }
    }

    /// Feed captured samples; emits frames in block order.
    pub(crate) fn push(&mut self, data: &[f32], on_frame: &FrameCallback) {
        for &sample in data {
            self.block.push(sample);

            if self.block.len() >= self.block_size {
                let mut samples =
                    std::mem::replace(&mut self.block, Vec::with_capacity(self.block_size));
                self.conditioner.apply(&mut samples);
                on_frame(encode_pcm16(&samples));
            }
        }
    }
}

/// Handle to the running capture thread.
struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the microphone: one active input stream at a time.
///
/// ## Lifecycle:
/// - `start(on_frame)`: acquires the default input device and begins the
///   block cadence. Fails with `DeviceUnavailable` if the platform denies
///   or lacks microphone access, `AlreadyStarted` if already running.
/// - `stop()`: scoped teardown — signal the capture thread, pause the
///   stream, release the device, join. Tolerates any individual step's
///   failure (log and continue), never returns an error, and is a no-op
///   when not started.
pub struct CaptureSource {
    config: CaptureConfig,
    worker: Option<CaptureWorker>,
}

impl CaptureSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }

    /// Whether the capture thread is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Acquire the input device and start emitting frames.
    pub fn start(&mut self, on_frame: FrameCallback) -> PipelineResult<()> {
        if self.worker.is_some() {
            return Err(PipelineError::AlreadyStarted);
        }

        let config = self.config.clone();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread_main(config, on_frame, ready_tx, stop_rx))
            .map_err(|e| {
                PipelineError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e))
            })?;

        // Block until the thread reports whether the device opened.
        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, handle });
                info!(
                    sample_rate = self.config.sample_rate,
                    block_size = self.config.block_size,
                    "capture started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(PipelineError::DeviceUnavailable(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Stop capturing and release the device. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return; // not started: no-op
        };

        if worker.stop_tx.send(()).is_err() {
            warn!("capture thread was already gone at stop");
        }

        if worker.handle.join().is_err() {
            warn!("capture thread panicked during teardown");
        }

        info!("capture stopped");
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread: build the stream, report readiness, park
/// until stopped, then tear down in order (pause, then drop to release
/// the device handle).
fn capture_thread_main(
    config: CaptureConfig,
    on_frame: FrameCallback,
    ready_tx: mpsc::Sender<PipelineResult<()>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let stream = match build_capture_stream(&config, on_frame) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Park until stop() signals (or the handle is dropped).
    let _ = stop_rx.recv();

    if let Err(e) = stream.pause() {
        warn!("failed to pause capture stream: {}", e);
    }
    drop(stream);
    debug!("capture stream released");
}

/// Open the default input device with the pipeline's format and wire the
/// block assembler into its callback.
fn build_capture_stream(
    config: &CaptureConfig,
    on_frame: FrameCallback,
) -> PipelineResult<cpal::Stream> {
    let host = cpal::default_host();

    let device = host.default_input_device().ok_or_else(|| {
        PipelineError::DeviceUnavailable("no input device available".to_string())
    })?;

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    info!(device = %device_name, "using input device");

    let default_config = device.default_input_config()?;

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let conditioner = Conditioner::new(config.noise_suppression, config.auto_gain);
    let mut assembler = BlockAssembler::new(config.block_size, conditioner);

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data, &on_frame);
            },
            |err| error!("capture stream error: {}", err),
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                assembler.push(&converted, &on_frame);
            },
            |err| error!("capture stream error: {}", err),
            None,
        )?,
        format => {
            return Err(PipelineError::DeviceUnavailable(format!(
                "unsupported input sample format: {:?}",
                format
            )));
        }
    };

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_callback() -> (FrameCallback, Arc<Mutex<Vec<Vec<u8>>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let callback: FrameCallback = Arc::new(move |frame| {
            sink.lock().unwrap().push(frame);
        });
        (callback, frames)
    }

    #[test]
    fn test_three_blocks_produce_three_frames_in_order() {
        let (callback, frames) = collecting_callback();
        let mut assembler = BlockAssembler::new(4, Conditioner::new(false, false));

        // Three full blocks, each with a distinct leading sample.
        assembler.push(&[0.1, 0.0, 0.0, 0.0], &callback);
        assembler.push(&[0.2, 0.0, 0.0, 0.0], &callback);
        assembler.push(&[0.3, 0.0, 0.0, 0.0], &callback);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        for frame in frames.iter() {
            assert_eq!(frame.len(), 8); // 4 samples × 2 bytes
        }
        // Block order is preserved in the emitted frames.
        assert_eq!(&frames[0][0..2], &encode_pcm16(&[0.1])[..]);
        assert_eq!(&frames[1][0..2], &encode_pcm16(&[0.2])[..]);
        assert_eq!(&frames[2][0..2], &encode_pcm16(&[0.3])[..]);
    }

    #[test]
    fn test_partial_block_is_carried() {
        let (callback, frames) = collecting_callback();
        let mut assembler = BlockAssembler::new(4, Conditioner::new(false, false));

        assembler.push(&[0.1, 0.2], &callback);
        assert!(frames.lock().unwrap().is_empty());

        // Completing the block emits exactly one frame.
        assembler.push(&[0.3, 0.4], &callback);
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_block_boundary_spans_callbacks() {
        let (callback, frames) = collecting_callback();
        let mut assembler = BlockAssembler::new(4, Conditioner::new(false, false));

        // 10 samples with block size 4: two frames, two samples carried.
        assembler.push(&[0.0; 10], &callback);
        assert_eq!(frames.lock().unwrap().len(), 2);

        assembler.push(&[0.0; 2], &callback);
        assert_eq!(frames.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_stop_is_idempotent_when_never_started() {
        let mut source = CaptureSource::new(CaptureConfig {
            sample_rate: 24_000,
            channels: 1,
            block_size: 4096,
            noise_suppression: true,
            auto_gain: true,
        });

        assert!(!source.is_running());
        source.stop();
        source.stop();
        assert!(!source.is_running());
    }
}
