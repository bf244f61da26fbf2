//! # Audio Capture Module
//!
//! Real-time audio capture using CPAL (Cross-Platform Audio Library).
//! One pipeline instance exclusively owns the input device, a continuous
//! pitch-detection loop, an independently controlled bounded recorder,
//! and a volume meter.
//!
//! The CPAL input callback accumulates fixed-size analysis windows and
//! streams them to a single worker thread; pitch detection and recorder
//! bookkeeping are serviced there one frame at a time, so windows reach
//! the consumer callback in strict chronological order and the two
//! activities never observe each other mid-frame.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::pitch::{DEFAULT_WINDOW_SIZE, PitchEstimator};

/// Everything configurable about a capture session, with the defaults a
/// violin practice session wants.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Preferred capture sample rate in Hz.
    pub sample_rate: u32,
    /// Analysis window length in samples.
    pub window_size: usize,
    /// Estimates below this clarity are discarded as unpitched.
    pub clarity_threshold: f32,
    /// Lower edge of the accepted band in Hz, just under the open G string.
    pub min_frequency: f32,
    /// Upper edge of the accepted band in Hz.
    pub max_frequency: f32,
    /// RMS level below which a window counts as silence.
    pub amplitude_threshold: f32,
    /// Recording force-stops once this many chunks have accumulated.
    pub max_record_chunks: usize,
    /// Recording force-stops once this many raw bytes have accumulated.
    pub max_record_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            window_size: DEFAULT_WINDOW_SIZE,
            clarity_threshold: 0.85,
            min_frequency: 180.0,
            max_frequency: 3_000.0,
            amplitude_threshold: 0.01,
            max_record_chunks: 600,
            max_record_bytes: 100 * 1024 * 1024,
        }
    }
}

/// One gated pitch detection forwarded to the consumer callback.
#[derive(Debug, Clone, Copy)]
pub struct PitchDetection {
    /// Detected fundamental frequency in Hz.
    pub frequency: f32,
    /// Clarity of the detection, 0.0 to 1.0.
    pub clarity: f32,
    /// RMS amplitude of the window the pitch was found in.
    pub amplitude: f32,
}

/// A finished recording, encoded as a single in-memory WAV payload.
#[derive(Debug, Clone)]
pub struct Recording {
    pub wav_bytes: Vec<u8>,
    pub sample_rate: u32,
    pub duration_secs: f32,
}

type PitchCallback = Box<dyn FnMut(Option<PitchDetection>) + Send>;

enum Command {
    StartPitch(PitchCallback),
    /// Acknowledged so no callback can fire after the stop call returns.
    StopPitch(Sender<()>),
    StartRecording,
    StopRecording(Sender<Option<Recording>>),
}

/// Owns the capture device and the worker servicing it.
///
/// `dispose` (also run on drop) stops both activities, shuts the worker
/// down, and releases the device; it is safe to call repeatedly.
pub struct CapturePipeline {
    stream: Option<cpal::Stream>,
    worker: Option<JoinHandle<()>>,
    commands: Option<Sender<Command>>,
    shutdown: Option<Sender<()>>,
    volume: Arc<AtomicU32>,
    sample_rate: u32,
}

impl CapturePipeline {
    /// Opens the default input device and starts streaming windows to the
    /// worker. Fails when no device is present (or permission is denied),
    /// or when the device offers no usable mono f32 configuration.
    pub fn initialize(config: CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("no input device available (missing device or permission denied)"))?;
        eprintln!("[CAPTURE] using input device: {}", device.name()?);

        let supported = device.supported_input_configs()?.collect::<Vec<_>>();
        let range = pick_input_config(supported, config.sample_rate)
            .ok_or_else(|| anyhow!("no suitable mono f32 input format found"))?;
        let rate = config
            .sample_rate
            .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
        let supported_config = range.with_sample_rate(cpal::SampleRate(rate));
        let sample_rate = supported_config.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported_config.into();
        eprintln!("[CAPTURE] selected sample rate: {} Hz", sample_rate);

        let (frames_tx, frames_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded::<Command>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let err_fn = |err| eprintln!("[CAPTURE] stream error: {}", err);
        let window_size = config.window_size;
        // Accumulates callback deliveries until a full analysis window is
        // ready, then hands it to the worker.
        let mut pending = Vec::with_capacity(window_size * 2);
        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend_from_slice(data);
                while pending.len() >= window_size {
                    let frame = pending[..window_size].to_vec();
                    let _ = frames_tx.try_send(frame);
                    pending.drain(..window_size);
                }
            },
            err_fn,
            None,
        )?;

        let volume = Arc::new(AtomicU32::new(0));
        let worker_state = Worker::new(config, sample_rate, Arc::clone(&volume));
        let worker = thread::spawn(move || run_worker(worker_state, frames_rx, commands_rx, shutdown_rx));

        stream.play()?;

        Ok(Self {
            stream: Some(stream),
            worker: Some(worker),
            commands: Some(commands_tx),
            shutdown: Some(shutdown_tx),
            volume,
            sample_rate,
        })
    }

    /// The sample rate the device actually opened at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Starts the continuous detection loop. The callback sees one result
    /// per analysis window: a gated detection, or `None` when the window
    /// was silent, unclear, or out of the playable band.
    pub fn start_pitch_detection(&self, callback: impl FnMut(Option<PitchDetection>) + Send + 'static) {
        self.send(Command::StartPitch(Box::new(callback)));
    }

    /// Stops the detection loop. Blocks until the worker has dropped the
    /// callback, so no stale invocation can land after this returns.
    pub fn stop_pitch_detection(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(Command::StopPitch(ack_tx));
        let _ = ack_rx.recv();
    }

    /// Starts accumulating audio, independent of pitch detection. Any
    /// previously accumulated chunks are discarded.
    pub fn start_recording(&self) {
        self.send(Command::StartRecording);
    }

    /// Stops recording and returns everything captured so far as one WAV
    /// payload, or `None` when nothing was captured. Frees the chunk list
    /// immediately.
    pub fn stop_recording(&self) -> Option<Recording> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.send(Command::StopRecording(reply_tx));
        reply_rx.recv().ok().flatten()
    }

    /// RMS amplitude of the most recent analysis window.
    pub fn get_volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Stops both loops, shuts down the worker, and releases the device.
    /// Idempotent; also invoked on drop.
    pub fn dispose(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                eprintln!("[CAPTURE] error pausing stream: {}", e);
            }
            drop(stream);
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                eprintln!("[CAPTURE] worker thread panicked");
            }
        }
    }

    fn send(&self, command: Command) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(command);
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Finds the best supported input configuration: mono, 32-bit float,
/// sample-rate range closest to the target.
fn pick_input_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            min_diff.min(max_diff)
        })
}

/// Per-frame state serviced on the worker thread.
struct Worker {
    config: CaptureConfig,
    sample_rate: u32,
    estimator: PitchEstimator,
    pitch_callback: Option<PitchCallback>,
    recording: bool,
    chunks: Vec<Vec<f32>>,
    chunk_bytes: usize,
    volume: Arc<AtomicU32>,
}

impl Worker {
    fn new(config: CaptureConfig, sample_rate: u32, volume: Arc<AtomicU32>) -> Self {
        let estimator = PitchEstimator::new(config.window_size);
        Self {
            config,
            sample_rate,
            estimator,
            pitch_callback: None,
            recording: false,
            chunks: Vec::new(),
            chunk_bytes: 0,
            volume,
        }
    }

    fn handle_frame(&mut self, frame: Vec<f32>) {
        let rms = root_mean_square(&frame);
        self.volume.store(rms.to_bits(), Ordering::Relaxed);

        if self.pitch_callback.is_some() {
            let detection = self.detect(&frame, rms);
            if let Some(callback) = self.pitch_callback.as_mut() {
                callback(detection);
            }
        }

        if self.recording {
            self.chunk_bytes += frame.len() * std::mem::size_of::<f32>();
            self.chunks.push(frame);
            if self.chunks.len() >= self.config.max_record_chunks
                || self.chunk_bytes >= self.config.max_record_bytes
            {
                eprintln!("[CAPTURE] recording cap reached, stopping early");
                self.recording = false;
            }
        }
    }

    /// Runs the estimator on one window and applies the clarity and
    /// playable-band gates.
    fn detect(&mut self, frame: &[f32], rms: f32) -> Option<PitchDetection> {
        if rms < self.config.amplitude_threshold {
            return None;
        }
        let estimate = self.estimator.estimate(frame, self.sample_rate)?;
        if estimate.clarity < self.config.clarity_threshold {
            return None;
        }
        if estimate.frequency < self.config.min_frequency
            || estimate.frequency > self.config.max_frequency
        {
            return None;
        }
        Some(PitchDetection {
            frequency: estimate.frequency,
            clarity: estimate.clarity,
            amplitude: rms,
        })
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartPitch(callback) => {
                self.pitch_callback = Some(callback);
            }
            Command::StopPitch(ack) => {
                self.pitch_callback = None;
                let _ = ack.send(());
            }
            Command::StartRecording => {
                self.chunks.clear();
                self.chunk_bytes = 0;
                self.recording = true;
            }
            Command::StopRecording(reply) => {
                self.recording = false;
                let recording = self.encode_recording();
                self.chunks.clear();
                self.chunk_bytes = 0;
                let _ = reply.send(recording);
            }
        }
    }

    /// Concatenates every accumulated chunk into one 16-bit mono WAV.
    fn encode_recording(&self) -> Option<Recording> {
        if self.chunks.is_empty() {
            return None;
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = match hound::WavWriter::new(&mut cursor, spec) {
            Ok(writer) => writer,
            Err(e) => {
                eprintln!("[CAPTURE] failed to start WAV encoding: {}", e);
                return None;
            }
        };
        for chunk in &self.chunks {
            for &sample in chunk {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(value).ok();
            }
        }
        if let Err(e) = writer.finalize() {
            eprintln!("[CAPTURE] failed to finalize WAV encoding: {}", e);
            return None;
        }
        let total_samples: usize = self.chunks.iter().map(|c| c.len()).sum();
        Some(Recording {
            wav_bytes: cursor.into_inner(),
            sample_rate: self.sample_rate,
            duration_secs: total_samples as f32 / self.sample_rate as f32,
        })
    }
}

fn run_worker(
    mut worker: Worker,
    frames: Receiver<Vec<f32>>,
    commands: Receiver<Command>,
    shutdown: Receiver<()>,
) {
    loop {
        crossbeam_channel::select! {
            recv(frames) -> msg => match msg {
                Ok(frame) => worker.handle_frame(frame),
                Err(_) => break,
            },
            recv(commands) -> msg => match msg {
                Ok(command) => worker.handle_command(command),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    eprintln!("[CAPTURE] worker stopped");
}

/// Root-mean-square amplitude over one window.
fn root_mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy = samples.iter().map(|&s| s * s).sum::<f32>();
    (energy / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_worker(config: CaptureConfig) -> Worker {
        Worker::new(config, 44_100, Arc::new(AtomicU32::new(0)))
    }

    fn small_config() -> CaptureConfig {
        CaptureConfig { window_size: 64, ..CaptureConfig::default() }
    }

    #[test]
    fn test_rms() {
        assert_eq!(root_mean_square(&[]), 0.0);
        assert_eq!(root_mean_square(&[0.0; 32]), 0.0);
        let rms = root_mean_square(&[0.5, -0.5, 0.5, -0.5]);
        assert!((rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_volume_tracks_latest_frame() {
        let mut worker = test_worker(small_config());
        worker.handle_frame(vec![0.5; 64]);
        assert!((f32::from_bits(worker.volume.load(Ordering::Relaxed)) - 0.5).abs() < 1e-6);
        worker.handle_frame(vec![0.0; 64]);
        assert_eq!(f32::from_bits(worker.volume.load(Ordering::Relaxed)), 0.0);
    }

    #[test]
    fn test_recorder_chunk_cap_force_stops() {
        let mut worker = test_worker(CaptureConfig {
            window_size: 64,
            max_record_chunks: 5,
            ..CaptureConfig::default()
        });
        worker.handle_command(Command::StartRecording);
        for _ in 0..10 {
            worker.handle_frame(vec![0.1; 64]);
        }
        assert!(!worker.recording, "recorder must stop itself at the cap");
        assert_eq!(worker.chunks.len(), 5, "captured chunks survive the force stop");
    }

    #[test]
    fn test_recorder_byte_cap_force_stops() {
        // 64 samples * 4 bytes = 256 bytes per chunk; cap at 1000 bytes
        // allows at most the cap plus one chunk of overshoot.
        let mut worker = test_worker(CaptureConfig {
            window_size: 64,
            max_record_bytes: 1000,
            ..CaptureConfig::default()
        });
        worker.handle_command(Command::StartRecording);
        for _ in 0..10 {
            worker.handle_frame(vec![0.1; 64]);
        }
        assert!(!worker.recording);
        assert!(worker.chunk_bytes <= 1000 + 256, "bytes {}", worker.chunk_bytes);
    }

    #[test]
    fn test_stop_recording_delivers_wav_and_clears() {
        let mut worker = test_worker(small_config());
        worker.handle_command(Command::StartRecording);
        for _ in 0..4 {
            worker.handle_frame(vec![0.25; 64]);
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        worker.handle_command(Command::StopRecording(reply_tx));
        let recording = reply_rx.recv().unwrap().expect("four chunks were captured");
        assert_eq!(&recording.wav_bytes[..4], b"RIFF");
        assert!((recording.duration_secs - 256.0 / 44_100.0).abs() < 1e-6);
        assert!(worker.chunks.is_empty(), "chunk list is released on stop");
        assert_eq!(worker.chunk_bytes, 0);
    }

    #[test]
    fn test_stop_recording_with_nothing_captured() {
        let mut worker = test_worker(small_config());
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        worker.handle_command(Command::StopRecording(reply_tx));
        assert!(reply_rx.recv().unwrap().is_none());
    }

    #[test]
    fn test_pitch_callback_gating() {
        let mut worker = test_worker(CaptureConfig {
            window_size: 2048,
            ..CaptureConfig::default()
        });
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        worker.handle_command(Command::StartPitch(Box::new(move |detection| {
            let _ = seen_tx.send(detection);
        })));

        // A silent window reports a failed detection, not nothing at all.
        worker.handle_frame(vec![0.0; 2048]);
        assert!(seen_rx.recv().unwrap().is_none());

        // A clean A4 passes the clarity and band gates.
        let window: Vec<f32> = (0..2048)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
            .collect();
        worker.handle_frame(window);
        let detection = seen_rx.recv().unwrap().expect("A4 should be detected");
        assert!((detection.frequency - 440.0).abs() < 2.0);
        assert!(detection.clarity >= 0.85);
        assert!(detection.amplitude > 0.3);
    }

    #[test]
    fn test_out_of_band_detection_is_dropped() {
        let mut worker = test_worker(CaptureConfig {
            window_size: 2048,
            ..CaptureConfig::default()
        });
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        worker.handle_command(Command::StartPitch(Box::new(move |detection| {
            let _ = seen_tx.send(detection);
        })));
        // 100 Hz is below the violin band even though it is a clean tone.
        let window: Vec<f32> = (0..2048)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 100.0 * i as f32 / 44_100.0).sin())
            .collect();
        worker.handle_frame(window);
        assert!(seen_rx.recv().unwrap().is_none());
    }

    #[test]
    fn test_stop_pitch_acknowledges_and_silences() {
        let mut worker = test_worker(small_config());
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        worker.handle_command(Command::StartPitch(Box::new(move |detection| {
            let _ = seen_tx.send(detection);
        })));
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        worker.handle_command(Command::StopPitch(ack_tx));
        assert!(ack_rx.recv().is_ok());
        worker.handle_frame(vec![0.5; 64]);
        assert!(seen_rx.try_recv().is_err(), "no callback after stop");
    }
}
