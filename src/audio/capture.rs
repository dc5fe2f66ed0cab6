// Microphone capture
// The input device is owned by a dedicated thread because cpal streams are
// not Send. Frames are folded to mono in the callback and accumulated into
// fixed 4096-sample chunks; a filled chunk is the only signal crossing to
// the controller. Stopping discards any partial chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use super::{device, AudioChunk, CAPTURE_CHUNK_SAMPLES};
use crate::error::AudioError;

pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    device_name: String,
    sample_rate: u32,
}

impl CaptureHandle {
    /// Open the default microphone and start emitting chunks on `sender`.
    /// Returns once the stream is actually running.
    pub fn start(sender: mpsc::UnboundedSender<AudioChunk>) -> Result<Self, AudioError> {
        let device = device::default_input_device()?;
        let name = device::device_name(&device);
        let supported = device::input_config(&device)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();

        info!(
            "🎙️ Capture device '{}': {} Hz, {} ch, {:?}",
            name, sample_rate, channels, sample_format
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread_name = name.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("voiceloop-capture".to_string())
            .spawn(move || {
                let config: cpal::StreamConfig = supported.config();
                let built = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, channels, sample_rate, sender)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, channels, sample_rate, sender)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &config, channels, sample_rate, sender)
                    }
                    other => Err(AudioError::UnsupportedConfig {
                        name: thread_name.clone(),
                        reason: format!("unhandled sample format {:?}", other),
                    }),
                };

                let stream = match built {
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

                // Park until told to stop; dropping the stream releases the device
                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                debug!("Capture thread for '{}' exited", thread_name);
            })
            .map_err(|e| AudioError::UnsupportedConfig {
                name: name.clone(),
                reason: format!("failed to spawn capture thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("✅ Capture running on '{}'", name);
                Ok(Self {
                    stop,
                    thread: Some(thread),
                    device_name: name,
                    sample_rate,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::WorkerGone)
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stop the stream and release the microphone. Any partially filled
    /// chunk dies with the callback.
    pub fn stop(&mut self) {
        if self.thread.is_some() {
            info!("Stopping capture on '{}'", self.device_name);
        }
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    sample_rate: u32,
    sender: mpsc::UnboundedSender<AudioChunk>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = channels.max(1) as usize;
    let mut pending: Vec<f32> = Vec::with_capacity(CAPTURE_CHUNK_SAMPLES);
    let mut chunk_count: u64 = 0;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if ch == 1 {
                pending.extend(data.iter().map(|&s| f32::from_sample(s)));
            } else {
                for frame in data.chunks(ch) {
                    let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                    pending.push(sum / ch as f32);
                }
            }

            while pending.len() >= CAPTURE_CHUNK_SAMPLES {
                let rest = pending.split_off(CAPTURE_CHUNK_SAMPLES);
                let samples = std::mem::replace(&mut pending, rest);
                chunk_count += 1;
                if chunk_count % 100 == 0 {
                    debug!("Capture chunk {} emitted", chunk_count);
                }
                if sender.send(AudioChunk { samples, sample_rate }).is_err() {
                    // Controller went away; the stop flag will tear us down
                    return;
                }
            }
        },
        handle_stream_error,
        None,
    )?;

    Ok(stream)
}

/// Stream-level errors arrive on cpal's own thread; classify disconnects
/// so the log tells the user what happened
fn handle_stream_error(error: cpal::StreamError) {
    let error_str = error.to_string().to_lowercase();
    if error_str.contains("device is no longer available")
        || error_str.contains("device not found")
        || error_str.contains("no such device")
        || error_str.contains("device disconnected")
    {
        warn!("🔌 Capture device disconnected: {}", error);
    } else {
        error!("Capture stream error: {}", error);
    }
}
