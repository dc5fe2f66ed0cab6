// Gapless playback scheduling
// PlaybackQueue is pure sample-clock arithmetic: a monotonic playhead
// (samples consumed by the device) plus a next_start cursor. The cursor IS
// the queue; fragments schedule back to back and mix into the device buffer
// by offset. interrupt() drops everything and parks the cursor at zero so
// the next enqueue lands at "now". Player wraps the queue with a cpal
// output stream on its own thread, rate-adapting when the device cannot
// run at the 24 kHz wire rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use log::{debug, error, info, warn};

use super::resample::{RateAdapter, BLOCK_SAMPLES};
use super::{device, AudioBuffer, INBOUND_SAMPLE_RATE};
use crate::error::AudioError;

struct Fragment {
    start: u64,
    samples: Vec<f32>,
}

/// Scheduling core, no device attached. All positions are sample counts
/// on the playback clock.
pub struct PlaybackQueue {
    playhead: u64,
    next_start: u64,
    active: Vec<Fragment>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            playhead: 0,
            next_start: 0,
            active: Vec::new(),
        }
    }

    /// Samples consumed so far; this is "now" on the playback clock
    pub fn playhead(&self) -> u64 {
        self.playhead
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Schedule a fragment, returning its start position. A cursor behind
    /// the clock means we were idle; it snaps forward so nothing is ever
    /// scheduled into the past.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> u64 {
        if self.next_start < self.playhead {
            self.next_start = self.playhead;
        }
        let start = self.next_start;
        self.next_start = start + samples.len() as u64;
        if !samples.is_empty() {
            self.active.push(Fragment { start, samples });
        }
        start
    }

    /// Barge-in: drop every scheduled fragment and park the cursor
    pub fn interrupt(&mut self) {
        let dropped = self.active.len();
        self.active.clear();
        self.next_start = 0;
        if dropped > 0 {
            debug!("Playback interrupted, {} fragment(s) dropped", dropped);
        }
    }

    /// Mix scheduled samples into `out`, advance the clock by its length.
    /// Fragments fully behind the new playhead self-remove.
    pub fn pop_samples(&mut self, out: &mut [f32]) {
        for s in out.iter_mut() {
            *s = 0.0;
        }
        let window_start = self.playhead;
        let window_end = window_start + out.len() as u64;

        for frag in &self.active {
            let frag_end = frag.start + frag.samples.len() as u64;
            let lo = frag.start.max(window_start);
            let hi = frag_end.min(window_end);
            for pos in lo..hi {
                out[(pos - window_start) as usize] += frag.samples[(pos - frag.start) as usize];
            }
        }

        self.playhead = window_end;
        self.active
            .retain(|f| f.start + f.samples.len() as u64 > window_end);
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Playback scheduler bound to (at most) one output device
pub struct Player {
    queue: Arc<Mutex<PlaybackQueue>>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    device_name: Option<String>,
}

impl Player {
    /// Open the default output device and start draining the queue
    pub fn open() -> Result<Self, AudioError> {
        let device = device::default_output_device()?;
        let name = device::device_name(&device);
        let supported = device::output_config(&device, INBOUND_SAMPLE_RATE)?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels().max(1);
        let sample_format = supported.sample_format();

        if device_rate != INBOUND_SAMPLE_RATE {
            warn!(
                "🔊 Output device '{}' runs at {} Hz, adapting from {} Hz",
                name, device_rate, INBOUND_SAMPLE_RATE
            );
        } else {
            info!("🔊 Output device '{}' at {} Hz", name, device_rate);
        }

        let queue = Arc::new(Mutex::new(PlaybackQueue::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let queue_thread = queue.clone();
        let stop_flag = stop.clone();
        let thread_name = name.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("voiceloop-playback".to_string())
            .spawn(move || {
                let adapter = if device_rate != INBOUND_SAMPLE_RATE {
                    match RateAdapter::new(INBOUND_SAMPLE_RATE, device_rate) {
                        Ok(a) => Some(a),
                        Err(e) => {
                            let _ = ready_tx.send(Err(AudioError::UnsupportedConfig {
                                name: thread_name.clone(),
                                reason: format!("resampler init failed: {}", e),
                            }));
                            return;
                        }
                    }
                } else {
                    None
                };

                let config: cpal::StreamConfig = supported.config();
                let built = match sample_format {
                    cpal::SampleFormat::F32 => build_output_stream::<f32>(
                        &device, &config, channels as usize, queue_thread, adapter,
                    ),
                    cpal::SampleFormat::I16 => build_output_stream::<i16>(
                        &device, &config, channels as usize, queue_thread, adapter,
                    ),
                    cpal::SampleFormat::U16 => build_output_stream::<u16>(
                        &device, &config, channels as usize, queue_thread, adapter,
                    ),
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

                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                debug!("Playback thread for '{}' exited", thread_name);
            })
            .map_err(|e| AudioError::UnsupportedConfig {
                name: name.clone(),
                reason: format!("failed to spawn playback thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue,
                stop,
                thread: Some(thread),
                device_name: Some(name),
            }),
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

    /// Scheduler with no device behind it. Fragments accumulate until
    /// interrupted; meant for headless runs and tests.
    pub fn detached() -> Self {
        Self {
            queue: Arc::new(Mutex::new(PlaybackQueue::new())),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
            device_name: None,
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Schedule decoded audio for gapless output. Empty fragments are
    /// ignored so a bad decode cannot stall the cursor.
    pub fn enqueue(&self, buffer: AudioBuffer) {
        let samples = buffer.into_mono();
        if samples.is_empty() {
            debug!("Ignoring empty playback fragment");
            return;
        }
        if let Ok(mut queue) = self.queue.lock() {
            let start = queue.enqueue(samples);
            debug!(
                "Scheduled fragment at sample {} ({} active)",
                start,
                queue.active_count()
            );
        }
    }

    pub fn interrupt(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.interrupt();
        }
    }

    pub fn active_fragments(&self) -> usize {
        self.queue.lock().map(|q| q.active_count()).unwrap_or(0)
    }

    /// Interrupt and release the output device
    pub fn shutdown(&mut self) {
        self.interrupt();
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if let Some(name) = &self.device_name {
                info!("Releasing output device '{}'", name);
            }
            let _ = handle.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    queue: Arc<Mutex<PlaybackQueue>>,
    mut adapter: Option<RateAdapter>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut mono: Vec<f32> = Vec::new();
    let mut carry: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            mono.resize(frames, 0.0);

            match adapter.as_mut() {
                None => {
                    if let Ok(mut q) = queue.lock() {
                        q.pop_samples(&mut mono[..frames]);
                    } else {
                        mono[..frames].fill(0.0);
                    }
                }
                Some(ad) => {
                    // Drain the queue at the wire rate in fixed blocks,
                    // convert, and carry leftovers across callbacks
                    while carry.len() < frames {
                        let mut block = [0.0_f32; BLOCK_SAMPLES];
                        if let Ok(mut q) = queue.lock() {
                            q.pop_samples(&mut block);
                        }
                        let converted = ad.process(&block);
                        if converted.is_empty() {
                            break;
                        }
                        carry.extend(converted);
                    }
                    let take = frames.min(carry.len());
                    mono[..frames].fill(0.0);
                    for (slot, sample) in mono[..take].iter_mut().zip(carry.drain(..take)) {
                        *slot = sample;
                    }
                }
            }

            for (frame_idx, frame) in data.chunks_mut(channels.max(1)).enumerate() {
                let value = T::from_sample(mono[frame_idx]);
                for slot in frame.iter_mut() {
                    *slot = value;
                }
            }
        },
        |err| error!("Playback stream error: {}", err),
        None,
    )?;

    Ok(stream)
}
