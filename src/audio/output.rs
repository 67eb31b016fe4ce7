//! Speaker output via `cpal`.
//!
//! An [`AudioBackend`] opens one [`AudioOutput`] per playback session.  The
//! output plays one *unit* (a decoded clip) at a time and reports the unit's
//! id on the `finished` channel when its last sample has been handed to the
//! device.  [`AudioOutput::stop`] silences the current unit without a
//! completion report.
//!
//! Clips are expected in the output's [`OutputFormat`] already; the fetch
//! pipeline converts them off the runtime, so starting a unit only swaps a
//! pointer.
//!
//! The cpal stream lives on a dedicated `audio-output` thread for its whole
//! life; [`AudioOutput::close`] ends that thread, which drops the stream and
//! releases the device.

use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use super::buffer::DecodedAudio;
use super::resample::convert_for_output;

/// Identifies one started clip for completion reporting.
pub type UnitId = u64;

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors raised by the output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported output sample format {0}")]
    UnsupportedFormat(String),

    #[error("output thread failed: {0}")]
    Thread(String),

    #[error("output already closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Sample layout and gain an output plays at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Linear gain applied during conversion.
    pub volume: f32,
}

impl OutputFormat {
    /// Whether `clip` can be handed to the device as is.
    pub fn matches(&self, clip: &DecodedAudio) -> bool {
        clip.sample_rate == self.sample_rate && clip.channels == self.channels
    }

    /// Remix, resample and scale `clip` into this format.
    ///
    /// ```rust
    /// use flowist_player::audio::{DecodedAudio, OutputFormat};
    ///
    /// let format = OutputFormat { sample_rate: 48_000, channels: 2, volume: 1.0 };
    /// let clip = format.convert(&DecodedAudio::new(vec![0.0; 240], 24_000, 1));
    /// assert!(format.matches(&clip));
    /// assert_eq!(clip.frames(), 480);
    /// ```
    pub fn convert(&self, clip: &DecodedAudio) -> DecodedAudio {
        let samples = convert_for_output(clip, self.sample_rate, self.channels, self.volume);
        DecodedAudio::new(samples, self.sample_rate, self.channels)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One open output device.  Only the playback queue commands it.
pub trait AudioOutput: Send {
    /// Format clips should be converted to before [`start_unit`](Self::start_unit).
    fn format(&self) -> OutputFormat;

    /// Replace whatever is playing with `clip`.  Its id is sent on the
    /// backend's `finished` channel once fully played.
    fn start_unit(&mut self, id: UnitId, clip: Arc<DecodedAudio>) -> Result<(), OutputError>;

    /// Silence the current unit immediately.  No completion is reported.
    fn stop(&mut self);

    /// Release the device.  Idempotent; later `start_unit` calls fail with
    /// [`OutputError::Closed`].
    fn close(&mut self);
}

/// Factory for [`AudioOutput`]s.
pub trait AudioBackend: Send + Sync {
    fn open(
        &self,
        finished: mpsc::UnboundedSender<UnitId>,
    ) -> Result<Box<dyn AudioOutput>, OutputError>;
}

// ---------------------------------------------------------------------------
// CpalBackend
// ---------------------------------------------------------------------------

/// Opens the system default output device.
#[derive(Debug, Clone)]
pub struct CpalBackend {
    volume: f32,
}

impl CpalBackend {
    pub fn new(volume: f32) -> Self {
        Self { volume }
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        finished: mpsc::UnboundedSender<UnitId>,
    ) -> Result<Box<dyn AudioOutput>, OutputError> {
        let playhead = Arc::new(Mutex::new(Playhead::default()));
        let (init_tx, init_rx) = std_mpsc::sync_channel::<Result<(u32, u16), OutputError>>(1);
        let (close_tx, close_rx) = std_mpsc::channel::<()>();

        let thread_playhead = Arc::clone(&playhead);
        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match build_default_stream(thread_playhead, finished) {
                    Ok((stream, rate, channels)) => {
                        let _ = init_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                // Park until close() or the output handle is dropped.
                let _ = close_rx.recv();
                drop(stream);
                log::debug!("output: device released");
            })
            .map_err(|e| OutputError::Thread(e.to_string()))?;

        let (device_rate, device_channels) = init_rx
            .recv()
            .map_err(|e| OutputError::Thread(e.to_string()))??;

        log::info!("output: opened default device ({device_rate} Hz, {device_channels} ch)");

        Ok(Box::new(CpalOutput {
            playhead,
            close_tx: Some(close_tx),
            format: OutputFormat {
                sample_rate: device_rate,
                channels: device_channels,
                volume: self.volume,
            },
        }))
    }
}

/// The unit currently being rendered by the device callback.
#[derive(Default)]
struct Playhead {
    current: Option<PlayingUnit>,
}

struct PlayingUnit {
    id: UnitId,
    clip: Arc<DecodedAudio>,
    pos: usize,
}

fn build_default_stream(
    playhead: Arc<Mutex<Playhead>>,
    finished: mpsc::UnboundedSender<UnitId>,
) -> Result<(cpal::Stream, u32, u16), OutputError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(OutputError::NoDevice)?;
    let supported = device.default_output_config()?;

    let rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, playhead, finished)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, playhead, finished)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, playhead, finished)?,
        other => return Err(OutputError::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.play()?;

    Ok((stream, rate, channels))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    playhead: Arc<Mutex<Playhead>>,
    finished: mpsc::UnboundedSender<UnitId>,
) -> Result<cpal::Stream, OutputError> {
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut completed = None;
            if let Ok(mut head) = playhead.lock() {
                for sample in data.iter_mut() {
                    let value = match head.current.as_mut() {
                        Some(unit) if unit.pos < unit.clip.samples.len() => {
                            unit.pos += 1;
                            unit.clip.samples[unit.pos - 1]
                        }
                        _ => 0.0,
                    };
                    *sample = T::from_sample(value);
                }
                if head
                    .current
                    .as_ref()
                    .is_some_and(|unit| unit.pos >= unit.clip.samples.len())
                {
                    completed = head.current.take().map(|unit| unit.id);
                }
            } else {
                for sample in data.iter_mut() {
                    *sample = T::from_sample(0.0);
                }
            }
            if let Some(id) = completed {
                // Receiver gone means the session ended; nothing to report.
                let _ = finished.send(id);
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal output stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

struct CpalOutput {
    playhead: Arc<Mutex<Playhead>>,
    /// `None` once closed.
    close_tx: Option<std_mpsc::Sender<()>>,
    format: OutputFormat,
}

impl AudioOutput for CpalOutput {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn start_unit(&mut self, id: UnitId, clip: Arc<DecodedAudio>) -> Result<(), OutputError> {
        if self.close_tx.is_none() {
            return Err(OutputError::Closed);
        }
        let clip = if self.format.matches(&clip) {
            clip
        } else {
            log::debug!("output: unit {id} arrived unconverted, converting in place");
            Arc::new(self.format.convert(&clip))
        };
        let mut head = self.playhead.lock().map_err(|_| OutputError::Closed)?;
        head.current = Some(PlayingUnit { id, clip, pos: 0 });
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut head) = self.playhead.lock() {
            head.current = None;
        }
    }

    fn close(&mut self) {
        self.stop();
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// MockBackend (test only)
// ---------------------------------------------------------------------------

/// What a [`MockBackend`]'s outputs were asked to do.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockOutputLog {
    pub opens: usize,
    pub closes: usize,
    pub stops: usize,
    /// `(unit id, frames)` per started unit, in order.
    pub started: Vec<(UnitId, usize)>,
    /// Unit currently audible.
    pub active: Option<UnitId>,
    finished: Option<mpsc::UnboundedSender<UnitId>>,
}

/// Test backend: never touches hardware.  Completion is driven by the test
/// through [`MockBackend::finish_active`].
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockBackend {
    pub log: Arc<Mutex<MockOutputLog>>,
    fail_open: bool,
    format: Option<OutputFormat>,
}

#[cfg(test)]
impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose `open` always fails.
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Backend whose outputs ask for `format` instead of the 1 kHz mono
    /// layout [`MockDecoder`](crate::audio::MockDecoder) produces.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Report the active unit as finished, as the device callback would.
    /// Returns the finished id.
    pub fn finish_active(&self) -> Option<UnitId> {
        let mut log = self.log.lock().unwrap();
        let id = log.active.take()?;
        if let Some(tx) = &log.finished {
            let _ = tx.send(id);
        }
        Some(id)
    }

    pub fn active(&self) -> Option<UnitId> {
        self.log.lock().unwrap().active
    }

    pub fn started_ids(&self) -> Vec<UnitId> {
        self.log.lock().unwrap().started.iter().map(|(id, _)| *id).collect()
    }

    pub fn started_frames(&self) -> Vec<usize> {
        self.log.lock().unwrap().started.iter().map(|(_, f)| *f).collect()
    }
}

#[cfg(test)]
impl AudioBackend for MockBackend {
    fn open(
        &self,
        finished: mpsc::UnboundedSender<UnitId>,
    ) -> Result<Box<dyn AudioOutput>, OutputError> {
        if self.fail_open {
            return Err(OutputError::NoDevice);
        }
        let mut log = self.log.lock().unwrap();
        log.opens += 1;
        log.finished = Some(finished);
        Ok(Box::new(MockOutput {
            log: Arc::clone(&self.log),
            format: self.format.unwrap_or(MOCK_FORMAT),
            closed: false,
        }))
    }
}

#[cfg(test)]
const MOCK_FORMAT: OutputFormat = OutputFormat {
    sample_rate: 1_000,
    channels: 1,
    volume: 1.0,
};

#[cfg(test)]
struct MockOutput {
    log: Arc<Mutex<MockOutputLog>>,
    format: OutputFormat,
    closed: bool,
}

#[cfg(test)]
impl AudioOutput for MockOutput {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn start_unit(&mut self, id: UnitId, clip: Arc<DecodedAudio>) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        let mut log = self.log.lock().unwrap();
        log.started.push((id, clip.frames()));
        log.active = Some(id);
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.active = None;
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut log = self.log.lock().unwrap();
        log.closes += 1;
        log.active = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
