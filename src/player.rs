use crate::error::PlaybackError;
use rodio::{OutputStream, Sink, Source};
use std::collections::{HashMap, VecDeque};
use std::io::{BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const SAMPLE_RATE: u32 = 44100;
const CHANNELS: u16 = 2;

/// ffmpeg I/O timeout in microseconds; a silent host fails instead of hanging.
const RW_TIMEOUT_US: &str = "10000000";

/// Opaque token for one open stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(pub u64);

/// Sent when a stream stops on its own: network loss, rejected format, end of data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackEnded {
    pub handle: PlaybackHandle,
    pub reason: String,
}

pub type EndedSender = UnboundedSender<PlaybackEnded>;

/// Everything the session needs from the audio side.
pub trait Playback {
    /// Starts audible output of `url`. If the stream later dies by itself,
    /// the handle is reported on `ended`.
    fn open(&mut self, url: &str, ended: EndedSender) -> Result<PlaybackHandle, PlaybackError>;

    /// Stops output and frees everything behind `handle`. Unknown handles are ignored.
    fn close(&mut self, handle: PlaybackHandle);
}

/// Playback through an `ffmpeg` child decoding to PCM, fed into a rodio sink.
#[derive(Default)]
pub struct RodioPlayback {
    next_id: u64,
    streams: HashMap<PlaybackHandle, PlayerControl>,
}

impl RodioPlayback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Playback for RodioPlayback {
    fn open(&mut self, url: &str, ended: EndedSender) -> Result<PlaybackHandle, PlaybackError> {
        let handle = PlaybackHandle(self.next_id + 1);
        let control = spawn_ffmpeg_to_rodio(url, handle, ended)?;

        self.next_id += 1;
        self.streams.insert(handle, control);
        info!("playback {:?} started for {}", handle, url);
        Ok(handle)
    }

    fn close(&mut self, handle: PlaybackHandle) {
        match self.streams.remove(&handle) {
            Some(control) => {
                control.stop();
                info!("playback {:?} closed", handle);
            }
            None => debug!("playback {:?} already closed", handle),
        }
    }
}

impl Drop for RodioPlayback {
    fn drop(&mut self) {
        for (_, control) in self.streams.drain() {
            control.stop();
        }
    }
}

struct PlayerControl {
    child: Mutex<Option<Child>>,
    sink: Sink,
    _stream: OutputStream, // must keep alive or audio stops
}

impl PlayerControl {
    /// Silences the sink at once; the child is reaped off the caller's thread.
    fn stop(&self) {
        self.sink.stop();

        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut c) = guard.take() {
                let _ = c.kill();
                thread::spawn(move || {
                    let _ = c.wait();
                });
            }
        }
    }
}

fn spawn_ffmpeg_to_rodio(
    stream_url: &str,
    handle: PlaybackHandle,
    ended: EndedSender,
) -> Result<PlayerControl, PlaybackError> {
    let (stream, stream_handle) = OutputStream::try_default()
        .map_err(|e| PlaybackError::Output(format!("{}. Check your audio drivers.", e)))?;

    let sink = Sink::try_new(&stream_handle).map_err(|e| PlaybackError::Output(e.to_string()))?;

    let mut child = Command::new("ffmpeg")
        .arg("-rw_timeout")
        .arg(RW_TIMEOUT_US)
        .arg("-reconnect")
        .arg("1")
        .arg("-reconnect_streamed")
        .arg("1")
        .arg("-reconnect_delay_max")
        .arg("5")
        .arg("-i")
        .arg(stream_url)
        .arg("-f")
        .arg("s16le")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg(SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg(CHANNELS.to_string())
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(PlaybackError::Spawn)?;

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(PlaybackError::Output("decoder stdout not captured".into()));
    };

    let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(10);

    // An unreachable host or unsupported format shows up here as early EOF.
    thread::spawn(move || {
        let reason = pump_pcm(stdout, &tx);
        warn!("playback {:?} ended: {}", handle, reason);
        let _ = ended.send(PlaybackEnded { handle, reason });
    });

    sink.append(PcmSource::new(rx, CHANNELS, SAMPLE_RATE));

    Ok(PlayerControl {
        child: Mutex::new(Some(child)),
        sink,
        _stream: stream,
    })
}

/// Copies decoder output into the sink channel; returns why it stopped.
fn pump_pcm(stdout: impl Read, tx: &mpsc::SyncSender<Vec<i16>>) -> String {
    let mut reader = BufReader::new(stdout);
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => return "stream ended or was rejected by the decoder".to_string(),
            Ok(n) => {
                let samples: Vec<i16> = buf[..n]
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();

                if tx.send(samples).is_err() {
                    return "audio output closed".to_string();
                }
            }
            Err(e) => return format!("decoder read failed: {}", e),
        }
    }
}

/// Live PCM samples handed over by the ffmpeg reader thread.
struct PcmSource {
    rx: mpsc::Receiver<Vec<i16>>,
    buffer: VecDeque<i16>,
    channels: u16,
    sample_rate: u32,
}

impl PcmSource {
    fn new(rx: mpsc::Receiver<Vec<i16>>, channels: u16, sample_rate: u32) -> Self {
        PcmSource {
            rx,
            buffer: VecDeque::with_capacity(8192),
            channels,
            sample_rate,
        }
    }
}

impl Iterator for PcmSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(s) = self.buffer.pop_front() {
                return Some(s as f32 / 32768.0);
            }

            match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => self.buffer.extend(chunk),
                // Underrun: emit silence rather than ending the source.
                Err(mpsc::RecvTimeoutError::Timeout) => return Some(0.0),
                Err(mpsc::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl Source for PcmSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }
    fn channels(&self) -> u16 {
        self.channels
    }
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn total_duration(&self) -> Option<Duration> {
        None // live stream
    }
}
