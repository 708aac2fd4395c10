//! The stream session: the single owner of "what is playing right now".
//!
//! Every transition runs on the session's own loop, so `switch_station`'s
//! teardown-then-open can never interleave with another transition. At most
//! one playback handle is open at any time.

use crate::directory::StationDirectory;
use crate::error::{MetadataError, PlaybackError, SessionError};
use crate::metadata::{metadata_loop, PollOutcome, PollSettings};
use crate::player::{EndedSender, Playback, PlaybackEnded, PlaybackHandle};
use crate::station::Station;
use reqwest::Client;
use std::ops::ControlFlow;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shown whenever a poll yields nothing usable.
pub const NO_TITLE: &str = "no title available";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Idle,
    Playing,
    Switching,
}

/// Commands accepted from the presentation side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Search(String),
    TogglePlay,
    SwitchToDefault,
    Quit,
}

/// What the screen renders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub current_station: Option<Station>,
    pub song_title: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    current_station: Option<Station>,
    connection: Option<PlaybackHandle>,
    song_title: String,
    mode: Mode,
    last_error: Option<String>,
}

pub struct Session<P: Playback> {
    state: SessionState,
    playback: P,
    directory: StationDirectory,
    client: Client,
    poll_settings: PollSettings,
    default_station: Station,
    /// Bumped whenever a poll task is started or cancelled.
    epoch: u64,
    poll_task: Option<JoinHandle<()>>,
    poll_tx: mpsc::Sender<PollOutcome>,
    poll_rx: mpsc::Receiver<PollOutcome>,
    ended_tx: EndedSender,
    ended_rx: mpsc::UnboundedReceiver<PlaybackEnded>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<P: Playback> Session<P> {
    pub fn new(
        playback: P,
        directory: StationDirectory,
        client: Client,
        poll_settings: PollSettings,
        default_station: Station,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let state = SessionState {
            current_station: Some(default_station.clone()),
            ..SessionState::default()
        };
        let (poll_tx, poll_rx) = mpsc::channel(8);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let session = Self {
            state,
            playback,
            directory,
            client,
            poll_settings,
            default_station,
            epoch: 0,
            poll_task: None,
            poll_tx,
            poll_rx,
            ended_tx,
            ended_rx,
            snapshot_tx,
        };
        session.publish();
        (session, snapshot_rx)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.state.mode,
            current_station: self.state.current_station.clone(),
            song_title: self.state.song_title.clone(),
            last_error: self.state.last_error.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Runs until `Quit` arrives or every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("session loop started");

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        info!("command channel closed");
                        break;
                    };
                    if self.handle_command(cmd).await.is_break() {
                        break;
                    }
                }
                Some(outcome) = self.poll_rx.recv() => {
                    self.apply_poll(outcome);
                }
                Some(ended) = self.ended_rx.recv() => {
                    self.on_playback_ended(ended);
                }
            }
        }

        self.shutdown();
    }

    pub async fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        debug!("command {:?} in {:?}", cmd, self.state.mode);

        let result = match cmd {
            Command::Search(tag) => self.search(&tag).await,
            Command::TogglePlay => match self.state.mode {
                Mode::Playing => self.pause(),
                _ => self.play(),
            },
            Command::SwitchToDefault => self.switch_station(self.default_station.clone()),
            Command::Quit => return ControlFlow::Break(()),
        };

        match result {
            Ok(()) => self.state.last_error = None,
            Err(e) => {
                warn!("{}", e);
                self.state.last_error = Some(e.to_string());
            }
        }
        self.publish();
        ControlFlow::Continue(())
    }

    /// Idle -> Playing.
    pub fn play(&mut self) -> Result<(), SessionError> {
        if self.state.mode == Mode::Playing {
            return Err(SessionError::InvalidTransition {
                op: "play",
                mode: self.state.mode,
            });
        }
        let station = self
            .state
            .current_station
            .clone()
            .ok_or(SessionError::NoStation)?;

        info!("connecting to {} ({})", station.name, station.url);
        let handle = match self.playback.open(&station.url, self.ended_tx.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.state.mode = Mode::Idle;
                return Err(e.into());
            }
        };

        self.state.connection = Some(handle);
        self.state.mode = Mode::Playing;
        self.start_polling(station.url);
        Ok(())
    }

    /// Playing -> Idle.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.state.mode != Mode::Playing {
            return Err(SessionError::InvalidTransition {
                op: "pause",
                mode: self.state.mode,
            });
        }
        self.teardown();
        self.state.mode = Mode::Idle;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.pause()
    }

    /// Tears down any live stream, then opens `station`.
    pub fn switch_station(&mut self, station: Station) -> Result<(), SessionError> {
        if self.state.mode == Mode::Switching {
            return Err(SessionError::InvalidTransition {
                op: "switch station",
                mode: self.state.mode,
            });
        }

        info!("switching to {}", station.name);
        self.state.mode = Mode::Switching;
        self.publish();

        self.teardown();
        self.state.current_station = Some(station);
        self.state.song_title.clear();

        match self.play() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.mode = Mode::Idle;
                Err(e)
            }
        }
    }

    /// Looks `tag` up in the local station cache and switches to the hit.
    ///
    /// A missing or unreadable cache triggers a directory refresh, but the
    /// search itself still fails; the caller retries once the list is in.
    pub async fn search(&mut self, tag: &str) -> Result<(), SessionError> {
        match self.directory.resolve(tag) {
            Ok(station) => self.switch_station(station),
            Err(e) if e.needs_refresh() => {
                warn!("{}, refreshing station list", e);
                self.directory.refresh().await?;
                Err(SessionError::CacheRecovered)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a finished poll if it still belongs to the current epoch.
    pub fn apply_poll(&mut self, outcome: PollOutcome) {
        if outcome.epoch != self.epoch || self.state.mode != Mode::Playing {
            debug!(
                "dropping poll result from epoch {} (current {})",
                outcome.epoch, self.epoch
            );
            return;
        }

        self.state.song_title = match outcome.result {
            Ok(title) if !title.trim().is_empty() => title,
            Ok(_) => NO_TITLE.to_string(),
            Err(MetadataError::MissingMetaInt) => {
                self.state.last_error = Some(MetadataError::MissingMetaInt.to_string());
                NO_TITLE.to_string()
            }
            Err(e) => {
                debug!("title poll failed: {}", e);
                NO_TITLE.to_string()
            }
        };
        self.publish();
    }

    /// A stream died on its own. Only the live handle matters; reports for
    /// handles already closed by a pause or switch are ignored.
    pub fn on_playback_ended(&mut self, ended: PlaybackEnded) {
        if self.state.connection != Some(ended.handle) {
            debug!("ignoring end of superseded playback {:?}", ended.handle);
            return;
        }

        warn!("playback {:?} stopped: {}", ended.handle, ended.reason);
        self.teardown();
        self.state.mode = Mode::Idle;
        self.state.last_error = Some(PlaybackError::Stopped(ended.reason).to_string());
        self.publish();
    }

    fn start_polling(&mut self, url: String) {
        self.cancel_polling();
        self.epoch += 1;
        let task = metadata_loop(
            self.client.clone(),
            url,
            self.epoch,
            self.poll_settings,
            self.poll_tx.clone(),
        );
        self.poll_task = Some(tokio::spawn(task));
    }

    fn cancel_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
            self.epoch += 1;
        }
    }

    /// Cancels polling, then releases the connection. Safe without one.
    fn teardown(&mut self) {
        self.cancel_polling();
        if let Some(handle) = self.state.connection.take() {
            self.playback.close(handle);
        }
        self.state.song_title.clear();
    }

    fn shutdown(&mut self) {
        info!("session shutting down");
        if self.state.mode == Mode::Playing {
            if let Err(e) = self.stop() {
                warn!("stop on shutdown: {}", e);
            }
        }
        self.teardown();
        self.state.mode = Mode::Idle;
        self.publish();
    }
}
