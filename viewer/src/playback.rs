use cloudcasting::MAX_TIME_STEPS;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::cache::{FrameCache, FrameKey};
use crate::layers::{LayerRegistry, MapSurface};

/// Playback states. Preloading is entered from a play request whenever
/// not all steps of the active variable are cached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preloading,
    Playing,
    Paused,
}

/// Discrete animation speeds offered by the speed selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaySpeed {
    Quadruple,
    Double,
    Normal,
    Half,
}

impl PlaySpeed {
    /// Time between animation frames.
    pub fn frame_interval(self) -> Duration {
        match self {
            PlaySpeed::Quadruple => Duration::from_millis(300),
            PlaySpeed::Double => Duration::from_millis(500),
            PlaySpeed::Normal => Duration::from_millis(1000),
            PlaySpeed::Half => Duration::from_millis(2000),
        }
    }
}

impl Default for PlaySpeed {
    fn default() -> Self {
        PlaySpeed::Normal
    }
}

/// Keyboard input recognized while the viewer is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Space,
    ArrowLeft,
    ArrowRight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TogglePlay,
    Pause,
    /// Timer-driven advance; wraps from the last step back to zero.
    Tick,
    /// Manual advance; clamps at the last step, never wraps.
    StepForward,
    /// Manual retreat; clamps at step zero, never wraps.
    StepBackward,
    /// Absolute step selection from the scrub control; clamped.
    Seek(u32),
    SetSpeed(PlaySpeed),
    SetVariable(String),
    Shutdown,
}

impl Command {
    pub fn from_key(key: KeyInput) -> Self {
        match key {
            KeyInput::Space => Command::TogglePlay,
            KeyInput::ArrowLeft => Command::StepBackward,
            KeyInput::ArrowRight => Command::StepForward,
        }
    }
}

/// Notifications a host UI can render: phase changes, the frame currently
/// shown, preload progress, and dismissible layer failures.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    PhaseChanged(Phase),
    FrameShown(FrameKey),
    PreloadProgress { loaded: u32, total: u32 },
    LayerFailed { key: FrameKey, message: String },
}

/// Clonable command sender for a running [`PlaybackController`].
#[derive(Clone)]
pub struct ControllerHandle {
    tx: UnboundedSender<Command>,
}

impl ControllerHandle {
    pub fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("playback controller is gone, dropping command");
        }
    }

    pub fn toggle_play(&self) {
        self.send(Command::TogglePlay);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn step_forward(&self) {
        self.send(Command::StepForward);
    }

    pub fn step_backward(&self) {
        self.send(Command::StepBackward);
    }

    pub fn seek(&self, step: u32) {
        self.send(Command::Seek(step));
    }

    pub fn set_speed(&self, speed: PlaySpeed) {
        self.send(Command::SetSpeed(speed));
    }

    pub fn set_variable(&self, variable: &str) {
        self.send(Command::SetVariable(variable.to_string()));
    }

    pub fn key(&self, key: KeyInput) {
        self.send(Command::from_key(key));
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

/// Drives the time-stepped animation for the active variable.
///
/// All state mutation happens inside the command loop, so commands from
/// the timer and from user input are strictly serialized. The interval
/// timer is a separate task owned here and is aborted on every transition
/// that leaves Playing, so no orphaned timers survive a pause, variable
/// change, or shutdown.
pub struct PlaybackController<M: MapSurface> {
    cache: Arc<FrameCache>,
    registry: LayerRegistry<M>,
    variable: String,
    step: u32,
    phase: Phase,
    speed: PlaySpeed,
    ticker: Option<JoinHandle<()>>,
    commands: Option<UnboundedReceiver<Command>>,
    command_tx: UnboundedSender<Command>,
    events: UnboundedSender<EngineEvent>,
}

impl<M: MapSurface> PlaybackController<M> {
    pub fn new(
        cache: Arc<FrameCache>,
        registry: LayerRegistry<M>,
        initial_variable: &str,
    ) -> (Self, ControllerHandle, UnboundedReceiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let controller = Self {
            cache,
            registry,
            variable: initial_variable.to_string(),
            step: 0,
            phase: Phase::Idle,
            speed: PlaySpeed::default(),
            ticker: None,
            commands: Some(command_rx),
            command_tx: command_tx.clone(),
            events: event_tx,
        };
        (controller, ControllerHandle { tx: command_tx }, event_rx)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase == Phase::Playing
    }

    pub fn current_step(&self) -> u32 {
        self.step
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn speed(&self) -> PlaySpeed {
        self.speed
    }

    pub fn registry(&self) -> &LayerRegistry<M> {
        &self.registry
    }

    /// Consume commands until shutdown. Displays the initial frame first
    /// so the host shows imagery before any user interaction.
    pub async fn run(mut self) {
        let mut commands = self.commands.take().expect("run may only be called once");
        info!("playback controller started for variable {}", self.variable);

        self.show_step(self.step).await;

        while let Some(command) = commands.recv().await {
            if !self.handle_command(command).await {
                break;
            }
        }

        self.stop_ticker();
        self.registry.teardown_all();
        info!("playback controller stopped");
    }

    /// Apply one command. Returns false when the controller should stop.
    pub async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::TogglePlay => {
                if self.phase == Phase::Playing {
                    self.pause();
                } else {
                    self.play().await;
                }
            }
            Command::Pause => self.pause(),
            Command::Tick => {
                // Stale ticks queued before a pause or variable change.
                if self.phase == Phase::Playing {
                    let next = (self.step + 1) % MAX_TIME_STEPS;
                    self.show_step(next).await;
                }
            }
            Command::StepForward => {
                let next = (self.step + 1).min(MAX_TIME_STEPS - 1);
                if next != self.step {
                    self.show_step(next).await;
                }
            }
            Command::StepBackward => {
                if self.step > 0 {
                    let next = self.step - 1;
                    self.show_step(next).await;
                }
            }
            Command::Seek(step) => {
                let step = step.min(MAX_TIME_STEPS - 1);
                self.show_step(step).await;
            }
            Command::SetSpeed(speed) => self.set_speed(speed),
            Command::SetVariable(variable) => self.set_variable(variable).await,
            Command::Shutdown => return false,
        }
        true
    }

    async fn play(&mut self) {
        if self.phase == Phase::Playing {
            return;
        }

        if !self.cache.all_steps_cached(&self.variable).await {
            self.set_phase(Phase::Preloading);
            let variable = self.variable.clone();
            let events = self.events.clone();
            let (loaded, failed) = self
                .registry
                .preload_all(&self.cache, &variable, self.step, |done, total| {
                    let _ = events.send(EngineEvent::PreloadProgress {
                        loaded: done,
                        total,
                    });
                })
                .await;
            if failed > 0 {
                // Playback proceeds anyway; missing steps simply stay blank.
                warn!(
                    "preload for {} finished with {} loaded, {} failed",
                    variable, loaded, failed
                );
            } else {
                debug!("preloaded {} steps for {}", loaded, variable);
            }
        }

        self.set_phase(Phase::Playing);
        self.start_ticker();
    }

    fn pause(&mut self) {
        if self.phase != Phase::Playing {
            return;
        }
        self.stop_ticker();
        self.set_phase(Phase::Paused);
    }

    async fn set_variable(&mut self, variable: String) {
        if variable == self.variable {
            return;
        }
        info!("switching variable from {} to {}", self.variable, variable);

        // Animation always stops on a variable change.
        self.stop_ticker();
        self.set_phase(Phase::Idle);

        let previous = std::mem::replace(&mut self.variable, variable);
        self.registry.teardown_variable(&previous);

        // The step position is kept; show it for the new variable.
        self.show_step(self.step).await;
    }

    fn set_speed(&mut self, speed: PlaySpeed) {
        if self.speed == speed {
            return;
        }
        self.speed = speed;
        if self.phase == Phase::Playing {
            self.start_ticker();
        }
    }

    async fn show_step(&mut self, step: u32) {
        self.step = step;
        let key = FrameKey::new(&self.variable, step);
        match self.cache.get_or_create(&key).await {
            Ok(outcome) => {
                if let Some(evicted) = outcome.evicted {
                    self.registry.remove_overlay(&evicted);
                }
                match self.registry.show(&key, &outcome.frame) {
                    Ok(()) => self.emit(EngineEvent::FrameShown(key)),
                    Err(err) => {
                        error!("failed to show overlay for {}: {}", key, err);
                        self.emit(EngineEvent::LayerFailed {
                            message: err.to_string(),
                            key,
                        });
                    }
                }
            }
            Err(err) => {
                // The key stays uncached; the next request retries.
                error!("failed to load frame {}: {}", key, err);
                self.emit(EngineEvent::LayerFailed {
                    message: err.to_string(),
                    key,
                });
            }
        }
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        let tx = self.command_tx.clone();
        let period = self.speed.frame_interval();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                if tx.send(Command::Tick).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("playback phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.emit(EngineEvent::PhaseChanged(phase));
        }
    }

    fn emit(&self, event: EngineEvent) {
        // A host that dropped its event receiver still gets a working engine.
        let _ = self.events.send(event);
    }
}

impl<M: MapSurface> Drop for PlaybackController<M> {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
