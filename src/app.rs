use std::{
    io::Write,
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};

use tracing::*;

use crate::{
    errors::{AppResult, VolwatchError},
    platform::{AudioSession, DeviceClass, DeviceId, Source},
};

/// Notifications from the session manager, consumed by one `App` in arrival
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A node's volume or mute state changed.
    MixerChanged { node: DeviceId },
    DeviceAdded { id: DeviceId, class: DeviceClass },
    DeviceRemoved { id: DeviceId, class: DeviceClass },
}

/// Device enumeration can lag the graph for a moment after a mutation, so
/// every add/remove gets a second look this long after the immediate one.
const RESYNC_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Clone, Copy)]
struct SourceState {
    /// `None` until the first resynchronization. Only an explicit `false`
    /// suppresses the real volume lookup when reporting.
    enabled: Option<bool>,
    /// Last resolved default device, written together with `enabled`.
    device: Option<DeviceId>,
}

pub struct App<S, W> {
    session: S,
    events: Receiver<AudioEvent>,
    out: W,
    input: SourceState,
    output: SourceState,
    /// One deadline per pending delayed resynchronization. Overlapping
    /// notifications keep independent timers.
    pending_resyncs: Vec<Instant>,
}

impl<S: AudioSession, W: Write> App<S, W> {
    pub fn new(session: S, events: Receiver<AudioEvent>, out: W) -> Self {
        Self {
            session,
            events,
            out,
            input: SourceState::default(),
            output: SourceState::default(),
            pending_resyncs: Vec::new(),
        }
    }

    /// Consumes events until the stream closes. The subscription replays
    /// nothing, so one resynchronization up front seeds the feed with the
    /// current state.
    pub fn run(mut self) -> AppResult<()> {
        self.resync_devices()?;
        loop {
            let event = match self.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        self.fire_due_resyncs(now)?;
                        continue;
                    }
                    match self.events.recv_timeout(deadline - now) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(VolwatchError::EventStreamClosed)
                        }
                    }
                }
                None => self
                    .events
                    .recv()
                    .map_err(|_| VolwatchError::EventStreamClosed)?,
            };
            self.handle_event(event)?;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending_resyncs.iter().min().copied()
    }

    fn fire_due_resyncs(&mut self, now: Instant) -> AppResult<()> {
        let due = self.pending_resyncs.iter().filter(|&&t| t <= now).count();
        self.pending_resyncs.retain(|&t| t > now);
        for _ in 0..due {
            self.resync_devices()?;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: AudioEvent) -> AppResult<()> {
        use AudioEvent::*;
        match event {
            MixerChanged { node } => self.handle_mixer_changed(node),
            DeviceAdded { id, class } => {
                debug!("device {id} ({class:?}) added");
                self.handle_graph_changed()
            }
            DeviceRemoved { id, class } => {
                debug!("device {id} ({class:?}) removed");
                self.handle_graph_changed()
            }
        }
    }

    /// One immediate resynchronization, plus one delayed follow-up.
    fn handle_graph_changed(&mut self) -> AppResult<()> {
        self.resync_devices()?;
        self.pending_resyncs.push(Instant::now() + RESYNC_DELAY);
        Ok(())
    }

    /// Rebuilds per-source availability from a fresh enumeration and applies
    /// it unconditionally, even when nothing changed. The feed reports state,
    /// not diffs.
    fn resync_devices(&mut self) -> AppResult<()> {
        let devices = self.session.enumerate_devices()?;
        let has_output = devices.iter().any(|d| d.class == DeviceClass::Sink);
        let has_input = devices.iter().any(|d| d.class == DeviceClass::Source);
        debug!(
            "resync: {} devices, output={has_output}, input={has_input}",
            devices.len()
        );
        self.set_device_state(Source::Output, has_output)?;
        self.set_device_state(Source::Input, has_input)
    }

    /// Enabling resolves the current default; disabling stores the "no
    /// device" marker without a lookup. Both fields are written together and
    /// a line is always emitted.
    fn set_device_state(&mut self, source: Source, enabled: bool) -> AppResult<()> {
        let device = if enabled {
            self.resolve_default(source.class())?
        } else {
            DeviceId::NONE
        };
        let state = self.source_state_mut(source);
        state.enabled = Some(enabled);
        state.device = Some(device);
        self.report(source, device)
    }

    /// Retries through the transient unresolved reply, one attempt per
    /// completed barrier, for as long as it takes.
    fn resolve_default(&mut self, class: DeviceClass) -> AppResult<DeviceId> {
        loop {
            let device = self.session.default_device(class)?;
            if !device.is_invalid() {
                return Ok(device);
            }
            self.session.sync_barrier()?;
        }
    }

    /// Reprints whichever source the changed node is currently default for,
    /// if either. An output match wins and input is not checked at all.
    fn handle_mixer_changed(&mut self, node: DeviceId) -> AppResult<()> {
        if self.resolve_default(DeviceClass::Sink)? == node {
            return self.report(Source::Output, node);
        }
        if self.resolve_default(DeviceClass::Source)? == node {
            return self.report(Source::Input, node);
        }
        Ok(())
    }

    /// Emits one protocol line. An explicitly disabled source prints the bare
    /// `0` level token; the enabled (or not-yet-synced) path queries the
    /// device and prints two fractional digits.
    fn report(&mut self, source: Source, device: DeviceId) -> AppResult<()> {
        if self.source_state(source).enabled == Some(false) {
            writeln!(self.out, "{source}:0:false:false")?;
        } else {
            let reading = self.session.volume(source.class(), device)?;
            writeln!(
                self.out,
                "{source}:{:.2}:{}:true",
                reading.level, reading.muted
            )?;
        }
        // Piped stdout is block-buffered; the reader needs each line now.
        self.out.flush()?;
        Ok(())
    }

    fn source_state(&self, source: Source) -> &SourceState {
        match source {
            Source::Input => &self.input,
            Source::Output => &self.output,
        }
    }

    fn source_state_mut(&mut self, source: Source) -> &mut SourceState {
        match source {
            Source::Input => &mut self.input,
            Source::Output => &mut self.output,
        }
    }
}
