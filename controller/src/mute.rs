use admute_common::command::ActuationCommand;
use admute_common::label::Label;
use std::fmt;
use tracing::{debug, info, warn};

use crate::channel::{Actuator, ChannelError};

/// The controller's belief about the device's mute status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuteState {
    #[default]
    Unmuted,
    Muted,
}

impl fmt::Display for MuteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MuteState::Unmuted => "UNMUTED",
            MuteState::Muted => "MUTED",
        })
    }
}

/// The state `label` asks for when the controller is in `state`, or `None`
/// if no command is needed. `Unknown` never moves the state.
pub fn transition(state: MuteState, label: Label) -> Option<MuteState> {
    match (state, label) {
        (MuteState::Unmuted, Label::Ad) => Some(MuteState::Muted),
        (MuteState::Muted, Label::Show) => Some(MuteState::Unmuted),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub ads: u64,
    pub shows: u64,
    pub unknowns: u64,
    pub commands_sent: u64,
    pub command_failures: u64,
}

/// Turns a stream of labels into mute/unmute commands.
///
/// A command is sent only on a state change, and the state advances only
/// after the actuator accepted the command. A failed send leaves the state
/// where it was, so the next label asking for the same change retries it.
pub struct MuteController<A> {
    actuator: A,
    state: MuteState,
    mute_command: ActuationCommand,
    unmute_command: ActuationCommand,
    stats: ControllerStats,
}

impl<A: Actuator> MuteController<A> {
    pub fn new(actuator: A, mute_command: ActuationCommand, unmute_command: ActuationCommand) -> Self {
        Self {
            actuator,
            state: MuteState::Unmuted,
            mute_command,
            unmute_command,
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> MuteState {
        self.state
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    /// Feed one label. Returns the new state if a command was sent, `None`
    /// if no change was needed, or the channel error if the send failed.
    pub async fn apply(&mut self, label: Label) -> Result<Option<MuteState>, ChannelError> {
        match label {
            Label::Ad => self.stats.ads += 1,
            Label::Show => self.stats.shows += 1,
            Label::Unknown => self.stats.unknowns += 1,
        }

        let Some(target) = transition(self.state, label) else {
            debug!(%label, state = %self.state, "no state change");
            return Ok(None);
        };

        match self.actuate(target).await {
            Ok(()) => {
                info!(%label, from = %self.state, to = %target, "mute state changed");
                self.state = target;
                Ok(Some(target))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    %label,
                    state = %self.state,
                    wanted = %target,
                    "command failed, state unchanged"
                );
                Err(e)
            }
        }
    }

    async fn actuate(&mut self, target: MuteState) -> Result<(), ChannelError> {
        let command = match target {
            MuteState::Muted => &self.mute_command,
            MuteState::Unmuted => &self.unmute_command,
        };

        match self.actuator.send(command).await {
            Ok(reply) => {
                self.stats.commands_sent += 1;
                info!(device = self.actuator.name(), command = %command, "command sent");
                debug!(reply, "device reply");
                Ok(())
            }
            Err(e) => {
                self.stats.command_failures += 1;
                Err(e)
            }
        }
    }

    /// Leave the device unmuted and release the actuator.
    ///
    /// If the controller believes the device is muted, exactly one unmute is
    /// attempted; a failure is logged and otherwise ignored. The actuator is
    /// closed in every case.
    pub async fn shutdown(mut self) -> ControllerStats {
        if self.state == MuteState::Muted {
            info!("muted at shutdown, sending unmute");
            match self.actuate(MuteState::Unmuted).await {
                Ok(()) => self.state = MuteState::Unmuted,
                Err(e) => warn!(error = %e, "unmute on shutdown failed; device may stay muted"),
            }
        }
        self.actuator.close().await;
        info!(
            ads = self.stats.ads,
            shows = self.stats.shows,
            unknowns = self.stats.unknowns,
            commands_sent = self.stats.commands_sent,
            command_failures = self.stats.command_failures,
            final_state = %self.state,
            "mute controller stopped"
        );
        self.stats
    }
}
