// SPDX-License-Identifier: MPL-2.0

use calloop::channel::{self, Channel, Sender};
use live_bg_config::AspectMode;
use tracing::warn;

/// Compositor changes requested from outside the compositor's own callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetAspect(AspectMode),
}

/// Cloneable, `Send` handle that redispatches commands onto the event loop
/// owning the compositor.
#[derive(Debug, Clone)]
pub struct CompositorHandle {
    sender: Sender<Command>,
}

impl CompositorHandle {
    /// Creates the handle and the channel to insert into the event loop.
    pub fn new() -> (Self, Channel<Command>) {
        let (sender, channel) = channel::channel();
        (Self { sender }, channel)
    }

    pub fn send(&self, command: Command) {
        if let Err(why) = self.sender.send(command) {
            warn!(command = ?why.0, "compositor is gone, dropping command");
        }
    }

    pub fn set_aspect_mode(&self, mode: AspectMode) {
        self.send(Command::SetAspect(mode));
    }
}
