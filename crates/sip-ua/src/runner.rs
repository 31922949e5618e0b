// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A tokio task that owns a [`UserAgentCore`].
//!
//! The task selects over inbound messages, commands and the core's next
//! timer deadline; everything else talks to it through a
//! [`RunnerHandle`]. The core itself stays single-threaded.

use std::time::Instant;

use anyhow::{anyhow, Context};
use sip_core::SipMessage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::core::UserAgentCore;
use crate::timer::Clock;

/// Clock backed by tokio's time source, so paused test time drives the
/// core's timers too.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        time::Instant::now().into_std()
    }
}

type Job = Box<dyn FnOnce(&mut UserAgentCore) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

/// Cloneable handle to a running core.
#[derive(Clone)]
pub struct RunnerHandle {
    inbound: mpsc::UnboundedSender<SipMessage>,
    commands: mpsc::UnboundedSender<Command>,
}

impl RunnerHandle {
    /// Hands a message from the network to the core.
    pub fn deliver(&self, message: SipMessage) -> anyhow::Result<()> {
        self.inbound
            .send(message)
            .map_err(|_| anyhow!("user agent runner has stopped"))
    }

    /// Runs `f` on the core's task and returns its result.
    pub async fn execute<R, F>(&self, f: F) -> anyhow::Result<R>
    where
        F: FnOnce(&mut UserAgentCore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Run(Box::new(move |core| {
                let _ = tx.send(f(core));
            })))
            .map_err(|_| anyhow!("user agent runner has stopped"))?;
        rx.await.context("user agent runner dropped the command")
    }

    /// Asks the task to dispose of the core and stop.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| anyhow!("user agent runner has stopped"))
    }
}

/// Spawns the runner task. The task ends on [`RunnerHandle::shutdown`] or
/// once every handle is dropped, and yields the core back.
pub fn spawn(core: UserAgentCore) -> (RunnerHandle, JoinHandle<UserAgentCore>) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let handle = RunnerHandle {
        inbound: inbound_tx,
        commands: command_tx,
    };
    let task = tokio::spawn(run(core, inbound_rx, command_rx));
    (handle, task)
}

async fn run(
    mut core: UserAgentCore,
    mut inbound: mpsc::UnboundedReceiver<SipMessage>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> UserAgentCore {
    info!("user agent runner started");
    loop {
        let deadline = core.next_timer_deadline();
        let sleep = async {
            match deadline {
                Some(deadline) => time::sleep_until(time::Instant::from_std(deadline)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => core.receive_message(message),
                None => break,
            },
            command = commands.recv() => match command {
                Some(Command::Run(job)) => job(&mut core),
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep => {
                debug!("timer deadline reached");
                core.poll_timers();
            }
        }
    }
    core.dispose();
    info!("user agent runner stopped");
    core
}
