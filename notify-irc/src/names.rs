//! Channel membership lookup via `NAMES`.
//!
//! A lookup is a nested exchange: the query goes out, then server lines are
//! consumed in arrival order until the end-of-list sentinel. Local input is
//! not looked at while a lookup is running.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    protocol::{
        Channel, ClientCommand, after_channel_marker, is_end_of_names, may_carry_roster,
        roster_tokens, strip_role_marker,
    },
    state::ProtocolStateMachine,
    transport::{LineStream, ServerWriter},
};

pub struct MembershipResolver {
    channel: Channel,
    timeout: Duration,
}

impl MembershipResolver {
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Recipients named on one roster line, in order. Lines that do not
    /// mention the channel yield nothing.
    pub fn recipients_in(&self, line: &str) -> Vec<String> {
        after_channel_marker(line, &self.channel)
            .map(|rest| {
                roster_tokens(rest)
                    .map(strip_role_marker)
                    .filter(|nick| !nick.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queries the channel roster.
    ///
    /// Returns `Ok(None)` when the sentinel does not arrive within the
    /// configured timeout. Lines that are not part of the roster still go
    /// through `machine`, so keep-alive pings are answered meanwhile.
    pub async fn resolve<R, W>(
        &self,
        server: &mut LineStream<R>,
        writer: &mut ServerWriter<W>,
        machine: &mut ProtocolStateMachine,
    ) -> Result<Option<Vec<String>>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer
            .send(&ClientCommand::Names {
                channel: self.channel.clone(),
            })
            .await?;

        match timeout(self.timeout, self.collect(server, writer, machine)).await {
            Ok(members) => members.map(Some),
            Err(_) => {
                warn!(
                    channel = %self.channel,
                    timeout = ?self.timeout,
                    "no end of NAMES list before timeout"
                );
                Ok(None)
            }
        }
    }

    async fn collect<R, W>(
        &self,
        server: &mut LineStream<R>,
        writer: &mut ServerWriter<W>,
        machine: &mut ProtocolStateMachine,
    ) -> Result<Vec<String>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut members = Vec::new();

        loop {
            let Some(line) = server.next_line().await? else {
                bail!("server closed the connection while listing {}", self.channel);
            };

            if is_end_of_names(&line) {
                debug!(%line, "end of roster");
                return Ok(members);
            }

            if may_carry_roster(&line) && after_channel_marker(&line, &self.channel).is_some() {
                let found = self.recipients_in(&line);
                debug!(%line, ?found, "roster line");
                members.extend(found);
            } else if let Some(reply) = machine.handle_line(&line) {
                writer.send(&reply).await?;
            }
        }
    }
}
