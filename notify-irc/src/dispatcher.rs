use std::future::Future;

use anyhow::{Result, bail};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    cli::RelayConfig,
    names::MembershipResolver,
    protocol::ClientCommand,
    state::{ConnectionState, ProtocolStateMachine},
    transport::{LineStream, ServerWriter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Continue,
    LocalClosed,
}

/// Single control flow that polls the server and local input in turn.
///
/// Each tick drains every buffered server line first. Local input is only
/// read once the connection is ready, and each local line runs a full
/// `NAMES` lookup and fan-out before the next one is read.
pub struct Dispatcher<S, L, W> {
    config: RelayConfig,
    server: LineStream<S>,
    local: LineStream<L>,
    writer: ServerWriter<W>,
    machine: ProtocolStateMachine,
    resolver: MembershipResolver,
}

impl<S, L, W> Dispatcher<S, L, W>
where
    S: AsyncRead + Unpin,
    L: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        config: RelayConfig,
        server: LineStream<S>,
        local: L,
        writer: ServerWriter<W>,
    ) -> Self {
        let local = LineStream::new("stdin", local, config.line_capacity);
        let resolver = MembershipResolver::new(config.channel.clone(), config.names_timeout);
        Self {
            config,
            server,
            local,
            writer,
            machine: ProtocolStateMachine::new(),
            resolver,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Registers, then polls until `shutdown` resolves or local input ends.
    /// Either way the session is closed with `QUIT`.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        self.register().await?;

        loop {
            let tick = select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                tick = self.tick() => tick?,
            };

            if tick == Tick::LocalClosed {
                info!("local input closed");
                break;
            }

            select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.quit().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    async fn register(&mut self) -> Result<()> {
        let nick = self.config.nick.clone();
        self.writer
            .send(&ClientCommand::User { name: nick.clone() })
            .await?;
        self.writer.send(&ClientCommand::Nick { name: nick }).await
    }

    async fn tick(&mut self) -> Result<Tick> {
        while let Some(line) = self.server.try_next_line()? {
            if let Some(reply) = self.machine.handle_line(&line) {
                self.writer.send(&reply).await?;
            }
        }
        if self.server.is_closed() {
            bail!("server closed the connection");
        }

        if !self.machine.is_ready() {
            return Ok(Tick::Continue);
        }

        while let Some(line) = self.local.try_next_line()? {
            self.relay(&line).await?;
        }

        if self.local.is_closed() {
            Ok(Tick::LocalClosed)
        } else {
            Ok(Tick::Continue)
        }
    }

    async fn relay(&mut self, line: &str) -> Result<()> {
        debug!(line, "received from stdin");
        if line.is_empty() {
            return Ok(());
        }

        let resolved = self
            .resolver
            .resolve(&mut self.server, &mut self.writer, &mut self.machine)
            .await?;
        let Some(members) = resolved else {
            warn!(line, "dropping line, channel roster unavailable");
            return Ok(());
        };

        let own_nick = &self.config.nick;
        let recipients: Vec<String> = members
            .into_iter()
            .filter(|nick| !self.config.skip_self || !nick.eq_ignore_ascii_case(own_nick))
            .collect();

        for target in &recipients {
            self.writer
                .send(&ClientCommand::PrivMsg {
                    target: target.clone(),
                    text: line.to_string(),
                })
                .await?;
        }

        info!(
            channel = %self.config.channel,
            recipients = recipients.len(),
            "relayed line"
        );
        Ok(())
    }

    async fn quit(&mut self) {
        if self.writer.unsent() > 0 {
            debug!(bytes = self.writer.unsent(), "finishing interrupted command before QUIT");
        }
        if let Err(error) = self.writer.send(&ClientCommand::Quit).await {
            warn!(?error, "failed to send QUIT");
        }
        self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex},
        sync::oneshot,
        task::JoinHandle,
        time::timeout,
    };

    use super::*;
    use crate::protocol::Channel;

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> RelayConfig {
        RelayConfig {
            nick: "alice".into(),
            channel: Channel::new("lobby"),
            poll_interval: Duration::from_millis(10),
            names_timeout: Duration::from_secs(1),
            skip_self: false,
            line_capacity: 2048,
        }
    }

    struct Harness {
        from_client: BufReader<DuplexStream>,
        to_client: DuplexStream,
        stdin: Option<DuplexStream>,
        shutdown: Option<oneshot::Sender<()>>,
        task: JoinHandle<Result<()>>,
    }

    impl Harness {
        fn start(config: RelayConfig) -> Self {
            Self::with_pipe(config, 8192)
        }

        /// `pipe` bounds how many unread bytes the client can write.
        fn with_pipe(config: RelayConfig, pipe: usize) -> Self {
            let (client_out, from_client) = duplex(pipe);
            let (to_client, client_in) = duplex(8192);
            let (stdin, local) = duplex(8192);

            let capacity = config.line_capacity;
            let dispatcher = Dispatcher::new(
                config,
                LineStream::new("server", client_in, capacity),
                local,
                ServerWriter::new(client_out),
            );
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let task = tokio::spawn(dispatcher.run_until(async move {
                let _ = shutdown_rx.await;
            }));

            Self {
                from_client: BufReader::new(from_client),
                to_client,
                stdin: Some(stdin),
                shutdown: Some(shutdown_tx),
                task,
            }
        }

        async fn server_says(&mut self, text: &str) {
            self.to_client
                .write_all(text.as_bytes())
                .await
                .expect("write to client");
        }

        async fn type_line(&mut self, text: &str) {
            let stdin = self.stdin.as_mut().expect("stdin open");
            stdin.write_all(text.as_bytes()).await.expect("write stdin");
        }

        async fn expect_line(&mut self) -> String {
            let mut line = String::new();
            let read = timeout(WAIT, self.from_client.read_line(&mut line))
                .await
                .expect("client line before timeout")
                .expect("read client line");
            assert!(read > 0, "client closed the connection");
            line
        }

        async fn registered(&mut self) {
            assert_eq!(self.expect_line().await, "USER alice 0 * :alice\r\n");
            assert_eq!(self.expect_line().await, "NICK alice\r\n");
        }

        async fn stop(mut self) -> Vec<String> {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            let result = timeout(WAIT, &mut self.task)
                .await
                .expect("dispatcher stops")
                .expect("dispatcher task");
            result.expect("dispatcher result");
            self.rest().await
        }

        async fn rest(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            loop {
                let mut line = String::new();
                let read = timeout(WAIT, self.from_client.read_line(&mut line))
                    .await
                    .expect("line before timeout")
                    .expect("read client line");
                if read == 0 {
                    return lines;
                }
                lines.push(line);
            }
        }
    }

    #[tokio::test]
    async fn local_input_waits_for_auth_notice() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness.type_line("hello\n").await;
        harness.server_says(":irc.local 001 alice :Welcome\r\n").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn relays_line_to_each_member_in_order() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness
            .server_says(":irc.local NOTICE Auth :*** Looking up your hostname...\r\n")
            .await;
        harness.type_line("hello\n").await;

        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");
        harness
            .server_says(
                ":irc.local 353 alice = #lobby :bob @carol\r\n\
                 :irc.local 366 alice #lobby :End of /NAMES list.\r\n",
            )
            .await;

        assert_eq!(harness.expect_line().await, "PRIVMSG bob :hello\r\n");
        assert_eq!(harness.expect_line().await, "PRIVMSG carol :hello\r\n");
        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn answers_ping_once_ready() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness
            .server_says("NOTICE Auth :ok\r\nPING :abc123\r\n")
            .await;

        assert_eq!(harness.expect_line().await, "PONG :abc123\r\n");
        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn messages_every_member_including_self() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness.server_says("NOTICE Auth :ok\r\n").await;
        harness.type_line("ping\n").await;

        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");
        harness
            .server_says(
                ":irc.local 353 alice = #lobby :@alice bob\r\n\
                 :irc.local 366 alice #lobby :End of /NAMES list.\r\n",
            )
            .await;

        assert_eq!(harness.expect_line().await, "PRIVMSG alice :ping\r\n");
        assert_eq!(harness.expect_line().await, "PRIVMSG bob :ping\r\n");
        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn skip_self_leaves_out_own_nick() {
        let mut harness = Harness::start(RelayConfig {
            skip_self: true,
            ..config()
        });
        harness.registered().await;

        harness.server_says("NOTICE Auth :ok\r\n").await;
        harness.type_line("note\n").await;

        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");
        harness
            .server_says(
                ":s 353 alice = #lobby :@Alice bob\r\n\
                 :s 366 alice #lobby :End of /NAMES list.\r\n",
            )
            .await;

        assert_eq!(harness.expect_line().await, "PRIVMSG bob :note\r\n");
        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn whitespace_line_is_relayed_and_empty_line_skipped() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness.server_says("NOTICE Auth :ok\r\n").await;
        harness.type_line("\n   \n").await;

        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");
        harness
            .server_says(
                ":s 353 alice = #lobby :bob\r\n\
                 :s 366 alice #lobby :End of /NAMES list.\r\n",
            )
            .await;

        assert_eq!(harness.expect_line().await, "PRIVMSG bob :   \r\n");
        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn shutdown_during_lookup_still_quits() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness.server_says("NOTICE Auth :ok\r\n").await;
        harness.type_line("hello\n").await;
        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");

        // No roster ever arrives; shutdown has to cut the lookup short.
        assert_eq!(harness.stop().await, vec!["QUIT\r\n"]);
    }

    #[tokio::test]
    async fn shutdown_mid_fan_out_keeps_lines_whole() {
        let mut harness = Harness::with_pipe(config(), 32);
        harness.registered().await;

        harness.server_says("NOTICE Auth :ok\r\n").await;
        harness.type_line("a line much longer than the pipe\n").await;
        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");
        harness
            .server_says(
                ":s 353 alice = #lobby :bob carol\r\n\
                 :s 366 alice #lobby :End of /NAMES list.\r\n",
            )
            .await;

        // Nobody reads, so the first PRIVMSG stalls part way into the pipe.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(shutdown) = harness.shutdown.take() {
            let _ = shutdown.send(());
        }

        assert_eq!(
            harness.rest().await,
            vec![
                "PRIVMSG bob :a line much longer than the pipe\r\n",
                "QUIT\r\n"
            ]
        );
        let result = timeout(WAIT, &mut harness.task)
            .await
            .expect("dispatcher stops")
            .expect("dispatcher task");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn end_of_local_input_quits() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        harness.server_says("NOTICE Auth :ok\r\n").await;
        harness.type_line("bye").await;
        drop(harness.stdin.take());

        assert_eq!(harness.expect_line().await, "NAMES #lobby\r\n");
        harness
            .server_says(
                ":s 353 alice = #lobby :bob\r\n\
                 :s 366 alice #lobby :End of /NAMES list.\r\n",
            )
            .await;

        assert_eq!(harness.expect_line().await, "PRIVMSG bob :bye\r\n");
        assert_eq!(harness.expect_line().await, "QUIT\r\n");

        let result = timeout(WAIT, &mut harness.task)
            .await
            .expect("dispatcher stops")
            .expect("dispatcher task");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn server_disconnect_is_fatal() {
        let mut harness = Harness::start(config());
        harness.registered().await;

        let Harness { to_client, task, .. } = harness;
        drop(to_client);

        let result = timeout(WAIT, task)
            .await
            .expect("dispatcher stops")
            .expect("dispatcher task");
        let err = result.expect_err("closed server should fail the session");
        assert!(err.to_string().contains("server closed the connection"));
    }

    #[tokio::test]
    async fn oversized_server_line_is_fatal() {
        let mut harness = Harness::start(RelayConfig {
            line_capacity: 64,
            ..config()
        });
        harness.registered().await;

        harness.server_says(&"x".repeat(4096)).await;

        let result = timeout(WAIT, &mut harness.task)
            .await
            .expect("dispatcher stops")
            .expect("dispatcher task");
        assert!(result.is_err());
    }
}
