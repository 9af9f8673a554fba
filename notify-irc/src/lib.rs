//! Relay local input lines to every member of an IRC channel.
//!
//! The client registers a nickname, waits for the server's auth notice, then
//! turns each line read from stdin into one private message per channel
//! member. Each module focuses on one concern:
//!
//! - [`framer`] splits byte streams into lines across partial reads.
//! - [`transport`] connects to the server and polls readers without blocking.
//! - [`protocol`] encodes client commands and classifies server lines.
//! - [`state`] tracks readiness and answers keep-alive pings.
//! - [`names`] runs the `NAMES` lookup used to find recipients.
//! - [`dispatcher`] owns the poll loop tying the pieces together.
//! - [`cli`] parses the command line into a [`cli::RelayConfig`].

pub mod cli;
pub mod dispatcher;
pub mod framer;
pub mod names;
pub mod protocol;
pub mod state;
pub mod transport;
