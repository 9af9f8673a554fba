use std::fmt;

/// Substring of the server notice that signals the client may proceed.
pub const AUTH_NOTICE: &str = "NOTICE Auth";
/// Prefix of a keep-alive ping. Everything after it is the payload.
pub const PING_PREFIX: &str = "PING :";
/// Sentinel closing a `NAMES` reply.
pub const END_OF_NAMES: &str = "End of /NAMES list.";
/// Numeric reply carrying one chunk of a `NAMES` listing.
pub const NAMES_REPLY: &str = "353";
/// Status prefixes that may precede a nickname in a `NAMES` reply.
pub const ROLE_MARKERS: &[char] = &['~', '&', '@', '%', '+'];

const CHANNEL_PREFIX: char = '#';

/// A channel name stored without its `#` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel(String);

impl Channel {
    /// Accepts `lobby` or `#lobby`.
    pub fn new(name: &str) -> Self {
        Self(name.trim().trim_start_matches(CHANNEL_PREFIX).to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CHANNEL_PREFIX}{}", self.0)
    }
}

/// Commands the client writes to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    User { name: String },
    Nick { name: String },
    Pong { payload: String },
    Names { channel: Channel },
    PrivMsg { target: String, text: String },
    Quit,
}

impl ClientCommand {
    /// Wire form, terminated with `\r\n`.
    pub fn encode(&self) -> String {
        format!("{self}\r\n")
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { name } => write!(f, "USER {name} 0 * :{name}"),
            Self::Nick { name } => write!(f, "NICK {name}"),
            Self::Pong { payload } => write!(f, "PONG :{payload}"),
            Self::Names { channel } => write!(f, "NAMES {channel}"),
            Self::PrivMsg { target, text } => {
                // A stray CR would let relayed text smuggle in a second command.
                write!(f, "PRIVMSG {target} :{}", text.replace('\r', ""))
            }
            Self::Quit => f.write_str("QUIT"),
        }
    }
}

pub fn is_auth_notice(line: &str) -> bool {
    line.contains(AUTH_NOTICE)
}

/// Payload of a keep-alive ping, if the line is one.
pub fn ping_payload(line: &str) -> Option<&str> {
    line.strip_prefix(PING_PREFIX)
}

pub fn is_end_of_names(line: &str) -> bool {
    line.contains(END_OF_NAMES)
}

/// Text following `#channel` in a roster line.
///
/// The marker must stand alone: `#room` does not match inside `#roomba`.
/// Channel names compare ASCII case-insensitively.
pub fn after_channel_marker<'a>(line: &'a str, channel: &Channel) -> Option<&'a str> {
    let marker = channel.to_string().to_ascii_lowercase();
    let haystack = line.to_ascii_lowercase();

    let mut from = 0;
    while let Some(offset) = haystack[from..].find(&marker) {
        let start = from + offset;
        let end = start + marker.len();
        let bounded_before = start == 0 || haystack.as_bytes()[start - 1] == b' ';
        let bounded_after = end == haystack.len() || haystack.as_bytes()[end] == b' ';
        if bounded_before && bounded_after {
            return Some(&line[end..]);
        }
        from = start + 1;
    }
    None
}

/// Command word of a server line: the first token, or the second when the
/// line opens with a `:source` prefix.
pub fn command_of(line: &str) -> Option<&str> {
    let mut tokens = line.split(' ').filter(|token| !token.is_empty());
    let first = tokens.next()?;
    if first.starts_with(':') {
        tokens.next()
    } else {
        Some(first)
    }
}

/// Whether a line that names the channel may list its members.
///
/// Numerics other than `353` and named commands (`482`, `KICK`, `PRIVMSG`)
/// mention channels too but never carry a roster. A line without a
/// recognisable command word is taken as a bare roster listing.
pub fn may_carry_roster(line: &str) -> bool {
    match command_of(line) {
        Some(NAMES_REPLY) => true,
        Some(command) => !is_command_word(command),
        None => false,
    }
}

fn is_command_word(token: &str) -> bool {
    let numeric = token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit());
    numeric || token.bytes().all(|b| b.is_ascii_alphabetic())
}

/// Nicknames listed after the channel marker, in order, with the
/// trailing-parameter `:` dropped.
pub fn roster_tokens(rest: &str) -> impl Iterator<Item = &str> {
    let rest = rest.trim_start_matches(' ');
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    rest.split(' ').filter(|token| !token.is_empty())
}

/// Removes at most one leading role marker.
pub fn strip_role_marker(token: &str) -> &str {
    token.strip_prefix(ROLE_MARKERS).unwrap_or(token)
}
