//! The five-verb protocol parser.
//!
//! Parsing is slice-based: a line borrowed from the codec is tokenised by a
//! single `splitn` rather than mutated in place, which is both simpler and
//! lets the caller keep the original line around for logging.

/// Channel names and announce bodies longer than this are treated as garbage
/// rather than disconnecting the peer, for consistency with the input-buffer
/// ceiling in `codec`.
pub const MAX_TOKEN_LEN: usize = 16 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Ping,
    Info,
    Announce { channel: &'a str, body: &'a [u8] },
    Subscribe { channel: &'a str },
    Unsubscribe { channel: &'a str },
    /// Anything that isn't one of the four verbs above, or a verb whose
    /// arguments fail validation. The peer stays connected.
    Garbage,
}

/// Parse one already-newline-stripped line into a `Command`.
pub fn parse(line: &[u8]) -> Command<'_> {
    if line == b"ping" {
        return Command::Ping;
    }
    if line == b"info" {
        return Command::Info;
    }

    let Some(first_space) = line.iter().position(|&b| b == b' ') else {
        return Command::Garbage;
    };
    let verb = &line[..first_space];
    let rest = &line[first_space + 1..];

    match verb {
        b"announce" => parse_announce(rest),
        b"subscribe" => parse_channel_arg(rest, |channel| Command::Subscribe { channel }),
        b"unsubscribe" => parse_channel_arg(rest, |channel| Command::Unsubscribe { channel }),
        _ => Command::Garbage,
    }
}

fn parse_announce(rest: &[u8]) -> Command<'_> {
    let Some(second_space) = rest.iter().position(|&b| b == b' ') else {
        return Command::Garbage;
    };
    let channel = &rest[..second_space];
    let body = &rest[second_space + 1..];

    if channel.is_empty()
        || channel.len() > MAX_TOKEN_LEN
        || body.len() > MAX_TOKEN_LEN
        || channel.iter().any(u8::is_ascii_whitespace)
    {
        return Command::Garbage;
    }
    let Ok(channel) = std::str::from_utf8(channel) else {
        return Command::Garbage;
    };

    Command::Announce { channel, body }
}

fn parse_channel_arg<'a>(
    rest: &'a [u8],
    make: impl FnOnce(&'a str) -> Command<'a>,
) -> Command<'a> {
    // Only the first whitespace-delimited token is the channel; anything
    // after it is unused, matching `strtok(line, " ")` taking one token per
    // call rather than the whole remainder of the line.
    let end = rest.iter().position(u8::is_ascii_whitespace).unwrap_or(rest.len());
    let channel = &rest[..end];

    if channel.is_empty() || channel.len() > MAX_TOKEN_LEN {
        return Command::Garbage;
    }
    let Ok(channel) = std::str::from_utf8(channel) else {
        return Command::Garbage;
    };
    if channel.contains('!') {
        return Command::Garbage;
    }

    make(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_verbs() {
        assert_eq!(parse(b"ping"), Command::Ping);
        assert_eq!(parse(b"info"), Command::Info);
    }

    #[test]
    fn announce_body_may_contain_spaces() {
        assert_eq!(
            parse(b"announce news hello world"),
            Command::Announce { channel: "news", body: b"hello world" }
        );
    }

    #[test]
    fn announce_with_empty_body_parses_but_is_still_announce() {
        // "announce news " (trailing space, nothing after) -> empty body.
        // Dropping an empty-body announce is the engine's job, not the parser's.
        assert_eq!(
            parse(b"announce news "),
            Command::Announce { channel: "news", body: b"" }
        );
    }

    #[test]
    fn subscribe_and_unsubscribe_single_token() {
        assert_eq!(parse(b"subscribe news"), Command::Subscribe { channel: "news" });
        assert_eq!(parse(b"unsubscribe news"), Command::Unsubscribe { channel: "news" });
    }

    #[test]
    fn subscribe_rejects_reserved_separator() {
        assert_eq!(parse(b"subscribe bad!name"), Command::Garbage);
        assert_eq!(parse(b"unsubscribe bad!name"), Command::Garbage);
    }

    #[test]
    fn subscribe_ignores_tokens_past_the_channel() {
        assert_eq!(parse(b"subscribe news extra"), Command::Subscribe { channel: "news" });
        assert_eq!(parse(b"unsubscribe news extra stuff"), Command::Unsubscribe { channel: "news" });
    }

    #[test]
    fn missing_first_two_tokens_is_garbage() {
        assert_eq!(parse(b""), Command::Garbage);
        assert_eq!(parse(b"subscribe"), Command::Garbage);
        assert_eq!(parse(b"blah blah blah"), Command::Garbage);
    }

    #[test]
    fn oversized_channel_or_body_is_garbage() {
        let long_channel = "a".repeat(MAX_TOKEN_LEN + 1);
        let line = format!("subscribe {long_channel}");
        assert_eq!(parse(line.as_bytes()), Command::Garbage);

        let long_body = "b".repeat(MAX_TOKEN_LEN + 1);
        let line = format!("announce news {long_body}");
        assert_eq!(parse(line.as_bytes()), Command::Garbage);
    }
}
