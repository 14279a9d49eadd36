use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use derive_more::Display;

pub const BANNER_PREFIX: &str = "OK MPD ";
pub const OK_LINE: &str = "OK";
pub const ACK_PREFIX: &str = "ACK ";
pub const BINARY_PREFIX: &str = "binary: ";

pub fn prefixed<'a>(prefix: &str, s: &'a str) -> Option<&'a str> {
    if s.starts_with(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Split a raw response block into trimmed, non-empty logical lines.
/// Handles `\n\r`, `\n` and `\r` terminators alike.
pub fn split_lines(raw: &str) -> Vec<&str> {
    raw.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Server protocol version from the `OK MPD x.y.z` banner. The middle
/// number is what MPD bumps for protocol features, so that is the value
/// every capability gate compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("{major}.{minor}.{patch}")]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub fn from_banner(banner: &str) -> Result<ProtocolVersion> {
        let version = prefixed(BANNER_PREFIX, banner.trim())
            .ok_or_else(|| anyhow!("unexpected initial line from mpd: {banner:?}"))?;
        version.parse()
    }

    pub fn supports_search_window(&self) -> bool {
        self.minor > 19
    }

    pub fn supports_album_art(&self) -> bool {
        self.minor > 20
    }

    pub fn supports_readpicture(&self) -> bool {
        self.minor > 21
    }

    pub fn supports_binary_limit(&self) -> bool {
        self.minor > 21
    }

    pub fn supports_filters(&self) -> bool {
        self.minor >= 21
    }
}

impl FromStr for ProtocolVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<ProtocolVersion> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| anyhow!("malformed protocol version: {s:?}"))?
                .parse::<u32>()
                .with_context(|| format!("malformed protocol version: {s:?}"))
        };

        Ok(ProtocolVersion {
            major: next()?,
            minor: next()?,
            patch: next()?,
        })
    }
}

/// Key/value pairs of one response block, in wire order. Duplicate keys are
/// kept; song-listing responses are split into records on the `file` key.
#[derive(Debug, Default)]
pub struct Attributes {
    attrs: Vec<(String, String)>,
}

impl Attributes {
    pub fn parse(block: &str) -> Attributes {
        let mut attrs = Vec::new();
        for line in split_lines(block) {
            if let Some((key, value)) = line.split_once(':') {
                attrs.push((key.to_string(), value.trim_start().to_string()));
            }
        }
        Attributes { attrs }
    }

    pub fn get<T: FromStr<Err = E>, E: Send + Sync + std::error::Error + 'static>(
        &self,
        name: &str,
    ) -> Result<T> {
        Ok(self
            .get_one(name)
            .ok_or_else(|| anyhow!("missing {name} attribute"))?
            .parse()
            .with_context(|| format!("malformed {name} attribute"))?)
    }

    pub fn get_opt<T: FromStr<Err = E>, E: Send + Sync + std::error::Error + 'static>(
        &self,
        name: &str,
    ) -> Result<Option<T>> {
        self.get_one(name)
            .map(|value| {
                value
                    .parse()
                    .with_context(|| format!("malformed {name} attribute"))
            })
            .transpose()
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get_one(name) == Some("1")
    }

    pub fn get_one(&self, name: &str) -> Option<&'_ str> {
        Some(&self.attrs.iter().find(|(k, _)| k == name)?.1)
    }

    pub fn get_all<'a, 'n: 'a>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> {
        self.attrs
            .iter()
            .filter_map(move |(k, v)| if k == name { Some(v.as_str()) } else { None })
    }

    /// Split into records, starting a new record at each occurrence of
    /// `name`. Pairs before the first occurrence are discarded.
    pub fn split_at(self, name: &str) -> Vec<Attributes> {
        let mut splits = Vec::new();

        for (k, v) in self.attrs {
            if k == name {
                splits.push(Attributes::default());
            }

            if let Some(split) = splits.last_mut() {
                split.attrs.push((k, v));
            }
        }

        splits
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'_ str, &'_ str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Quote a command argument, escaping embedded quotes and backslashes.
pub fn quote(arg: &str) -> Result<String> {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => {
                bail!("newline in command argument");
            }
            _ => {
                quoted.push(c);
            }
        }
    }
    quoted.push('"');
    Ok(quoted)
}

/// Wrap sub-commands in MPD's batching envelope so the server executes them
/// as one atomic exchange, in order.
pub fn command_list<I, S>(commands: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut text = String::from("command_list_begin\n");
    for command in commands {
        text.push_str(command.as_ref());
        text.push('\n');
    }
    text.push_str("command_list_end");
    text
}

/// Whole seconds as `minutes:seconds`, seconds zero-padded.
pub fn format_time(raw: &str) -> String {
    let time = raw.trim().parse::<f64>().unwrap_or(0.0).floor() as u64;
    format!("{}:{:02}", time / 60, time % 60)
}

/// File paths cross the API boundary as base64-of-URI-encoded tokens so no
/// consumer has to guess at their encoding.
pub fn encode_file_token(path: &str) -> String {
    BASE64.encode(urlencoding::encode(path).as_bytes())
}

pub fn decode_file_token(token: &str) -> Result<String> {
    let bytes = BASE64.decode(token).context("decoding file token")?;
    let encoded = String::from_utf8(bytes).context("decoding file token")?;
    Ok(urlencoding::decode(&encoded)
        .context("decoding file token")?
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_round_trip() {
        let lines = vec!["file: a.flac", "Title: A", "Artist: B"];
        assert_eq!(split_lines(&lines.join("\r\n")), lines);
        assert_eq!(split_lines(&lines.join("\n")), lines);
        assert_eq!(split_lines(&lines.join("\r")), lines);
    }

    #[test]
    fn split_lines_trims_and_drops_empties() {
        assert_eq!(split_lines("  a  \n\n\r\n b\n"), vec!["a", "b"]);
        assert!(split_lines("\n  \n").is_empty());
    }

    #[test]
    fn banner_version() {
        let proto = ProtocolVersion::from_banner("OK MPD 0.21.11\n").unwrap();
        assert_eq!(proto, ProtocolVersion { major: 0, minor: 21, patch: 11 });
        assert!(proto.supports_album_art());
        assert!(!proto.supports_readpicture());

        let old = ProtocolVersion::from_banner("OK MPD 0.20.0").unwrap();
        assert!(!old.supports_album_art());
        assert!(old.supports_search_window());

        assert!(ProtocolVersion::from_banner("HELLO").is_err());
    }

    #[test]
    fn quote_escapes_embedded_quotes() {
        let album = quote(r#"He said "Go""#).unwrap();
        assert_eq!(format!("find album {album}"), r#"find album "He said \"Go\"""#);
        assert!(quote("a\nb").is_err());
    }

    #[test]
    fn command_list_shape() {
        let adds = ["add \"a.flac\"", "add \"b.flac\"", "add \"c.flac\""];
        let text = command_list(adds);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "command_list_begin");
        assert_eq!(&lines[1..4], &adds);
        assert_eq!(lines[4], "command_list_end");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_time("252"), "4:12");
        assert_eq!(format_time("252.74"), "4:12");
        assert_eq!(format_time("61"), "1:01");
        assert_eq!(format_time("9"), "0:09");
    }

    #[test]
    fn attribute_records_split_on_file() {
        let block = "Artist: ignored\nfile: a.flac\nTitle: A\nfile: b.flac\nTitle: B\n";
        let records = Attributes::parse(block).split_at("file");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_one("file"), Some("a.flac"));
        assert_eq!(records[0].get_one("Title"), Some("A"));
        assert_eq!(records[1].get_one("Title"), Some("B"));
    }

    #[test]
    fn attribute_lookup() {
        let attrs = Attributes::parse("volume: 50\nrepeat: 1\nstate: play\n");
        assert_eq!(attrs.get::<u32, _>("volume").unwrap(), 50);
        assert!(attrs.get_bool("repeat"));
        assert!(!attrs.get_bool("random"));
        assert!(attrs.get::<u32, _>("missing").is_err());
        assert_eq!(attrs.get_opt::<u32, _>("missing").unwrap(), None);
    }

    #[test]
    fn file_token_round_trip() {
        let path = "music/Artist Name/Album/01 - Track.flac";
        let token = encode_file_token(path);
        assert_eq!(decode_file_token(&token).unwrap(), path);
    }
}
