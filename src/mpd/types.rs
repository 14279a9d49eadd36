use std::collections::BTreeMap;

use anyhow::{Result, bail};
use derive_more::FromStr;
use serde::Serialize;

use crate::mpd::protocol::{self, Attributes};

#[derive(Debug, Copy, Clone, FromStr, Serialize)]
pub struct Seconds(pub f64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Stop,
    Pause,
    Play,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayGainMode {
    Off,
    Track,
    Album,
    Auto,
}

impl ReplayGainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayGainMode::Off => "off",
            ReplayGainMode::Track => "track",
            ReplayGainMode::Album => "album",
            ReplayGainMode::Auto => "auto",
        }
    }

    fn parse(s: &str) -> Option<ReplayGainMode> {
        match s {
            "off" => Some(ReplayGainMode::Off),
            "track" => Some(ReplayGainMode::Track),
            "album" => Some(ReplayGainMode::Album),
            "auto" => Some(ReplayGainMode::Auto),
            _ => None,
        }
    }
}

/// One song record. Doubles as a queue/playlist entry, where `id` and `pos`
/// are present.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Song {
    pub file: String,
    pub file_token: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track: Option<String>,
    /// Formatted playing time, `m:ss`.
    pub time: Option<String>,
    pub seconds: Option<f64>,
    pub name: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    pub performer: Option<String>,
    pub composer: Option<String>,
    pub id: Option<u32>,
    pub pos: Option<u32>,
}

impl Song {
    pub fn from_attributes(attrs: &Attributes) -> Result<Song> {
        let file: String = attrs.get("file")?;
        let file_token = protocol::encode_file_token(&file);

        // `duration` (fractional, newer servers) wins over `Time`.
        let raw_time = attrs
            .get_one("duration")
            .or_else(|| attrs.get_one("Time"))
            .map(str::to_owned);

        Ok(Song {
            file,
            file_token,
            title: attrs.get_one("Title").map(str::to_owned),
            artist: attrs.get_one("Artist").map(str::to_owned),
            album: attrs.get_one("Album").map(str::to_owned),
            album_artist: attrs.get_one("AlbumArtist").map(str::to_owned),
            track: attrs.get_one("Track").map(str::to_owned),
            time: raw_time.as_deref().map(protocol::format_time),
            seconds: raw_time.and_then(|raw| raw.parse().ok()),
            name: attrs.get_one("Name").map(str::to_owned),
            date: attrs.get_one("Date").map(str::to_owned),
            comment: attrs.get_one("comment").map(str::to_owned),
            performer: attrs.get_one("performer").map(str::to_owned),
            composer: attrs.get_one("composer").map(str::to_owned),
            id: attrs.get_opt("Id")?,
            pos: attrs.get_opt("Pos")?,
        })
    }
}

pub fn songs_from_attributes(attrs: Attributes) -> Result<Vec<Song>> {
    attrs
        .split_at("file")
        .iter()
        .map(Song::from_attributes)
        .collect()
}

fn track_number(track: &str) -> Option<u32> {
    let digits: String = track.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Album tracklist order: track number when both sides have one, falling
/// back to title, then to file path.
pub fn sort_songs(songs: &mut [Song]) {
    songs.sort_by(|a, b| match (&a.track, &b.track) {
        (Some(ta), Some(tb)) => match (track_number(ta), track_number(tb)) {
            (Some(na), Some(nb)) => na.cmp(&nb),
            _ => a.title.cmp(&b.title),
        },
        _ => a.file.cmp(&b.file),
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artist {
    pub name: String,
}

fn artist_sort_key(name: &str) -> &str {
    // "The Beatles" sorts as "Beatles", but "The The" stays put.
    let mut words = name.split(' ');
    match (words.next(), words.next()) {
        (Some(first), Some(second))
            if first.eq_ignore_ascii_case("the") && !second.eq_ignore_ascii_case("the") =>
        {
            name[first.len()..].trim_start()
        }
        _ => name,
    }
}

pub fn sort_artists(artists: &mut [Artist]) {
    artists.sort_by(|a, b| artist_sort_key(&a.name).cmp(artist_sort_key(&b.name)));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Album {
    pub name: String,
    pub artist: Option<String>,
    pub date: Option<String>,
}

pub fn sort_albums_by_name(albums: &mut [Album]) {
    albums.sort_by(|a, b| a.name.cmp(&b.name));
}

pub fn sort_albums_by_artist(albums: &mut [Album]) {
    albums.sort_by(|a, b| match (&a.artist, &b.artist) {
        (Some(aa), Some(ba)) => aa.cmp(ba),
        _ => a.name.cmp(&b.name),
    });
}

const UNDATED: u32 = 100_000;

pub fn sort_albums_by_date(albums: &mut [Album]) {
    let year = |album: &Album| {
        album
            .date
            .as_deref()
            .and_then(track_number)
            .unwrap_or(UNDATED)
    };
    albums.sort_by_key(year);
}

#[derive(Debug, Clone, Serialize)]
pub struct Output {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

pub fn outputs_from_attributes(attrs: Attributes) -> Result<Vec<Output>> {
    attrs
        .split_at("outputid")
        .into_iter()
        .map(|record| {
            Ok(Output {
                id: record.get("outputid")?,
                name: record.get("outputname")?,
                enabled: record.get_bool("outputenabled"),
            })
        })
        .collect()
}

/// Genre name to the albums carrying it, from `list genre group album`.
pub type GenreAlbums = BTreeMap<String, Vec<String>>;

pub fn genres_from_attributes(attrs: &Attributes) -> GenreAlbums {
    let mut genres = GenreAlbums::new();
    let mut current_album: Option<&str> = None;

    for (key, value) in attrs.iter() {
        match key {
            "Album" => current_album = Some(value),
            "Genre" if !value.is_empty() => {
                let albums = genres.entry(value.to_string()).or_default();
                if let Some(album) = current_album.filter(|album| !album.is_empty()) {
                    albums.push(album.to_string());
                }
            }
            _ => {}
        }
    }

    genres
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub file: String,
    pub file_token: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub dir: String,
    pub dir_token: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileList {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirEntry>,
}

impl FileList {
    pub fn sort(&mut self, by_title: bool) {
        self.files.sort_by(|a, b| {
            if by_title {
                match (&a.title, &b.title) {
                    (Some(ta), Some(tb)) => ta.cmp(tb),
                    // Untitled entries fall back to reverse file order, as a
                    // crude newest-first approximation.
                    _ => b.file.cmp(&a.file),
                }
            } else {
                a.file.cmp(&b.file)
            }
        });
        self.dirs.sort_by(|a, b| a.dir.cmp(&b.dir));
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentSong {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub name: Option<String>,
    pub date: Option<String>,
    pub track: Option<String>,
    pub file: Option<String>,
    pub file_token: Option<String>,
}

impl CurrentSong {
    pub fn from_attributes(attrs: &Attributes) -> CurrentSong {
        let file = attrs.get_one("file").map(str::to_owned);
        CurrentSong {
            title: attrs.get_one("Title").map(str::to_owned),
            artist: attrs.get_one("Artist").map(str::to_owned),
            album: attrs.get_one("Album").map(str::to_owned),
            name: attrs.get_one("Name").map(str::to_owned),
            date: attrs.get_one("Date").map(str::to_owned),
            track: attrs.get_one("Track").map(str::to_owned),
            file_token: file.as_deref().map(protocol::encode_file_token),
            file,
        }
    }
}

/// Parsed composite of `status` + `currentsong` + `replay_gain_status`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: PlayerState,
    pub volume: Option<i32>,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
    pub playlist_version: Option<u32>,
    pub playlist_length: u32,
    pub song_pos: Option<u32>,
    pub song_id: Option<u32>,
    pub elapsed: Option<Seconds>,
    pub duration: Option<Seconds>,
    pub bitrate: Option<String>,
    pub audio: Option<String>,
    pub crossfade: Option<u32>,
    pub replay_gain: Option<ReplayGainMode>,
    pub updating_db: Option<u32>,
    pub error: Option<String>,
    pub current_song: CurrentSong,
}

impl Status {
    pub fn from_attributes(attrs: &Attributes) -> Result<Status> {
        let state = match attrs.get_one("state") {
            Some("play") => PlayerState::Play,
            Some("pause") => PlayerState::Pause,
            Some("stop") => PlayerState::Stop,
            Some(state) => bail!("unknown player state: {state}"),
            None => bail!("missing player state"),
        };

        Ok(Status {
            state,
            volume: attrs.get_opt("volume")?,
            repeat: attrs.get_bool("repeat"),
            random: attrs.get_bool("random"),
            single: attrs.get_bool("single"),
            consume: attrs.get_bool("consume"),
            playlist_version: attrs.get_opt("playlist")?,
            playlist_length: attrs.get_opt("playlistlength")?.unwrap_or(0),
            song_pos: attrs.get_opt("song")?,
            song_id: attrs.get_opt("songid")?,
            elapsed: attrs.get_opt("elapsed")?,
            duration: attrs.get_opt("duration")?,
            bitrate: attrs.get_one("bitrate").map(str::to_owned),
            audio: attrs.get_one("audio").map(str::to_owned),
            crossfade: attrs.get_opt("xfade")?,
            replay_gain: attrs.get_one("replay_gain_mode").and_then(ReplayGainMode::parse),
            updating_db: attrs.get_opt("updating_db")?,
            error: attrs.get_one("error").map(str::to_owned),
            current_song: CurrentSong::from_attributes(attrs),
        })
    }
}

/// Library totals from `stats`, cached on the session after connect.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Stats {
    pub songs: u64,
    pub artists: u64,
    pub albums: u64,
}

impl Stats {
    pub fn from_attributes(attrs: &Attributes) -> Result<Stats> {
        Ok(Stats {
            songs: attrs.get_opt("songs")?.unwrap_or(0),
            artists: attrs.get_opt("artists")?.unwrap_or(0),
            albums: attrs.get_opt("albums")?.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(name: &str) -> Artist {
        Artist { name: name.to_string() }
    }

    #[test]
    fn artist_sort_ignores_leading_the() {
        let mut artists = vec![artist("The Beatles"), artist("Abba"), artist("The Who")];
        sort_artists(&mut artists);
        let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["Abba", "The Beatles", "The Who"]);
    }

    #[test]
    fn artist_sort_keeps_the_the() {
        assert_eq!(artist_sort_key("The The"), "The The");
        assert_eq!(artist_sort_key("The"), "The");
        assert_eq!(artist_sort_key("The Kinks"), "Kinks");
    }

    #[test]
    fn songs_sort_by_track_number() {
        let mut songs: Vec<Song> = [("b.flac", "10"), ("a.flac", "2"), ("c.flac", "1")]
            .iter()
            .map(|(file, track)| Song {
                file: file.to_string(),
                track: Some(track.to_string()),
                ..Song::default()
            })
            .collect();
        sort_songs(&mut songs);
        let files: Vec<&str> = songs.iter().map(|s| s.file.as_str()).collect();
        assert_eq!(files, ["c.flac", "a.flac", "b.flac"]);
    }

    #[test]
    fn songs_without_tracks_sort_by_file() {
        let mut songs: Vec<Song> = ["z.flac", "a.flac"]
            .iter()
            .map(|file| Song { file: file.to_string(), ..Song::default() })
            .collect();
        sort_songs(&mut songs);
        assert_eq!(songs[0].file, "a.flac");
    }

    #[test]
    fn song_record_prefers_duration_over_time() {
        let attrs = Attributes::parse("file: a.flac\nTime: 100\nduration: 252.74\nTrack: 7\n");
        let song = Song::from_attributes(&attrs).unwrap();
        assert_eq!(song.time.as_deref(), Some("4:12"));
        assert_eq!(song.seconds, Some(252.74));
        assert_eq!(song.track.as_deref(), Some("7"));
    }

    #[test]
    fn status_from_composite_block() {
        let block = "volume: 70\nrepeat: 0\nrandom: 1\nsingle: 0\nconsume: 0\n\
                     playlist: 5\nplaylistlength: 12\nstate: play\nsong: 3\nsongid: 17\n\
                     elapsed: 42.5\nduration: 180.0\nbitrate: 320\n\
                     file: music/a.flac\nTitle: A Song\nArtist: Someone\nAlbum: Things\n\
                     replay_gain_mode: album\n";
        let status = Status::from_attributes(&Attributes::parse(block)).unwrap();
        assert_eq!(status.state, PlayerState::Play);
        assert_eq!(status.volume, Some(70));
        assert!(status.random);
        assert!(!status.repeat);
        assert_eq!(status.playlist_length, 12);
        assert_eq!(status.song_id, Some(17));
        assert_eq!(status.replay_gain, Some(ReplayGainMode::Album));
        assert_eq!(status.current_song.title.as_deref(), Some("A Song"));
        assert!(status.current_song.file_token.is_some());
    }

    #[test]
    fn outputs_parse() {
        let block = "outputid: 0\noutputname: ALSA\noutputenabled: 1\n\
                     outputid: 1\noutputname: HTTP stream\noutputenabled: 0\n";
        let outputs = outputs_from_attributes(Attributes::parse(block)).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].enabled);
        assert_eq!(outputs[1].name, "HTTP stream");
        assert!(!outputs[1].enabled);
    }

    #[test]
    fn genre_grouping() {
        let block = "Album: First\nGenre: Rock\nAlbum: Second\nGenre: Rock\nGenre: Jazz\n";
        let genres = genres_from_attributes(&Attributes::parse(block));
        assert_eq!(genres["Rock"], ["First", "Second"]);
        assert_eq!(genres["Jazz"], ["Second"]);
    }

    #[test]
    fn albums_sort_by_date_with_undated_last() {
        let album = |name: &str, date: Option<&str>| Album {
            name: name.to_string(),
            artist: None,
            date: date.map(str::to_owned),
        };
        let mut albums = vec![
            album("newest", Some("2001")),
            album("undated", None),
            album("oldest", Some("1969")),
        ];
        sort_albums_by_date(&mut albums);
        let names: Vec<&str> = albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["oldest", "newest", "undated"]);
    }
}
