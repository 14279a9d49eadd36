//! The protocol command surface: thin builders over the command queue,
//! each pairing a wire command with the parse of its response block.

use anyhow::{Context, Result, anyhow, bail};

use crate::mpd::albumart::{self, ArtResult, ArtTransfer, ChunkMeta, ChunkStep};
use crate::mpd::protocol::{self, Attributes, quote};
use crate::mpd::types::{
    self, Album, Artist, CurrentSong, DirEntry, FileEntry, FileList, GenreAlbums, Output, Song,
    Stats, Status, ReplayGainMode,
};

use super::Session;

/// Suffixes treated as stored playlists rather than music when browsing.
pub const PLAYLIST_SUFFIXES: &[&str] = &["cue", "pls", "asx", "xspf"];

/// Free-text song search keeps at most this many records.
const SONG_SEARCH_CAP: usize = 100;

fn boolean(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

pub fn is_playlist_file(file: &str) -> bool {
    PLAYLIST_SUFFIXES.iter().any(|suffix| file.ends_with(suffix))
}

impl Session {
    // ---- playback control ----

    pub async fn play(&self, song_id: Option<u32>) -> Result<()> {
        let cmd = match song_id {
            Some(id) => format!("playid {id}"),
            None => "play".to_string(),
        };
        self.command(cmd).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.command("pause").await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.command("stop").await?;
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.command("next").await?;
        Ok(())
    }

    pub async fn previous(&self) -> Result<()> {
        self.command("previous").await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: u32) -> Result<()> {
        self.command(format!("setvol {}", volume.min(100))).await?;
        Ok(())
    }

    pub async fn seek_current(&self, seconds: f64) -> Result<()> {
        self.command(format!("seekcur {seconds}")).await?;
        Ok(())
    }

    pub async fn shuffle(&self, on: bool) -> Result<()> {
        self.command(format!("random {}", boolean(on))).await?;
        Ok(())
    }

    pub async fn repeat(&self, on: bool) -> Result<()> {
        self.command(format!("repeat {}", boolean(on))).await?;
        Ok(())
    }

    pub async fn consume(&self, on: bool) -> Result<()> {
        self.command(format!("consume {}", boolean(on))).await?;
        Ok(())
    }

    pub async fn single(&self, on: bool) -> Result<()> {
        self.command(format!("single {}", boolean(on))).await?;
        Ok(())
    }

    pub async fn crossfade(&self, seconds: u32) -> Result<()> {
        self.command(format!("crossfade {seconds}")).await?;
        Ok(())
    }

    pub async fn replay_gain_mode(&self, mode: ReplayGainMode) -> Result<()> {
        self.command(format!("replay_gain_mode {}", mode.as_str())).await?;
        Ok(())
    }

    // ---- status ----

    /// The composite status block: player state, current song and replay
    /// gain in one atomic exchange.
    pub async fn status(&self) -> Result<Status> {
        let cmd = protocol::command_list(["status", "currentsong", "replay_gain_status"]);
        let resp = self.command(cmd).await?;
        Status::from_attributes(&Attributes::parse(&resp.body)).context("parsing status response")
    }

    pub async fn current_song(&self) -> Result<CurrentSong> {
        let resp = self.command("currentsong").await?;
        Ok(CurrentSong::from_attributes(&Attributes::parse(&resp.body)))
    }

    /// Fetch library totals and refresh the session's cached copy.
    pub async fn refresh_stats(&self) -> Result<Stats> {
        let resp = self.command("stats").await?;
        let stats = Stats::from_attributes(&Attributes::parse(&resp.body)).context("parsing stats")?;
        self.shared.state.write().await.stats = stats;
        Ok(stats)
    }

    pub async fn login(&self, password: &str) -> Result<()> {
        self.command(format!("password {}", quote(password)?)).await?;
        Ok(())
    }

    // ---- catalog browsing ----

    pub async fn artists(&self, filter: Option<&str>) -> Result<Vec<Artist>> {
        let resp = self.command("list artist").await?;
        let attrs = Attributes::parse(&resp.body);

        let mut artists: Vec<Artist> = attrs
            .get_all("Artist")
            .filter(|name| !name.trim().is_empty())
            .filter(|name| match filter {
                Some(filter) => name.to_lowercase().starts_with(&filter.to_lowercase()),
                None => true,
            })
            .map(|name| Artist { name: name.to_string() })
            .collect();

        types::sort_artists(&mut artists);
        Ok(artists)
    }

    pub async fn albums(&self, use_album_artist: bool, sort_by_artist: bool) -> Result<Vec<Album>> {
        let group = if use_album_artist { "albumartist" } else { "artist" };
        let resp = self.command(format!("list album group {group}")).await?;

        let mut albums = grouped_albums(&Attributes::parse(&resp.body));
        if sort_by_artist {
            types::sort_albums_by_artist(&mut albums);
        } else {
            types::sort_albums_by_name(&mut albums);
        }
        Ok(albums)
    }

    pub async fn artist_albums(&self, artist: &str, sort_by_date: bool) -> Result<Vec<Album>> {
        let mut cmd = format!("list album artist {}", quote(artist)?);
        if sort_by_date {
            cmd.push_str(" group date");
        }
        let resp = self.command(cmd).await?;

        let attrs = Attributes::parse(&resp.body);
        let mut albums = Vec::new();
        let mut current_date: Option<&str> = None;
        for (key, value) in attrs.iter() {
            match key {
                "Date" if !value.trim().is_empty() => current_date = Some(value),
                "Album" if !value.trim().is_empty() => albums.push(Album {
                    name: value.trim().to_string(),
                    artist: Some(artist.to_string()),
                    date: current_date.map(str::to_owned),
                }),
                _ => {}
            }
        }

        if sort_by_date {
            types::sort_albums_by_date(&mut albums);
        } else {
            types::sort_albums_by_name(&mut albums);
        }
        Ok(albums)
    }

    pub async fn album_songs(&self, album: &str, artist: Option<&str>) -> Result<Vec<Song>> {
        let mut cmd = format!("find album {}", quote(album)?);
        if let Some(artist) = artist {
            cmd.push_str(&format!(" artist {}", quote(artist)?));
        }
        let resp = self.command(cmd).await?;

        let mut songs = types::songs_from_attributes(Attributes::parse(&resp.body))
            .context("parsing album songs")?;
        types::sort_songs(&mut songs);
        Ok(songs)
    }

    /// Free-text search across all tags, windowed where the server
    /// supports it.
    pub async fn search(&self, filter: &str, start: usize, end: usize) -> Result<Vec<Song>> {
        let mut cmd = format!("search any {}", quote(filter)?);
        if self.protocol_version().await.is_some_and(|v| v.supports_search_window()) {
            cmd.push_str(&format!(" window {start}:{end}"));
        }
        let resp = self.command(cmd).await?;
        types::songs_from_attributes(Attributes::parse(&resp.body)).context("parsing search results")
    }

    /// Single-field search, capped so a sloppy filter cannot flood the UI.
    pub async fn songs(&self, filter: &str, field: Option<&str>) -> Result<Vec<Song>> {
        let field = field.unwrap_or("title");
        let resp = self.command(format!("search {field} {}", quote(filter)?)).await?;

        let mut songs = types::songs_from_attributes(Attributes::parse(&resp.body))
            .context("parsing song search")?;
        songs.truncate(SONG_SEARCH_CAP);
        Ok(songs)
    }

    pub async fn genres(&self) -> Result<GenreAlbums> {
        let resp = self.command("list genre group album").await?;
        Ok(types::genres_from_attributes(&Attributes::parse(&resp.body)))
    }

    pub async fn genre_songs(&self, genre: &str) -> Result<Vec<Song>> {
        let resp = self.command(format!("find genre {}", quote(genre)?)).await?;
        let mut songs = types::songs_from_attributes(Attributes::parse(&resp.body))
            .context("parsing genre songs")?;
        types::sort_songs(&mut songs);
        Ok(songs)
    }

    pub async fn song_count_without_album(&self, artist: &str) -> Result<u64> {
        if !self.protocol_version().await.is_some_and(|v| v.supports_filters()) {
            return Ok(0);
        }

        let resp = self
            .command(format!("count {}", quote(&no_album_filter(artist))?))
            .await?;
        Attributes::parse(&resp.body)
            .get_opt("songs")
            .map(|count| count.unwrap_or(0))
            .context("parsing song count")
    }

    pub async fn songs_without_album(&self, artist: &str) -> Result<Vec<Song>> {
        if !self.protocol_version().await.is_some_and(|v| v.supports_filters()) {
            return Ok(Vec::new());
        }

        let resp = self
            .command(format!("find {}", quote(&no_album_filter(artist))?))
            .await?;
        let mut songs = types::songs_from_attributes(Attributes::parse(&resp.body))
            .context("parsing albumless songs")?;
        types::sort_songs(&mut songs);
        Ok(songs)
    }

    // ---- queue and stored playlists ----

    pub async fn playlist(&self) -> Result<Vec<Song>> {
        let resp = self.command("playlistinfo").await?;
        types::songs_from_attributes(Attributes::parse(&resp.body)).context("parsing play queue")
    }

    pub async fn named_playlist(&self, name: &str) -> Result<Vec<Song>> {
        let resp = self.command(format!("listplaylistinfo {}", quote(name)?)).await?;
        types::songs_from_attributes(Attributes::parse(&resp.body)).context("parsing playlist")
    }

    pub async fn playlists(&self) -> Result<Vec<String>> {
        let resp = self.command("listplaylists").await?;
        let mut names: Vec<String> = Attributes::parse(&resp.body)
            .get_all("playlist")
            .map(str::to_owned)
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn add_song(&self, file: &str) -> Result<()> {
        self.command(format!("add {}", quote(file)?)).await?;
        Ok(())
    }

    pub async fn add_song_to_playlist(&self, file: &str, playlist: &str) -> Result<()> {
        self.command(format!("playlistadd {} {}", quote(playlist)?, quote(file)?))
            .await?;
        Ok(())
    }

    /// Add many files in one command list. With `autoplay`, the queue is
    /// cleared first and playback starts after.
    pub async fn add_songs<I, S>(&self, files: I, autoplay: bool) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmds = Vec::new();
        if autoplay {
            cmds.push("clear".to_string());
        }
        for file in files {
            cmds.push(format!("add {}", quote(file.as_ref())?));
        }
        if autoplay {
            cmds.push("play".to_string());
        }

        self.command(protocol::command_list(&cmds)).await?;
        Ok(())
    }

    pub async fn add_songs_to_playlist<I, S>(&self, files: I, playlist: &str) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let playlist = quote(playlist)?;
        let cmds = files
            .into_iter()
            .map(|file| Ok(format!("playlistadd {playlist} {}", quote(file.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;

        self.command(protocol::command_list(&cmds)).await?;
        Ok(())
    }

    pub async fn add_album(&self, album: &str, artist: Option<&str>, autoplay: bool) -> Result<()> {
        let songs = self.album_songs(album, artist).await?;
        self.add_songs(songs.iter().map(|song| song.file.as_str()), autoplay)
            .await
    }

    pub async fn add_album_to_playlist(
        &self,
        album: &str,
        artist: Option<&str>,
        playlist: &str,
    ) -> Result<()> {
        let songs = self.album_songs(album, artist).await?;
        self.add_songs_to_playlist(songs.iter().map(|song| song.file.as_str()), playlist)
            .await
    }

    pub async fn add_genre(&self, genre: &str, autoplay: bool) -> Result<()> {
        let songs = self.genre_songs(genre).await?;
        self.add_songs(songs.iter().map(|song| song.file.as_str()), autoplay)
            .await
    }

    pub async fn add_genre_to_playlist(&self, genre: &str, playlist: &str) -> Result<()> {
        let songs = self.genre_songs(genre).await?;
        self.add_songs_to_playlist(songs.iter().map(|song| song.file.as_str()), playlist)
            .await
    }

    pub async fn add_directory(&self, dir: &str, autoplay: bool) -> Result<()> {
        let list = self.list_files(Some(dir), false).await?;
        let files = list
            .files
            .iter()
            .map(|entry| entry.file.as_str())
            .filter(|file| !is_playlist_file(file));
        self.add_songs(files, autoplay).await
    }

    pub async fn add_directory_to_playlist(&self, dir: &str, playlist: &str) -> Result<()> {
        let list = self.list_files(Some(dir), false).await?;
        let files = list
            .files
            .iter()
            .map(|entry| entry.file.as_str())
            .filter(|file| !is_playlist_file(file));
        self.add_songs_to_playlist(files, playlist).await
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.command("clear").await?;
        Ok(())
    }

    pub async fn remove_song(&self, song_id: u32) -> Result<()> {
        self.command(format!("deleteid {song_id}")).await?;
        Ok(())
    }

    pub async fn swap_songs(&self, id1: u32, id2: u32) -> Result<()> {
        self.command(format!("swapid {id1} {id2}")).await?;
        Ok(())
    }

    pub async fn move_song(&self, id: u32, to: u32) -> Result<()> {
        self.command(format!("moveid {id} {to}")).await?;
        Ok(())
    }

    pub async fn load_playlist(&self, name: &str, autoplay: bool) -> Result<()> {
        let load = format!("load {}", quote(name)?);
        let cmd = if autoplay {
            protocol::command_list(["clear".to_string(), load, "play".to_string()])
        } else {
            load
        };
        self.command(cmd).await?;
        Ok(())
    }

    /// Save the current play queue as a named playlist, one `playlistadd`
    /// per song in queue order.
    pub async fn save_playlist(&self, name: &str) -> Result<()> {
        let songs = self.playlist().await?;
        self.add_songs_to_playlist(songs.iter().map(|song| song.file.as_str()), name)
            .await
    }

    pub async fn delete_playlist(&self, name: &str) -> Result<()> {
        self.command(format!("rm {}", quote(name)?)).await?;
        Ok(())
    }

    pub async fn delete_playlist_item(&self, name: &str, pos: u32) -> Result<()> {
        self.command(format!("playlistdelete {} {pos}", quote(name)?)).await?;
        Ok(())
    }

    /// Fill the queue with `size` random songs. With a `(field, value)`
    /// pair the candidates come from tag searches (`+` separates multiple
    /// values); otherwise single-song window probes are batched where the
    /// server supports windows, falling back to sampling a full search.
    pub async fn random_playlist(&self, size: usize, by_type: Option<(&str, &str)>) -> Result<()> {
        let files = match by_type {
            Some((field, value)) => self.random_candidates(field, value).await?,
            None => {
                if self.protocol_version().await.is_some_and(|v| v.supports_search_window()) {
                    return self.random_playlist_windowed(size).await;
                }
                self.search_files("search title \"\"").await?
            }
        };

        self.add_songs(sample_files(files, size), false).await
    }

    async fn random_playlist_windowed(&self, size: usize) -> Result<()> {
        let total = self.cached_stats().await.songs as usize;
        if total == 0 {
            bail!("library is empty");
        }

        let mut probes = Vec::new();
        for _ in 0..size.min(total) {
            let index = fastrand::usize(..total);
            if index + 1 < total {
                probes.push(format!("search title \"\" window {index}:{}", index + 1));
            }
        }

        let files = self.search_files(&protocol::command_list(&probes)).await?;
        self.add_songs(files, false).await
    }

    async fn random_candidates(&self, field: &str, value: &str) -> Result<Vec<String>> {
        let cmd = if value.contains('+') {
            let searches = value
                .split('+')
                .map(|value| Ok(format!("search {field} {}", quote(value)?)))
                .collect::<Result<Vec<_>>>()?;
            protocol::command_list(&searches)
        } else {
            format!("search {field} {}", quote(value)?)
        };
        self.search_files(&cmd).await
    }

    async fn search_files(&self, cmd: &str) -> Result<Vec<String>> {
        let resp = self.command(cmd.to_string()).await?;
        Ok(Attributes::parse(&resp.body)
            .get_all("file")
            .map(str::to_owned)
            .collect())
    }

    // ---- filesystem browsing ----

    pub async fn list_files(&self, uri: Option<&str>, sort_by_title: bool) -> Result<FileList> {
        let cmd = match uri {
            Some(uri) if !uri.is_empty() => format!("lsinfo {}", quote(uri)?),
            _ => "lsinfo".to_string(),
        };
        let resp = self.command(cmd).await?;

        let suffixes = self.file_suffixes().await;
        let mut list = parse_file_list(&Attributes::parse(&resp.body), &suffixes);
        list.sort(sort_by_title);
        Ok(list)
    }

    pub async fn list_mounts(&self) -> Result<Vec<String>> {
        self.raw_lines("listmounts").await
    }

    pub async fn list_neighbors(&self) -> Result<Vec<String>> {
        self.raw_lines("listneighbors").await
    }

    /// Run any command verbatim and get the raw response lines back. The
    /// debug surface; nothing in the crate interprets the result.
    pub async fn run_command(&self, cmd: &str) -> Result<Vec<String>> {
        self.raw_lines(cmd).await
    }

    async fn raw_lines(&self, cmd: &str) -> Result<Vec<String>> {
        let resp = self.command(cmd.to_string()).await?;
        Ok(protocol::split_lines(&resp.body)
            .into_iter()
            .map(str::to_owned)
            .collect())
    }

    // ---- outputs ----

    pub async fn outputs(&self) -> Result<Vec<Output>> {
        let resp = self.command("outputs").await?;
        types::outputs_from_attributes(Attributes::parse(&resp.body)).context("parsing outputs")
    }

    pub async fn enable_output(&self, id: &str) -> Result<()> {
        self.command(format!("enableoutput {id}")).await?;
        Ok(())
    }

    pub async fn disable_output(&self, id: &str) -> Result<()> {
        self.command(format!("disableoutput {id}")).await?;
        Ok(())
    }

    pub async fn update_database(&self) -> Result<()> {
        self.command("update").await?;
        Ok(())
    }

    // ---- album art ----

    pub async fn is_album_art_supported(&self) -> bool {
        self.protocol_version().await.is_some_and(|v| v.supports_album_art())
    }

    /// Raise the server's binary chunk size where supported; silently a
    /// no-op on servers that predate the command.
    pub async fn binary_limit(&self, limit: u64) -> Result<()> {
        if self.protocol_version().await.is_some_and(|v| v.supports_binary_limit()) {
            self.command(format!("binarylimit {limit}")).await?;
        }
        Ok(())
    }

    /// Fetch the artwork stored next to `uri`, chunk by chunk, into the art
    /// directory. Resolves once every reported byte is on disk.
    pub async fn album_art(&self, uri: &str, artist: &str, album: &str) -> Result<ArtResult> {
        albumart::ensure_art_supported(self.protocol_version().await)?;
        self.fetch_art(uri, artist, album, "albumart").await
    }

    /// Like [`Session::album_art`] but reads the picture embedded in the
    /// song's tags.
    pub async fn read_picture(&self, uri: &str, artist: &str, album: &str) -> Result<ArtResult> {
        albumart::ensure_readpicture_supported(self.protocol_version().await)?;
        self.fetch_art(uri, artist, album, "readpicture").await
    }

    pub async fn album_art_for_album(&self, artist: &str, album: &str) -> Result<ArtResult> {
        let songs = self.album_songs(album, Some(artist)).await?;
        let Some(first) = songs.first() else {
            bail!("Songs for {artist} {album} not found");
        };
        self.album_art(&first.file, artist, album).await
    }

    async fn fetch_art(
        &self,
        uri: &str,
        artist: &str,
        album: &str,
        base_cmd: &str,
    ) -> Result<ArtResult> {
        let path = self
            .shared
            .config
            .art_dir
            .join(albumart::art_filename(artist, album));

        // chunks append, so any stale file has to go first
        let _ = tokio::fs::remove_file(&path).await;

        let mut transfer = ArtTransfer::new();
        loop {
            let cmd = format!("{base_cmd} {} {}", quote(uri)?, transfer.offset());
            let resp = self.command_with_art(cmd, Some(path.clone())).await?;
            let meta = ChunkMeta::from_attributes(&Attributes::parse(&resp.body));

            match transfer.advance(meta) {
                ChunkStep::NoArt => {
                    return Err(anyhow!("No embedded album art for {artist} {album}"));
                }
                ChunkStep::Continue { offset } => {
                    log::debug!("album art for {artist}/{album}: {offset} bytes so far");
                }
                ChunkStep::Done { size } => {
                    return Ok(ArtResult {
                        artist: artist.to_string(),
                        album: album.to_string(),
                        song: uri.to_string(),
                        path,
                        size,
                    });
                }
            }
        }
    }
}

/// Albums from grouped `list album` output: artist lines set the group,
/// album lines emit a record under it.
fn grouped_albums(attrs: &Attributes) -> Vec<Album> {
    let mut albums = Vec::new();
    let mut current_artist: Option<&str> = None;

    for (key, value) in attrs.iter() {
        match key {
            "Artist" | "AlbumArtist" if !value.trim().is_empty() => {
                current_artist = Some(value);
            }
            "Album" if !value.trim().is_empty() => {
                albums.push(Album {
                    name: value.trim().to_string(),
                    artist: current_artist.map(str::to_owned),
                    date: None,
                });
            }
            _ => {}
        }
    }

    albums
}

/// MPD filter expression matching an artist's songs that carry no album
/// tag. Quotes in the artist name are escaped once for the expression;
/// `quote` adds the outer escaping for the wire.
fn no_album_filter(artist: &str) -> String {
    format!(
        "((Artist == \"{}\") AND (album == \"\"))",
        artist.replace('"', "\\\"")
    )
}

fn parse_file_list(attrs: &Attributes, suffixes: &[String]) -> FileList {
    let mut list = FileList::default();
    // index of the last accepted file, for attaching its tag lines
    let mut current: Option<usize> = None;

    for (key, value) in attrs.iter() {
        match key {
            "file" => {
                current = None;
                let known = !value.contains('.')
                    || suffixes.iter().any(|suffix| value.ends_with(suffix.as_str()));
                if known {
                    list.files.push(FileEntry {
                        file: value.to_string(),
                        file_token: protocol::encode_file_token(value),
                        title: None,
                        artist: None,
                        album: None,
                    });
                    current = Some(list.files.len() - 1);
                }
            }
            "directory" => {
                if !list.dirs.iter().any(|entry| entry.dir == value) {
                    list.dirs.push(DirEntry {
                        dir: value.to_string(),
                        dir_token: protocol::encode_file_token(value),
                    });
                }
            }
            "playlist" => {
                if is_playlist_file(value) {
                    list.files.push(FileEntry {
                        file: value.to_string(),
                        file_token: protocol::encode_file_token(value),
                        title: None,
                        artist: None,
                        album: None,
                    });
                    current = None;
                }
            }
            "Title" => {
                if let Some(i) = current {
                    list.files[i].title = Some(value.to_string());
                }
            }
            "Artist" => {
                if let Some(i) = current {
                    list.files[i].artist = Some(value.to_string());
                }
            }
            "Album" => {
                if let Some(i) = current {
                    list.files[i].album = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    list
}

/// Pick `size` distinct songs; below `size + 10` candidates random picking
/// would thrash, so just take from the front.
fn sample_files(files: Vec<String>, size: usize) -> Vec<String> {
    if files.len() <= size + 10 {
        return files.into_iter().take(size).collect();
    }

    let mut random: Vec<String> = Vec::with_capacity(size);
    while random.len() < size {
        let pick = &files[fastrand::usize(..files.len())];
        if !random.contains(pick) {
            random.push(pick.clone());
        }
    }
    random
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_album_filter_quoting() {
        assert_eq!(
            no_album_filter("Them"),
            r#"((Artist == "Them") AND (album == ""))"#
        );

        // once through quote(), the wire form matches what the server expects
        let wire = format!("count {}", quote(&no_album_filter("Them")).unwrap());
        assert_eq!(wire, r#"count "((Artist == \"Them\") AND (album == \"\"))""#);
    }

    #[test]
    fn grouped_album_parsing() {
        let attrs = Attributes::parse(
            "Artist: Abba\nAlbum: Arrival\nAlbum: Waterloo\nArtist: Them\nAlbum: Angry Young Them\n",
        );
        let albums = grouped_albums(&attrs);
        assert_eq!(albums.len(), 3);
        assert_eq!(albums[1].name, "Waterloo");
        assert_eq!(albums[1].artist.as_deref(), Some("Abba"));
        assert_eq!(albums[2].artist.as_deref(), Some("Them"));
    }

    #[test]
    fn file_list_honours_suffix_whitelist() {
        let suffixes = vec![".flac".to_string(), ".mp3".to_string()];
        let attrs = Attributes::parse(
            "directory: albums\nfile: a.flac\nTitle: A\nfile: skip.ogg\nTitle: nope\n\
             file: noext\nplaylist: mix.pls\nplaylist: not_a_list.txt\n",
        );
        let list = parse_file_list(&attrs, &suffixes);

        let files: Vec<&str> = list.files.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, ["a.flac", "noext", "mix.pls"]);
        // tag lines bind to the accepted file, not the skipped one
        assert_eq!(list.files[0].title.as_deref(), Some("A"));
        assert_eq!(list.dirs.len(), 1);
    }

    #[test]
    fn playlist_suffix_detection() {
        assert!(is_playlist_file("some/dir/mix.pls"));
        assert!(is_playlist_file("album.cue"));
        assert!(!is_playlist_file("song.flac"));
    }

    #[test]
    fn sampling_respects_size() {
        let files: Vec<String> = (0..50).map(|i| format!("song{i}.flac")).collect();
        let sample = sample_files(files.clone(), 20);
        assert_eq!(sample.len(), 20);
        // distinct picks only
        for (i, file) in sample.iter().enumerate() {
            assert!(!sample[i + 1..].contains(file));
        }

        // small candidate pools are taken in order
        let few = sample_files(files[..5].to_vec(), 20);
        assert_eq!(few.len(), 5);
        assert_eq!(few[0], "song0.flac");
    }
}
