use std::env::VarError;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use futures::StreamExt;

use mpdlink::events::{EventBus, SessionEvent};
use mpdlink::store::{ConnectionRegistry, FileStore};
use mpdlink::{logging, mpd};

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        logging::error(&err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = config()?;
    let events = EventBus::default();
    let mut stream = events.stream();

    let manager = mpd::SessionManager::new(events);
    let session = manager.connect(config).await?;
    log::info!(
        "session up: {} ({}:{}), {} songs in library",
        session.name(),
        session.host(),
        session.port(),
        session.cached_stats().await.songs,
    );

    while let Some(event) = stream.next().await {
        match event {
            Ok(SessionEvent::Status(status)) => {
                let song = &status.current_song;
                log::info!(
                    "{:?}: {} - {}",
                    status.state,
                    song.artist.as_deref().unwrap_or("?"),
                    song.title.as_deref().unwrap_or("?"),
                );
            }
            Ok(event) => log::debug!("{event:?}"),
            Err(err) => log::warn!("event stream lagged: {err}"),
        }
    }

    Ok(())
}

fn config() -> Result<mpd::Config> {
    let (name, host, port, password) = match opt_env::<String>("MPDLINK_HOST") {
        Some(host) => (
            opt_env("MPDLINK_NAME").unwrap_or_else(|| host.clone()),
            host,
            opt_env("MPDLINK_PORT").unwrap_or(6600),
            opt_env("MPDLINK_PASSWORD"),
        ),
        None => saved_connection()?,
    };

    Ok(mpd::Config {
        name,
        host,
        port,
        password,
        art_dir: opt_env("MPDLINK_ART_DIR").unwrap_or_else(std::env::temp_dir),
    })
}

/// With no host in the environment, fall back to the first saved server.
fn saved_connection() -> Result<(String, String, u16, Option<String>)> {
    let path: PathBuf = opt_env("MPDLINK_STORE").unwrap_or_else(|| PathBuf::from("mpdlink.json"));
    let registry = ConnectionRegistry::new(FileStore::open(path)?);

    let saved = registry
        .list()?
        .into_iter()
        .next()
        .context("MPDLINK_HOST not set and no saved connections")?;

    Ok((saved.name, saved.host, saved.port, saved.pwd))
}

fn opt_env<T: FromStr<Err: Display>>(name: &str) -> Option<T> {
    let value = match std::env::var(name) {
        Ok(value) => value,
        Err(VarError::NotPresent) => {
            return None;
        }
        Err(VarError::NotUnicode(_)) => panic!("env var is invalid utf-8: {name}"),
    };

    match value.parse() {
        Ok(value) => Some(value),
        Err(err) => panic!("invalid format for env var: {name}: {err}"),
    }
}
