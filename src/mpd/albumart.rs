use std::path::PathBuf;

use serde::Serialize;

use crate::mpd::protocol::{Attributes, ProtocolVersion};
use crate::mpd::queue::CommandError;

/// Metadata the server reports with each `albumart`/`readpicture` chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkMeta {
    /// Total size of the artwork file. Absent when the song has none.
    pub size: Option<u64>,
    /// Bytes carried by this chunk.
    pub binary: u64,
}

impl ChunkMeta {
    pub fn from_attributes(attrs: &Attributes) -> ChunkMeta {
        ChunkMeta {
            size: attrs.get_opt("size").ok().flatten(),
            binary: attrs.get_opt("binary").ok().flatten().unwrap_or(0),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkStep {
    /// More bytes remain; request the next chunk from `offset`.
    Continue { offset: u64 },
    /// The whole file arrived. An empty file counts.
    Done { size: u64 },
    /// The server reported no artwork at all.
    NoArt,
}

/// Offset arithmetic of one artwork transfer. The transport already wrote
/// the chunk bytes to disk; this only decides whether to keep requesting.
#[derive(Debug, Default)]
pub struct ArtTransfer {
    offset: u64,
}

impl ArtTransfer {
    pub fn new() -> ArtTransfer {
        ArtTransfer::default()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn advance(&mut self, meta: ChunkMeta) -> ChunkStep {
        let Some(size) = meta.size else {
            return ChunkStep::NoArt;
        };

        self.offset += meta.binary;
        if self.offset >= size {
            ChunkStep::Done { size }
        } else {
            ChunkStep::Continue { offset: self.offset }
        }
    }
}

/// Completed transfer, handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ArtResult {
    pub artist: String,
    pub album: String,
    pub song: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Deterministic destination name: anything outside ASCII alphanumerics is
/// flattened so artist/album strings can't escape the art directory.
pub fn art_filename(artist: &str, album: &str) -> String {
    let key: String = format!("{artist}_{album}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("albumart_{key}.png")
}

pub fn ensure_art_supported(version: Option<ProtocolVersion>) -> Result<(), CommandError> {
    match version {
        Some(version) if version.supports_album_art() => Ok(()),
        _ => Err(CommandError::Unsupported("Albumart")),
    }
}

pub fn ensure_readpicture_supported(version: Option<ProtocolVersion>) -> Result<(), CommandError> {
    match version {
        Some(version) if version.supports_readpicture() => Ok(()),
        _ => Err(CommandError::Unsupported("readpicture")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64, binary: u64) -> ChunkMeta {
        ChunkMeta { size: Some(size), binary }
    }

    #[test]
    fn three_chunks_then_done() {
        let mut transfer = ArtTransfer::new();
        assert_eq!(transfer.offset(), 0);

        assert_eq!(transfer.advance(meta(100, 40)), ChunkStep::Continue { offset: 40 });
        assert_eq!(transfer.advance(meta(100, 40)), ChunkStep::Continue { offset: 80 });
        assert_eq!(transfer.advance(meta(100, 20)), ChunkStep::Done { size: 100 });
        assert_eq!(transfer.offset(), 100);
    }

    #[test]
    fn zero_size_resolves_immediately() {
        let mut transfer = ArtTransfer::new();
        assert_eq!(transfer.advance(meta(0, 0)), ChunkStep::Done { size: 0 });
    }

    #[test]
    fn missing_size_means_no_art() {
        let mut transfer = ArtTransfer::new();
        let none = ChunkMeta { size: None, binary: 0 };
        assert_eq!(transfer.advance(none), ChunkStep::NoArt);
    }

    #[test]
    fn meta_from_response_block() {
        let attrs = Attributes::parse("size: 4096\nbinary: 1024\n");
        let meta = ChunkMeta::from_attributes(&attrs);
        assert_eq!(meta.size, Some(4096));
        assert_eq!(meta.binary, 1024);

        let empty = ChunkMeta::from_attributes(&Attributes::parse("OK\n"));
        assert_eq!(empty.size, None);
        assert_eq!(empty.binary, 0);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(
            art_filename("AC/DC", "Back in Black"),
            "albumart_AC_DC_Back_in_Black.png"
        );
    }

    #[test]
    fn version_gate_messages() {
        let v20: ProtocolVersion = "0.20.0".parse().unwrap();
        let v21: ProtocolVersion = "0.21.5".parse().unwrap();

        let err = ensure_art_supported(Some(v20)).unwrap_err();
        assert_eq!(err.to_string(), "Albumart is not supported");
        assert!(ensure_art_supported(None).is_err());
        assert!(ensure_art_supported(Some(v21)).is_ok());

        let err = ensure_readpicture_supported(Some(v21)).unwrap_err();
        assert_eq!(err.to_string(), "readpicture is not supported");
    }
}
