//! Track tags: the metadata list handed to the transcoder and a lofty pass
//! that rewrites MP3 tags after encoding.

use std::fs::File;
use std::path::{Path, PathBuf};

use lofty::{Accessor, ItemKey, Picture, PictureType, Probe, TagExt, TaggedFileExt};
use tracing::debug;

use crate::error::{Result, SliceError};

/// Tags for one exported track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_number: u32,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    pub cover_art: Option<PathBuf>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl TrackTags {
    /// Key/value pairs in the form ffmpeg's `-metadata` expects.
    pub fn ffmpeg_metadata(&self) -> Vec<(String, String)> {
        let mut metadata = vec![
            ("artist".to_string(), self.artist.clone()),
            ("album".to_string(), self.album.clone()),
            ("title".to_string(), self.title.clone()),
            ("track".to_string(), self.track_number.to_string()),
        ];
        let optional = [
            ("date", present(&self.year)),
            ("album_artist", present(&self.album_artist)),
            ("genre", present(&self.genre)),
            ("comment", present(&self.comment)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                metadata.push((key.to_string(), value.to_string()));
            }
        }
        metadata
    }
}

pub trait TagWriter {
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()>;
}

/// Writes tags into the file's primary tag format with lofty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagWriter;

impl LoftyTagWriter {
    pub fn new() -> Self {
        Self
    }
}

impl TagWriter for LoftyTagWriter {
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()> {
        if !path.exists() {
            return Err(SliceError::TagWrite(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let mut tagged_file = Probe::open(path)?.read()?;

        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(lofty::Tag::new(tag_type));
        }
        let Some(tag) = tagged_file.tag_mut(tag_type) else {
            return Err(SliceError::TagWrite(format!(
                "{:?} tags are not supported for {}",
                tag_type,
                path.display()
            )));
        };

        tag.set_title(tags.title.clone());
        tag.set_artist(tags.artist.clone());
        tag.set_album(tags.album.clone());
        tag.set_track(tags.track_number);

        if let Some(year) = present(&tags.year) {
            match year.parse::<u32>() {
                Ok(y) => tag.set_year(y),
                Err(_) => {
                    tag.insert_text(ItemKey::RecordingDate, year.to_string());
                }
            }
        }
        if let Some(genre) = present(&tags.genre) {
            tag.set_genre(genre.to_string());
        }
        if let Some(album_artist) = present(&tags.album_artist) {
            tag.insert_text(ItemKey::AlbumArtist, album_artist.to_string());
        }
        if let Some(comment) = present(&tags.comment) {
            tag.set_comment(comment.to_string());
        }

        if let Some(cover) = tags.cover_art.as_ref().filter(|p| p.exists()) {
            let mut reader = File::open(cover)?;
            let mut picture = Picture::from_reader(&mut reader)?;
            picture.set_pic_type(PictureType::CoverFront);
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(picture);
        }

        tag.save_to_path(path)?;

        debug!("Wrote tags to {:?}", path);

        Ok(())
    }
}
