//! Entity variants and their table representation
//!
//! Each entity kind is a variant of [`Entity`]. The variant alone decides
//! the item's primary key and which secondary index attributes it carries;
//! conversion to and from the raw [`Item`] happens only here.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use thiserror::Error;

use crate::table::{IndexKey, Item, ItemKey};

pub mod album;
pub mod keys;
pub mod owner;
pub mod playlist;
pub mod tag;
pub mod track;
pub mod upload;

pub use album::{Album, Artist};
pub use owner::{Owner, Preferences, Principal, Role};
pub use playlist::{Playlist, PlaylistEntry};
pub use tag::{Tag, TrackTag};
pub use track::{AudioFormat, Track, TrackPatch, Visibility};
pub use upload::{
    AudioMetadata, IndexOutcome, PipelineState, ProcessingStep, StepMap, Upload, UploadStatus,
};

/// Type tag stored alongside every item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Owner,
    Track,
    Album,
    Artist,
    Playlist,
    PlaylistEntry,
    Tag,
    TrackTag,
    Upload,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Owner => "OWNER",
            EntityType::Track => "TRACK",
            EntityType::Album => "ALBUM",
            EntityType::Artist => "ARTIST",
            EntityType::Playlist => "PLAYLIST",
            EntityType::PlaylistEntry => "PLAYLIST_ENTRY",
            EntityType::Tag => "TAG",
            EntityType::TrackTag => "TRACK_TAG",
            EntityType::Upload => "UPLOAD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "OWNER" => EntityType::Owner,
            "TRACK" => EntityType::Track,
            "ALBUM" => EntityType::Album,
            "ARTIST" => EntityType::Artist,
            "PLAYLIST" => EntityType::Playlist,
            "PLAYLIST_ENTRY" => EntityType::PlaylistEntry,
            "TAG" => EntityType::Tag,
            "TRACK_TAG" => EntityType::TrackTag,
            "UPLOAD" => EntityType::Upload,
            _ => return None,
        })
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown entity type '{entity_type}' at {key}")]
    UnknownType { key: ItemKey, entity_type: String },

    #[error("Expected {expected} at {key}, found {found}")]
    WrongType {
        key: ItemKey,
        expected: EntityType,
        found: EntityType,
    },

    #[error("Corrupt {entity_type} at {key}: {source}")]
    Corrupt {
        key: ItemKey,
        entity_type: EntityType,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {1}: {0}")]
    Encode(#[source] serde_json::Error, EntityType),
}

/// Every entity kind the table holds
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Owner(Owner),
    Track(Track),
    Album(Album),
    Artist(Artist),
    Playlist(Playlist),
    PlaylistEntry(PlaylistEntry),
    Tag(Tag),
    TrackTag(TrackTag),
    Upload(Upload),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Owner(_) => EntityType::Owner,
            Entity::Track(_) => EntityType::Track,
            Entity::Album(_) => EntityType::Album,
            Entity::Artist(_) => EntityType::Artist,
            Entity::Playlist(_) => EntityType::Playlist,
            Entity::PlaylistEntry(_) => EntityType::PlaylistEntry,
            Entity::Tag(_) => EntityType::Tag,
            Entity::TrackTag(_) => EntityType::TrackTag,
            Entity::Upload(_) => EntityType::Upload,
        }
    }

    pub fn key(&self) -> ItemKey {
        match self {
            Entity::Owner(o) => keys::owner(&o.id),
            Entity::Track(t) => keys::track(&t.owner_id, &t.id),
            Entity::Album(a) => keys::album(&a.owner_id, &a.id),
            Entity::Artist(a) => keys::artist(&a.owner_id, &a.id),
            Entity::Playlist(p) => keys::playlist(&p.owner_id, &p.id),
            Entity::PlaylistEntry(e) => keys::playlist_entry(&e.owner_id, &e.playlist_id, e.position),
            Entity::Tag(t) => keys::tag(&t.owner_id, &t.name),
            Entity::TrackTag(t) => keys::track_tag(&t.owner_id, &t.track_id, &t.tag_name),
            Entity::Upload(u) => keys::upload(&u.owner_id, &u.id),
        }
    }

    /// General alternate index
    pub fn gsi1(&self) -> Option<IndexKey> {
        match self {
            Entity::Owner(o) => Some(keys::owner_email_index(&o.id, &o.email)),
            Entity::Track(t) if !keys::artist_key_part(&t.artist).is_empty() => Some(IndexKey::new(
                keys::artist_partition(&t.owner_id, &t.artist),
                format!("{}{}", keys::TRACK_PREFIX, t.id),
            )),
            Entity::Album(a) => Some(IndexKey::new(
                keys::artist_partition(&a.owner_id, &a.artist),
                keys::album_sort(a.year, &a.id),
            )),
            Entity::Artist(a) => Some(IndexKey::new(
                keys::artists_partition(&a.owner_id),
                keys::artist_sort(&a.name, &a.id),
            )),
            Entity::TrackTag(t) => Some(IndexKey::new(
                keys::tag_tracks_partition(&t.owner_id, &t.tag_name),
                format!("{}{}", keys::TRACK_PREFIX, t.track_id),
            )),
            Entity::Upload(u) => Some(IndexKey::new(
                keys::upload_status_partition(u.status().as_str()),
                format!("{}#{}", keys::timestamp(&u.created_at), u.id),
            )),
            _ => None,
        }
    }

    /// Sparse public index: present only for discoverable tracks
    pub fn gsi2(&self) -> Option<IndexKey> {
        match self {
            Entity::Track(t) if t.visibility.is_discoverable() => {
                Some(keys::public_track_index(&t.created_at, &t.id))
            }
            _ => None,
        }
    }

    pub fn into_item(self) -> Result<Item, CodecError> {
        let entity_type = self.entity_type();
        let key = self.key();
        let gsi1 = self.gsi1();
        let gsi2 = self.gsi2();
        let data = match &self {
            Entity::Owner(v) => serde_json::to_value(v),
            Entity::Track(v) => serde_json::to_value(v),
            Entity::Album(v) => serde_json::to_value(v),
            Entity::Artist(v) => serde_json::to_value(v),
            Entity::Playlist(v) => serde_json::to_value(v),
            Entity::PlaylistEntry(v) => serde_json::to_value(v),
            Entity::Tag(v) => serde_json::to_value(v),
            Entity::TrackTag(v) => serde_json::to_value(v),
            Entity::Upload(v) => serde_json::to_value(v),
        }
        .map_err(|e| CodecError::Encode(e, entity_type))?;

        Ok(Item {
            key,
            gsi1,
            gsi2,
            entity_type: entity_type.as_str().to_string(),
            data,
            version: 0,
        })
    }

    pub fn from_item(item: Item) -> Result<Self, CodecError> {
        let Some(entity_type) = EntityType::parse(&item.entity_type) else {
            return Err(CodecError::UnknownType {
                key: item.key,
                entity_type: item.entity_type,
            });
        };

        fn decode<T: DeserializeOwned>(
            item: Item,
            entity_type: EntityType,
        ) -> Result<T, CodecError> {
            serde_json::from_value(item.data).map_err(|source| CodecError::Corrupt {
                key: item.key,
                entity_type,
                source,
            })
        }

        Ok(match entity_type {
            EntityType::Owner => Entity::Owner(decode(item, entity_type)?),
            EntityType::Track => Entity::Track(decode(item, entity_type)?),
            EntityType::Album => Entity::Album(decode(item, entity_type)?),
            EntityType::Artist => Entity::Artist(decode(item, entity_type)?),
            EntityType::Playlist => Entity::Playlist(decode(item, entity_type)?),
            EntityType::PlaylistEntry => Entity::PlaylistEntry(decode(item, entity_type)?),
            EntityType::Tag => Entity::Tag(decode(item, entity_type)?),
            EntityType::TrackTag => Entity::TrackTag(decode(item, entity_type)?),
            EntityType::Upload => Entity::Upload(decode(item, entity_type)?),
        })
    }
}

/// Implemented by each concrete entity so repositories can work with the
/// concrete type while the conversion still goes through [`Entity`].
pub trait Record: Clone + Serialize + Sized {
    const TYPE: EntityType;

    fn into_entity(self) -> Entity;

    fn from_entity(entity: Entity) -> Option<Self>;

    fn key(&self) -> ItemKey {
        self.clone().into_entity().key()
    }
}

macro_rules! record {
    ($variant:ident) => {
        impl Record for $variant {
            const TYPE: EntityType = EntityType::$variant;

            fn into_entity(self) -> Entity {
                Entity::$variant(self)
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

record!(Owner);
record!(Track);
record!(Album);
record!(Artist);
record!(Playlist);
record!(PlaylistEntry);
record!(Tag);
record!(TrackTag);
record!(Upload);

/// An entity together with the store version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Encode a concrete record into a raw item.
pub fn encode<T: Record>(record: T) -> Result<Item, CodecError> {
    record.into_entity().into_item()
}

/// Decode a raw item, insisting on a specific variant.
pub fn decode<T: Record>(item: Item) -> Result<Versioned<T>, CodecError> {
    let key = item.key.clone();
    let version = item.version;
    let entity = Entity::from_item(item)?;
    let found = entity.entity_type();
    T::from_entity(entity)
        .map(|value| Versioned::new(value, version))
        .ok_or(CodecError::WrongType {
            key,
            expected: T::TYPE,
            found,
        })
}
