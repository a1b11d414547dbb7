//! Key construction for every entity kind
//!
//! All partition keys are rooted at `USER#{owner}` so any entity can be
//! located from its owner id plus a type-tagged discriminator. The only
//! exceptions are index partitions that span owners (`EMAIL`,
//! `PUBLIC#TRACK`, `UPLOAD#STATUS#…`), which never act as primary keys.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::table::{IndexKey, ItemKey};

pub const PROFILE: &str = "PROFILE";
pub const TRACK_PREFIX: &str = "TRACK#";
pub const ALBUM_PREFIX: &str = "ALBUM#";
pub const ARTIST_PREFIX: &str = "ARTIST#";
pub const PLAYLIST_PREFIX: &str = "PLAYLIST#";
pub const POSITION_PREFIX: &str = "POSITION#";
pub const TAG_PREFIX: &str = "TAG#";
pub const UPLOAD_PREFIX: &str = "UPLOAD#";

/// gsi1 partition holding every owner, sorted by email
pub const EMAIL_PARTITION: &str = "EMAIL";
/// gsi2 partition holding public tracks only
pub const PUBLIC_TRACKS_PARTITION: &str = "PUBLIC#TRACK";

/// Fixed-width UTC timestamp so lexical order equals time order.
pub fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn owner_partition(owner_id: &Uuid) -> String {
    format!("USER#{}", owner_id)
}

pub fn owner(owner_id: &Uuid) -> ItemKey {
    ItemKey::new(owner_partition(owner_id), PROFILE)
}

pub fn owner_email_index(owner_id: &Uuid, email: &str) -> IndexKey {
    IndexKey::new(
        EMAIL_PARTITION,
        format!("{}#{}", email.trim().to_lowercase(), owner_id),
    )
}

pub fn track(owner_id: &Uuid, track_id: &Uuid) -> ItemKey {
    ItemKey::new(owner_partition(owner_id), format!("{}{}", TRACK_PREFIX, track_id))
}

/// Longest artist name carried into a key, in chars
pub const MAX_ARTIST_KEY_CHARS: usize = 200;

/// Artist name as it appears inside keys.
///
/// Runs of whitespace and control characters collapse to one space, case
/// is folded and the length is bounded, so the stored name and a lookup by
/// the displayed name land on the same partition.
pub fn artist_key_part(name: &str) -> String {
    let folded = name
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    folded.chars().take(MAX_ARTIST_KEY_CHARS).collect()
}

/// gsi1 partition grouping an owner's tracks and albums by artist
pub fn artist_partition(owner_id: &Uuid, artist: &str) -> String {
    format!("USER#{}#ARTIST#{}", owner_id, artist_key_part(artist))
}

/// gsi1 sort key of an artist within [`artists_partition`]
pub fn artist_sort(name: &str, artist_id: &str) -> String {
    format!("{}#{}", artist_key_part(name), artist_id)
}

/// gsi1 partition listing an owner's artists by name
pub fn artists_partition(owner_id: &Uuid) -> String {
    format!("USER#{}#ARTIST", owner_id)
}

pub fn public_track_index(created_at: &DateTime<Utc>, track_id: &Uuid) -> IndexKey {
    IndexKey::new(
        PUBLIC_TRACKS_PARTITION,
        format!("{}#{}", timestamp(created_at), track_id),
    )
}

pub fn album(owner_id: &Uuid, album_id: &str) -> ItemKey {
    ItemKey::new(owner_partition(owner_id), format!("{}{}", ALBUM_PREFIX, album_id))
}

pub fn album_sort(year: Option<u32>, album_id: &str) -> String {
    format!("{}{:04}#{}", ALBUM_PREFIX, year.unwrap_or(0), album_id)
}

pub fn artist(owner_id: &Uuid, artist_id: &str) -> ItemKey {
    ItemKey::new(owner_partition(owner_id), format!("{}{}", ARTIST_PREFIX, artist_id))
}

pub fn playlist(owner_id: &Uuid, playlist_id: &Uuid) -> ItemKey {
    ItemKey::new(
        owner_partition(owner_id),
        format!("{}{}", PLAYLIST_PREFIX, playlist_id),
    )
}

pub fn playlist_entries_partition(owner_id: &Uuid, playlist_id: &Uuid) -> String {
    format!("USER#{}#PLAYLIST#{}", owner_id, playlist_id)
}

pub fn position_sort(position: u32) -> String {
    format!("{}{:08}", POSITION_PREFIX, position)
}

pub fn playlist_entry(owner_id: &Uuid, playlist_id: &Uuid, position: u32) -> ItemKey {
    ItemKey::new(
        playlist_entries_partition(owner_id, playlist_id),
        position_sort(position),
    )
}

pub fn tag(owner_id: &Uuid, name: &str) -> ItemKey {
    ItemKey::new(owner_partition(owner_id), format!("{}{}", TAG_PREFIX, name))
}

pub fn track_tags_partition(owner_id: &Uuid, track_id: &Uuid) -> String {
    format!("USER#{}#TRACK#{}", owner_id, track_id)
}

pub fn track_tag(owner_id: &Uuid, track_id: &Uuid, name: &str) -> ItemKey {
    ItemKey::new(
        track_tags_partition(owner_id, track_id),
        format!("{}{}", TAG_PREFIX, name),
    )
}

/// gsi1 partition listing the tracks that carry a tag
pub fn tag_tracks_partition(owner_id: &Uuid, name: &str) -> String {
    format!("USER#{}#TAG#{}", owner_id, name)
}

pub fn upload(owner_id: &Uuid, upload_id: &Uuid) -> ItemKey {
    ItemKey::new(owner_partition(owner_id), format!("{}{}", UPLOAD_PREFIX, upload_id))
}

pub fn upload_status_partition(status: &str) -> String {
    format!("UPLOAD#STATUS#{}", status)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(7);
        assert_eq!(timestamp(&a), "2024-01-02T03:04:05.000Z");
        assert_eq!(timestamp(&b), "2024-01-02T03:04:05.007Z");
        assert!(timestamp(&a) < timestamp(&b));
    }

    #[test]
    fn test_positions_sort_lexically() {
        assert!(position_sort(2) < position_sort(10));
        assert_eq!(position_sort(1), "POSITION#00000001");
    }

    #[test]
    fn test_keys_are_owner_rooted() {
        let owner_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let root = owner_partition(&owner_id);
        for key in [
            owner(&owner_id),
            track(&owner_id, &id),
            album(&owner_id, "abc"),
            playlist(&owner_id, &id),
            playlist_entry(&owner_id, &id, 1),
            tag(&owner_id, "rock"),
            track_tag(&owner_id, &id, "rock"),
            upload(&owner_id, &id),
        ] {
            assert!(key.pk.starts_with(&root), "{} not rooted at owner", key);
        }
    }

    #[test]
    fn test_artist_key_part_is_key_safe() {
        assert_eq!(artist_key_part("Simon\tGarfunkel"), "simon garfunkel");
        assert_eq!(artist_key_part("  Simon \n\u{1} Garfunkel "), "simon garfunkel");
        assert_eq!(artist_key_part(&"x".repeat(5000)).chars().count(), MAX_ARTIST_KEY_CHARS);

        let owner_id = Uuid::new_v4();
        assert_eq!(
            artist_partition(&owner_id, "Simon\tGarfunkel"),
            artist_partition(&owner_id, " simon garfunkel")
        );
        let long = artist_partition(&owner_id, &"\u{00e9}".repeat(5000));
        assert!(long.len() < muse_common::ids::MAX_KEY_LEN);
        assert!(!artist_sort("\u{7}", "abc").is_empty());
    }

    #[test]
    fn test_album_sort_pads_year() {
        assert_eq!(album_sort(Some(1999), "x"), "ALBUM#1999#x");
        assert_eq!(album_sort(None, "x"), "ALBUM#0000#x");
    }
}
