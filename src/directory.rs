use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::OleError;

/// "No sibling / no child" marker in the stream id fields.
pub(crate) const NO_STREAM: u32 = 0xFFFF_FFFF;

// object type tags
const TYPE_UNALLOCATED: u8 = 0;
const TYPE_STORAGE: u8 = 1;
const TYPE_STREAM: u8 = 2;
const TYPE_ROOT: u8 = 5;

/// Object class of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// The distinguished root storage; its stream backs the ministream.
    Root,
    /// A storage (directory) object.
    Storage,
    /// A stream (file) object.
    Stream,
    /// Any other type tag found on disk.
    Unknown,
}

/// One 128-byte directory record, as stored on disk.
#[derive(Debug, Clone)]
pub(crate) struct DirEntry {
    pub name: String,
    pub initial: u16,
    pub object_type: u8,
    pub left_id: u32,
    pub right_id: u32,
    pub child_id: u32,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    pub created: u64,
    pub modified: u64,
    pub start_sector: u32,
    pub size: u64,
}

impl DirEntry {
    /// Decode a 128-byte record. Byte 67 (the red/black color flag) is
    /// not needed for reading and is skipped.
    pub fn parse(buf: &[u8], major_version: u16) -> DirEntry {
        let mut raw_name = [0u16; 32];
        LittleEndian::read_u16_into(&buf[0..64], &mut raw_name);
        let name_len = LittleEndian::read_u16(&buf[64..66]) as usize;
        let (name, initial) = decode_name(&raw_name, name_len);

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&buf[80..96]);

        let mut size = LittleEndian::read_u64(&buf[120..128]);
        // Version 3 writers leave junk in the upper half of the size field.
        if major_version == 3 {
            size &= 0xFFFF_FFFF;
        }

        DirEntry {
            name,
            initial,
            object_type: buf[66],
            left_id: LittleEndian::read_u32(&buf[68..72]),
            right_id: LittleEndian::read_u32(&buf[72..76]),
            child_id: LittleEndian::read_u32(&buf[76..80]),
            clsid,
            state_bits: LittleEndian::read_u32(&buf[96..100]),
            created: LittleEndian::read_u64(&buf[100..108]),
            modified: LittleEndian::read_u64(&buf[108..116]),
            start_sector: LittleEndian::read_u32(&buf[116..120]),
            size,
        }
    }

    pub fn is_unallocated(&self) -> bool {
        self.object_type == TYPE_UNALLOCATED
    }

    pub fn is_root(&self) -> bool {
        self.object_type == TYPE_ROOT
    }

    pub fn entry_type(&self) -> EntryType {
        match self.object_type {
            TYPE_STORAGE => EntryType::Storage,
            TYPE_STREAM => EntryType::Stream,
            TYPE_ROOT => EntryType::Root,
            _ => EntryType::Unknown,
        }
    }
}

/// A directory entry yielded by [`crate::OleFile::next_entry`].
#[derive(Debug, Clone)]
pub struct Entry {
    /// Display name, minus any marker code unit.
    pub name: String,
    /// Names of the ancestor storages, outermost first. Descendants of
    /// the root do not carry the root's own name.
    pub path: Vec<String>,
    pub entry_type: EntryType,
    /// Stream length in bytes (on the root: the ministream length).
    pub size: u64,
    /// Object class GUID rendered as text; the nil GUID on most streams.
    pub clsid: String,
    /// User-defined state bits.
    pub state_bits: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// First UTF-16 unit of the raw name. Identifies special streams
    /// whose names open with an unprintable marker (kept out of `name`).
    pub initial: u16,
}

impl Entry {
    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::Stream
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.entry_type, EntryType::Storage | EntryType::Root)
    }

    pub fn is_root(&self) -> bool {
        self.entry_type == EntryType::Root
    }

    /// Slash-joined ancestor path including the entry's own name.
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path.join("/"), self.name)
        }
    }
}

/// Decode a UTF-16LE entry name.
///
/// `name_len` counts bytes including the terminating NUL pair, so 0 and
/// 2 both decode to the empty string. The first code unit is returned
/// alongside; when it is an unprintable marker it is excluded from the
/// display name.
fn decode_name(raw: &[u16; 32], name_len: usize) -> (String, u16) {
    let units = if name_len >= 2 {
        (name_len / 2 - 1).min(raw.len())
    } else {
        0
    };
    if units == 0 {
        return (String::new(), 0);
    }
    let initial = raw[0];
    let skip = usize::from(is_marker(initial));
    (String::from_utf16_lossy(&raw[skip..units]), initial)
}

/// Control code units flag property-set and other special streams.
fn is_marker(unit: u16) -> bool {
    unit < 0x20 || (0x7F..=0x9F).contains(&unit)
}

/// Seconds between the FILETIME epoch (1601-01-01) and the Unix epoch.
const FILETIME_UNIX_DELTA: i64 = 11_644_473_600;

/// Convert a Windows FILETIME (100 ns ticks since 1601-01-01 UTC) to a
/// UTC timestamp. The zero value means "not set".
pub(crate) fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    if ticks == 0 {
        return None;
    }
    let secs = (ticks / 10_000_000) as i64 - FILETIME_UNIX_DELTA;
    let nanos = (ticks % 10_000_000) as u32 * 100;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Render a CLSID as canonical GUID text. The first three fields are
/// stored little-endian; the trailing eight bytes are not.
pub(crate) fn format_guid(clsid: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        LittleEndian::read_u32(&clsid[0..4]),
        LittleEndian::read_u16(&clsid[4..6]),
        LittleEndian::read_u16(&clsid[6..8]),
        clsid[8],
        clsid[9],
        clsid[10],
        clsid[11],
        clsid[12],
        clsid[13],
        clsid[14],
        clsid[15],
    )
}

/// One step of the depth-first visitation order.
#[derive(Debug)]
pub(crate) struct Visit {
    pub index: usize,
    pub path: Vec<String>,
    #[allow(dead_code)]
    pub depth: u32,
}

/// Eager in-order walk of the directory forest: left subtree, node,
/// child subtree, right subtree, starting from the root at index 0.
/// Children of the root inherit the root's empty path.
pub(crate) fn traverse(entries: &[DirEntry]) -> Result<Vec<Visit>, OleError> {
    if entries.is_empty() {
        return Err(OleError::BadDirectory("no directory entries".into()));
    }
    let mut visits = Vec::with_capacity(entries.len());
    let mut seen = vec![false; entries.len()];
    let mut path = Vec::new();
    walk(entries, 0, 0, &mut path, &mut seen, &mut visits)?;
    Ok(visits)
}

fn walk(
    entries: &[DirEntry],
    id: u32,
    depth: u32,
    path: &mut Vec<String>,
    seen: &mut [bool],
    visits: &mut Vec<Visit>,
) -> Result<(), OleError> {
    let index = id as usize;
    if index >= entries.len() {
        return Err(OleError::BadDirectory(format!(
            "stream id {id} outside the directory ({} entries)",
            entries.len()
        )));
    }
    if seen[index] {
        return Err(OleError::BadDirectory(format!(
            "directory tree cycles through entry {id}"
        )));
    }
    seen[index] = true;
    if depth as usize > entries.len() {
        return Err(OleError::BadDirectory(format!(
            "directory tree deeper than its {} entries",
            entries.len()
        )));
    }

    let entry = &entries[index];
    if entry.left_id != NO_STREAM {
        walk(entries, entry.left_id, depth, path, seen, visits)?;
    }
    visits.push(Visit {
        index,
        path: path.clone(),
        depth,
    });
    if entry.child_id != NO_STREAM {
        if index == 0 {
            // the root's children share its (empty) path
            walk(entries, entry.child_id, depth + 1, path, seen, visits)?;
        } else {
            path.push(entry.name.clone());
            walk(entries, entry.child_id, depth + 1, path, seen, visits)?;
            path.pop();
        }
    }
    if entry.right_id != NO_STREAM {
        walk(entries, entry.right_id, depth, path, seen, visits)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, object_type: u8, left: u32, right: u32, child: u32) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            initial: 0,
            object_type,
            left_id: left,
            right_id: right,
            child_id: child,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_sector: END,
            size: 0,
        }
    }

    const N: u32 = NO_STREAM;
    const END: u32 = 0xFFFF_FFFE;

    fn twelve_entry_tree() -> Vec<DirEntry> {
        vec![
            node("Root", TYPE_ROOT, N, N, 1),
            node("Alpha", TYPE_STORAGE, N, 2, N),
            node("Bravo", TYPE_STORAGE, N, 3, 5),
            node("Charlie", TYPE_STORAGE, N, N, 7),
            node("Delta", TYPE_STORAGE, N, N, N),
            node("Echo", TYPE_STORAGE, 4, 6, 9),
            node("Foxtrot", TYPE_STORAGE, N, N, N),
            node("Golf", TYPE_STORAGE, N, N, 10),
            node("Hotel", TYPE_STORAGE, N, N, N),
            node("Indigo", TYPE_STORAGE, 8, N, 11),
            node("Jello", TYPE_STORAGE, N, N, N),
            node("Kilo", TYPE_STORAGE, N, N, N),
        ]
    }

    #[test]
    fn traversal_is_in_order_and_depth_first() {
        let visits = traverse(&twelve_entry_tree()).unwrap();
        let order: Vec<usize> = visits.iter().map(|v| v.index).collect();
        assert_eq!(order, vec![0, 1, 2, 4, 5, 8, 9, 11, 6, 3, 7, 10]);
        let depths: Vec<u32> = visits.iter().map(|v| v.depth).collect();
        assert_eq!(depths, vec![0, 1, 1, 2, 2, 3, 3, 4, 3, 2, 3, 4]);
    }

    #[test]
    fn traversal_builds_ancestor_paths() {
        let visits = traverse(&twelve_entry_tree()).unwrap();
        let jello = visits.iter().find(|v| v.index == 10).unwrap();
        assert_eq!(jello.path, vec!["Charlie".to_string(), "Golf".to_string()]);
        let kilo = visits.iter().find(|v| v.index == 11).unwrap();
        assert_eq!(
            kilo.path,
            vec!["Bravo".to_string(), "Echo".to_string(), "Indigo".to_string()]
        );
        // children of the root carry the root's empty path
        let alpha = visits.iter().find(|v| v.index == 1).unwrap();
        assert!(alpha.path.is_empty());
    }

    #[test]
    fn traversal_visits_every_entry_once() {
        let visits = traverse(&twelve_entry_tree()).unwrap();
        let mut order: Vec<usize> = visits.iter().map(|v| v.index).collect();
        order.sort_unstable();
        assert_eq!(order, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn traversal_rejects_cycles() {
        let mut entries = twelve_entry_tree();
        entries[10].child_id = 2; // Jello points back up at Bravo
        let err = traverse(&entries).unwrap_err();
        assert!(matches!(err, OleError::BadDirectory(_)));
    }

    #[test]
    fn traversal_rejects_out_of_range_ids() {
        let mut entries = twelve_entry_tree();
        entries[4].right_id = 40;
        let err = traverse(&entries).unwrap_err();
        assert!(matches!(err, OleError::BadDirectory(_)));
    }

    fn raw_entry(name: &str, object_type: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 128];
        let units: Vec<u16> = name.encode_utf16().collect();
        for (i, unit) in units.iter().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        buf[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
        buf[66] = object_type;
        buf
    }

    #[test]
    fn parses_a_stream_record() {
        let mut buf = raw_entry("WordDocument", TYPE_STREAM);
        buf[116..120].copy_from_slice(&7u32.to_le_bytes());
        buf[120..128].copy_from_slice(&0x0000_0000_0000_1234u64.to_le_bytes());
        let entry = DirEntry::parse(&buf, 3);
        assert_eq!(entry.name, "WordDocument");
        assert_eq!(entry.entry_type(), EntryType::Stream);
        assert_eq!(entry.start_sector, 7);
        assert_eq!(entry.size, 0x1234);
    }

    #[test]
    fn masks_the_size_upper_half_on_version_3_only() {
        let mut buf = raw_entry("S", TYPE_STREAM);
        buf[120..128].copy_from_slice(&0xDEAD_BEEF_0000_0040u64.to_le_bytes());
        assert_eq!(DirEntry::parse(&buf, 3).size, 0x40);
        assert_eq!(DirEntry::parse(&buf, 4).size, 0xDEAD_BEEF_0000_0040);
    }

    #[test]
    fn empty_and_nul_only_names_decode_to_empty() {
        let raw = [0u16; 32];
        assert_eq!(decode_name(&raw, 0), (String::new(), 0));
        assert_eq!(decode_name(&raw, 2), (String::new(), 0));
    }

    #[test]
    fn marker_code_units_are_stripped_but_retained() {
        let mut raw = [0u16; 32];
        raw[0] = 0x0005;
        for (i, c) in "SummaryInformation".encode_utf16().enumerate() {
            raw[i + 1] = c;
        }
        // 19 units + NUL = 40 bytes
        let (name, initial) = decode_name(&raw, 40);
        assert_eq!(name, "SummaryInformation");
        assert_eq!(initial, 0x0005);
    }

    #[test]
    fn filetime_zero_is_not_set() {
        assert!(filetime_to_utc(0).is_none());
    }

    #[test]
    fn filetime_converts_to_utc() {
        // 100 seconds past the Unix epoch
        let ticks = 116_444_736_000_000_000u64 + 1_000_000_000;
        let when = filetime_to_utc(ticks).unwrap();
        assert_eq!(when.timestamp(), 100);
    }

    #[test]
    fn guids_render_with_little_endian_leading_fields() {
        let clsid: [u8; 16] = [
            0x04, 0x03, 0x02, 0x01, 0x06, 0x05, 0x08, 0x07, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ];
        assert_eq!(
            format_guid(&clsid),
            "01020304-0506-0708-090A-0B0C0D0E0F10"
        );
    }
}
