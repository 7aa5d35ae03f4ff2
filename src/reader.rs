use std::io::{self, Read, Seek};

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use log::debug;

use crate::directory::{
    filetime_to_utc, format_guid, traverse, DirEntry, Entry, EntryType, Visit,
};
use crate::error::OleError;
use crate::header::{
    Header, DIR_ENTRY_SIZE, END_OF_CHAIN, HEADER_DIFAT_SLOTS, HEADER_SIZE, MAX_REGULAR_SECTOR,
    MINI_SECTOR_SIZE, MINI_STREAM_CUTOFF,
};
use crate::source::{ByteSource, StreamSource};
use crate::stream::{Run, RunList};

/// Sequential reader over the entries of a compound file.
///
/// `open` parses the header, FAT tables and directory, then walks the
/// directory tree depth-first. [`next_entry`](OleFile::next_entry)
/// yields each entry in that order; the current stream entry's bytes
/// drain through [`read`](OleFile::read) (or the [`io::Read`] impl).
/// The root entry is consumed by `open` itself — its class id and
/// timestamps are available directly on the reader.
#[derive(Debug)]
pub struct OleFile<S> {
    source: S,
    header: Header,
    /// Sector numbers of the FAT sectors, in order.
    difat: Vec<u32>,
    /// Sector numbers of the mini FAT sectors, in order.
    mini_fat_locs: Vec<u32>,
    /// Regular sectors backing the ministream, in order.
    mini_stream_locs: Vec<u32>,
    entries: Vec<DirEntry>,
    visits: Vec<Visit>,
    cursor: usize,
    stream: RunList,
    /// Whether the source offered zero-copy slices at open time.
    sliceable: bool,
    root_clsid: String,
    root_created: Option<DateTime<Utc>>,
    root_modified: Option<DateTime<Utc>>,
}

impl<R: Read + Seek> OleFile<StreamSource<R>> {
    /// Open a compound file from any seekable reader.
    pub fn from_reader(reader: R) -> Result<Self, OleError> {
        OleFile::open(StreamSource::new(reader)?)
    }
}

impl<S: ByteSource> OleFile<S> {
    /// Parse the file's structures and position the reader on the root.
    pub fn open(mut source: S) -> Result<Self, OleError> {
        let mut buf = [0u8; HEADER_SIZE];
        if source.len() < HEADER_SIZE as u64 {
            return Err(OleError::Read(format!(
                "file of {} bytes is smaller than the {HEADER_SIZE} byte header",
                source.len()
            )));
        }
        source.read_at(&mut buf, 0)?;
        let header = Header::parse(&buf)?;
        let sliceable = source.slice_at(0, 0).is_some();

        let mut file = OleFile {
            source,
            header,
            difat: Vec::new(),
            mini_fat_locs: Vec::new(),
            mini_stream_locs: Vec::new(),
            entries: Vec::new(),
            visits: Vec::new(),
            cursor: 0,
            stream: RunList::new(),
            sliceable,
            root_clsid: String::new(),
            root_created: None,
            root_modified: None,
        };
        file.load_difat()?;
        file.load_directory()?;
        file.load_mini_stream()?;
        file.visits = traverse(&file.entries)?;

        let root = &file.entries[0];
        file.root_clsid = format_guid(&root.clsid);
        file.root_created = filetime_to_utc(root.created);
        file.root_modified = filetime_to_utc(root.modified);
        debug!(
            "opened compound file: {} byte sectors, {} directory entries",
            file.header.sector_size,
            file.entries.len()
        );
        Ok(file)
    }

    /// Class id of the root storage, as GUID text.
    pub fn id(&self) -> &str {
        &self.root_clsid
    }

    /// Creation timestamp of the root storage.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.root_created
    }

    /// Modification timestamp of the root storage.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.root_modified
    }

    /// Sector size established by the header (512 or 4096).
    pub fn sector_size(&self) -> u32 {
        self.header.sector_size
    }

    /// Number of live directory entries, the root included.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Advance to the next directory entry in traversal order.
    ///
    /// Returns `Ok(None)` once every entry has been yielded. Iteration
    /// starts with the root's first descendant; advancing to a readable
    /// stream resolves its sector chain so `read` can serve its bytes.
    pub fn next_entry(&mut self) -> Result<Option<Entry>, OleError> {
        if self.cursor < self.visits.len() {
            self.cursor += 1;
        }
        let Some(visit) = self.visits.get(self.cursor) else {
            self.stream.clear();
            return Ok(None);
        };
        let index = visit.index;
        let path = visit.path.clone();

        let raw = &self.entries[index];
        let entry = Entry {
            name: raw.name.clone(),
            path,
            entry_type: raw.entry_type(),
            size: raw.size,
            clsid: format_guid(&raw.clsid),
            state_bits: raw.state_bits,
            created: filetime_to_utc(raw.created),
            modified: filetime_to_utc(raw.modified),
            initial: raw.initial,
        };
        let start = raw.start_sector;
        let size = raw.size;

        self.stream.clear();
        if entry.is_stream() && size > 0 && start <= MAX_REGULAR_SECTOR {
            self.set_stream(start, size, size < MINI_STREAM_CUTOFF)?;
        }
        Ok(Some(entry))
    }

    /// Read stream bytes for the current entry into `buf`.
    ///
    /// A count shorter than `buf.len()` means the stream just ran out;
    /// the call after that returns `Ok(0)`. Storages and the root have
    /// no bytes to read and fail with [`OleError::NoStream`]; reading
    /// after the last entry returns `Ok(0)`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, OleError> {
        let Some(index) = self.visits.get(self.cursor).map(|v| v.index) else {
            return Ok(0); // iterated past the end
        };
        if index == 0 || self.entries[index].entry_type() != EntryType::Stream {
            return Err(OleError::NoStream);
        }
        if self.stream.is_empty() {
            return Ok(0);
        }

        let (runs, total) = self.stream.pop(buf.len() as u64);
        let mut filled = 0usize;
        for run in runs {
            let len = run.len as usize;
            self.read_at(&mut buf[filled..filled + len], run.offset)?;
            filled += len;
        }
        Ok(total as usize)
    }

    /// File offset of a regular sector. Sector 0 starts right after the
    /// header, one sector into the file.
    fn sector_offset(&self, sn: u32) -> u64 {
        (u64::from(sn) + 1) * u64::from(self.header.sector_size)
    }

    /// File offset of a mini sector, resolved through the ministream's
    /// backing sectors.
    fn mini_sector_offset(&self, sn: u32) -> Result<u64, OleError> {
        let per_sector = self.header.sector_size / MINI_SECTOR_SIZE;
        let index = (sn / per_sector) as usize;
        let within = u64::from(sn % per_sector);
        let backing = *self.mini_stream_locs.get(index).ok_or_else(|| {
            OleError::BadDirectory(format!(
                "mini sector {sn} outside the ministream ({} backing sectors)",
                self.mini_stream_locs.len()
            ))
        })?;
        Ok(self.sector_offset(backing) + within * u64::from(MINI_SECTOR_SIZE))
    }

    fn stream_offset(&self, sn: u32, mini: bool) -> Result<u64, OleError> {
        if mini {
            self.mini_sector_offset(sn)
        } else {
            Ok(self.sector_offset(sn))
        }
    }

    /// Upper bound on how many sectors the file can hold.
    fn max_sectors(&self) -> u64 {
        self.source.len() / u64::from(self.header.sector_size) + 1
    }

    /// Read exactly `buf.len()` bytes at `offset`, after verifying the
    /// span lies inside the file. Uses the zero-copy capability when the
    /// source offered one at open time.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<(), OleError> {
        match offset.checked_add(buf.len() as u64) {
            Some(end) if end <= self.source.len() => {}
            _ => {
                return Err(OleError::Read(format!(
                    "{} bytes at offset {offset} fall outside the file ({} bytes)",
                    buf.len(),
                    self.source.len()
                )))
            }
        }
        if self.sliceable {
            if let Some(view) = self.source.slice_at(offset, buf.len()) {
                buf.copy_from_slice(view);
                return Ok(());
            }
        }
        self.source.read_at(buf, offset)?;
        Ok(())
    }

    fn read_u32_at(&mut self, offset: u64) -> Result<u32, OleError> {
        let mut buf = [0u8; 4];
        self.read_at(&mut buf, offset)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Next sector in a chain, looked up in the FAT (regular namespace)
    /// or the mini FAT.
    fn next_sector(&mut self, sn: u32, mini: bool) -> Result<u32, OleError> {
        let entries_per_sector = self.header.sector_size / 4;
        let index = (sn / entries_per_sector) as usize;
        let table = if mini { &self.mini_fat_locs } else { &self.difat };
        let fat_sector = *table.get(index).ok_or_else(|| {
            let table_name = if mini { "mini FAT" } else { "DIFAT" };
            OleError::BadDirectory(format!(
                "sector {sn} indexes past the {table_name} ({} sectors)",
                table.len()
            ))
        })?;
        let offset = self.sector_offset(fat_sector) + u64::from(sn % entries_per_sector) * 4;
        self.read_u32_at(offset)
    }

    /// Assemble the DIFAT: the 109 header slots, then the DIFAT sector
    /// chain. Each extra sector carries `sector_size / 4 - 1` FAT sector
    /// numbers and a trailing link to the next DIFAT sector.
    fn load_difat(&mut self) -> Result<(), OleError> {
        if u64::from(self.header.num_difat_sectors) > self.max_sectors() {
            return Err(OleError::Format {
                field: "DIFAT sector count",
                value: u64::from(self.header.num_difat_sectors),
            });
        }
        let per_sector = (self.header.sector_size / 4 - 1) as usize;
        let extra = self.header.num_difat_sectors as usize;
        let mut difat = Vec::with_capacity(HEADER_DIFAT_SLOTS + extra * per_sector);
        difat.extend_from_slice(&self.header.difat_seed);

        let mut sector = vec![0u8; self.header.sector_size as usize];
        let mut sn = self.header.first_difat_sector;
        for _ in 0..extra {
            let offset = self.sector_offset(sn);
            self.read_at(&mut sector, offset)?;
            for link in sector[..per_sector * 4].chunks_exact(4) {
                difat.push(LittleEndian::read_u32(link));
            }
            sn = LittleEndian::read_u32(&sector[sector.len() - 4..]);
        }
        self.difat = difat;
        Ok(())
    }

    /// Read the directory stream into a flat entry array, skipping
    /// unallocated records.
    fn load_directory(&mut self) -> Result<(), OleError> {
        let limit = self.max_sectors();
        let hint = u64::from(self.header.num_directory_sectors)
            .max(20)
            .min(limit) as usize;
        let mut entries: Vec<DirEntry> = Vec::with_capacity(hint);

        let mut sector = vec![0u8; self.header.sector_size as usize];
        let mut sn = self.header.first_directory_sector;
        let mut walked = 0u64;
        while sn <= MAX_REGULAR_SECTOR {
            walked += 1;
            if walked > limit {
                return Err(OleError::BadDirectory(format!(
                    "directory chain longer than the file ({limit} sectors)"
                )));
            }
            let offset = self.sector_offset(sn);
            self.read_at(&mut sector, offset)?;
            for record in sector.chunks_exact(DIR_ENTRY_SIZE) {
                let entry = DirEntry::parse(record, self.header.major_version);
                if !entry.is_unallocated() {
                    entries.push(entry);
                }
            }
            sn = self.next_sector(sn, false)?;
        }

        if entries.is_empty() {
            return Err(OleError::BadDirectory("no directory entries".into()));
        }
        if !entries[0].is_root() {
            return Err(OleError::Format {
                field: "root entry type",
                value: u64::from(entries[0].object_type),
            });
        }
        self.entries = entries;
        Ok(())
    }

    /// Resolve the mini FAT sectors and the ministream's backing chain.
    /// Absent ministream (no root chain, no mini FAT) is a no-op.
    fn load_mini_stream(&mut self) -> Result<(), OleError> {
        let root_start = self.entries[0].start_sector;
        if root_start == END_OF_CHAIN
            || self.header.first_mini_fat_sector == END_OF_CHAIN
            || self.header.num_mini_fat_sectors == 0
        {
            return Ok(());
        }

        let count = self.header.num_mini_fat_sectors as usize;
        if count as u64 > self.max_sectors() {
            return Err(OleError::Format {
                field: "mini FAT sector count",
                value: count as u64,
            });
        }
        let mut locs = Vec::with_capacity(count);
        locs.push(self.header.first_mini_fat_sector);
        for i in 1..count {
            let next = self.next_sector(locs[i - 1], false)?;
            if next > MAX_REGULAR_SECTOR {
                return Err(OleError::BadDirectory(format!(
                    "mini FAT chain ended after {i} of {count} sectors"
                )));
            }
            locs.push(next);
        }
        self.mini_fat_locs = locs;

        // The ministream is the root entry's own stream; its chain is
        // bounded by the root's declared size like any other stream.
        let root_size = self.entries[0].size;
        let sector_size = u64::from(self.header.sector_size);
        let limit = (root_size + sector_size - 1) / sector_size + 1;
        let mut locs = Vec::new();
        let mut sn = root_start;
        while sn <= MAX_REGULAR_SECTOR {
            if locs.len() as u64 >= limit {
                return Err(OleError::Read(format!(
                    "ministream chain exceeds its {root_size} byte size"
                )));
            }
            locs.push(sn);
            sn = self.next_sector(sn, false)?;
        }
        self.mini_stream_locs = locs;
        Ok(())
    }

    /// Walk the entry's sector chain into a run list covering exactly
    /// `size` bytes: whole sectors first, then truncate the slack and
    /// merge contiguous neighbours.
    fn set_stream(&mut self, start: u32, size: u64, mini: bool) -> Result<(), OleError> {
        if size > self.source.len() {
            return Err(OleError::Read(format!(
                "stream declares {size} bytes but the file holds {}",
                self.source.len()
            )));
        }
        let sector_bytes = if mini {
            u64::from(MINI_SECTOR_SIZE)
        } else {
            u64::from(self.header.sector_size)
        };
        let limit = (size + sector_bytes - 1) / sector_bytes + 1;

        let mut runs = RunList::with_capacity(limit as usize);
        let mut sn = start;
        let mut walked = 0u64;
        while sn <= MAX_REGULAR_SECTOR {
            if walked == limit {
                return Err(OleError::Read(format!(
                    "sector chain for a {size} byte stream exceeds {limit} sectors"
                )));
            }
            let offset = self.stream_offset(sn, mini)?;
            runs.push(Run {
                offset,
                len: sector_bytes,
            });
            walked += 1;
            sn = self.next_sector(sn, mini)?;
        }

        if runs.total() < size {
            return Err(OleError::Read(format!(
                "sector chain ends at {} bytes, stream declares {size}",
                runs.total()
            )));
        }
        runs.truncate(size);
        runs.compress();
        self.stream = runs;
        Ok(())
    }
}

impl<S: ByteSource> Read for OleFile<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        OleFile::read(self, buf).map_err(io::Error::from)
    }
}
