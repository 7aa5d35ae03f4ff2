use byteorder::{ByteOrder, LittleEndian};

use crate::error::OleError;

pub(crate) const HEADER_SIZE: usize = 512;
pub(crate) const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;

/// Sector numbers above this are reserved markers, not real sectors.
pub(crate) const MAX_REGULAR_SECTOR: u32 = 0xFFFF_FFFA;
pub(crate) const END_OF_CHAIN: u32 = 0xFFFF_FFFE;

pub(crate) const DIR_ENTRY_SIZE: usize = 128;
pub(crate) const MINI_SECTOR_SIZE: u32 = 64;
/// Streams below this many bytes live in the ministream.
pub(crate) const MINI_STREAM_CUTOFF: u64 = 4096;
/// DIFAT slots embedded in the header itself.
pub(crate) const HEADER_DIFAT_SLOTS: usize = 109;

/// Decoded compound file header: the fixed 512 bytes at offset 0.
///
/// The sector size is derived from the major version and carried here,
/// on the instance, so independent readers over different files never
/// share state.
#[derive(Debug)]
pub(crate) struct Header {
    #[allow(dead_code)]
    pub minor_version: u16,
    pub major_version: u16,
    pub sector_size: u32,
    pub num_directory_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_directory_sector: u32,
    pub first_mini_fat_sector: u32,
    pub num_mini_fat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    pub difat_seed: [u32; HEADER_DIFAT_SLOTS],
}

impl Header {
    /// Decode and validate the header block.
    ///
    /// `buf` must hold the full 512 bytes. Violations of the format's
    /// structural rules come back as [`OleError::Format`] naming the
    /// offending field.
    pub fn parse(buf: &[u8]) -> Result<Header, OleError> {
        let signature = LittleEndian::read_u64(&buf[0..8]);
        if signature != SIGNATURE {
            return Err(OleError::Format {
                field: "signature",
                value: signature,
            });
        }

        let minor_version = LittleEndian::read_u16(&buf[24..26]);
        let major_version = LittleEndian::read_u16(&buf[26..28]);
        let sector_shift = LittleEndian::read_u16(&buf[30..32]);
        // Major version picks the sector size; the shift field must agree.
        let sector_size = match (major_version, sector_shift) {
            (3, 0x0009) => 512,
            (4, 0x000C) => 4096,
            (3, _) | (4, _) => {
                return Err(OleError::Format {
                    field: "sector shift",
                    value: u64::from(sector_shift),
                })
            }
            _ => {
                return Err(OleError::Format {
                    field: "major version",
                    value: u64::from(major_version),
                })
            }
        };

        let num_directory_sectors = LittleEndian::read_u32(&buf[40..44]);
        if major_version == 3 && num_directory_sectors != 0 {
            return Err(OleError::Format {
                field: "directory sector count",
                value: u64::from(num_directory_sectors),
            });
        }

        let mut difat_seed = [0u32; HEADER_DIFAT_SLOTS];
        for (i, slot) in difat_seed.iter_mut().enumerate() {
            *slot = LittleEndian::read_u32(&buf[76 + i * 4..80 + i * 4]);
        }

        let header = Header {
            minor_version,
            major_version,
            sector_size,
            num_directory_sectors,
            num_fat_sectors: LittleEndian::read_u32(&buf[44..48]),
            first_directory_sector: LittleEndian::read_u32(&buf[48..52]),
            first_mini_fat_sector: LittleEndian::read_u32(&buf[60..64]),
            num_mini_fat_sectors: LittleEndian::read_u32(&buf[64..68]),
            first_difat_sector: LittleEndian::read_u32(&buf[68..72]),
            num_difat_sectors: LittleEndian::read_u32(&buf[72..76]),
            difat_seed,
        };
        header.check_geometry()?;
        Ok(header)
    }

    /// Reject DIFAT and mini-FAT counts that would overflow, or claim
    /// more table space than the declared FAT can address.
    fn check_geometry(&self) -> Result<(), OleError> {
        let per_difat_sector = u64::from(self.sector_size / 4 - 1);
        let expanded = u64::from(self.num_difat_sectors)
            .checked_mul(per_difat_sector)
            .and_then(|n| n.checked_add(HEADER_DIFAT_SLOTS as u64));
        match expanded {
            Some(n) if n <= u64::from(self.num_fat_sectors) + per_difat_sector => {}
            _ => {
                return Err(OleError::Format {
                    field: "DIFAT sector count",
                    value: u64::from(self.num_difat_sectors),
                })
            }
        }

        let mini_entries = u64::from(self.num_mini_fat_sectors)
            .checked_mul(u64::from(self.sector_size / 4));
        let mini_cap =
            u64::from(self.num_fat_sectors) * u64::from(self.sector_size / MINI_SECTOR_SIZE);
        match mini_entries {
            Some(_) if u64::from(self.num_mini_fat_sectors) <= mini_cap => Ok(()),
            _ => Err(OleError::Format {
                field: "mini FAT sector count",
                value: u64::from(self.num_mini_fat_sectors),
            }),
        }
    }
}
