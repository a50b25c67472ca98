//! # Description
//! - the external memory the accelerator masters: a set of mapped regions of 16 bit words.
//! - addresses are byte addresses, every access must be aligned to the element size.
//! - the host moves data with 64 bit beats holding four elements, lowest address in bits 15:0.
//! - device side traffic is counted in bytes and in 64 byte bursts.
use log::{debug, trace};
use serde::Serialize;

use super::fixed_point::Data;
use crate::{
    error::{AccelError, ConfigError},
    tensor::ELEMENT_BYTES,
};

/// one burst of the memory port
pub const BURST_BYTES: u64 = 64;
/// elements carried by one 64 bit beat
pub const BEAT_ELEMENTS: usize = 4;

pub fn pack_4x16(words: [Data; BEAT_ELEMENTS]) -> u64 {
    words
        .iter()
        .enumerate()
        .fold(0u64, |beat, (i, word)| {
            beat | ((word.raw() as i16 as u16 as u64) << (16 * i))
        })
}

pub fn unpack_4x16(beat: u64) -> [Data; BEAT_ELEMENTS] {
    let mut words = [Data::ZERO; BEAT_ELEMENTS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = Data::from_raw((beat >> (16 * i)) as u16 as i16 as i32);
    }
    words
}

/// number of 64 byte lines touched by `bytes` bytes starting at `addr`
fn bursts(addr: u64, bytes: u64) -> u64 {
    if bytes == 0 {
        return 0;
    }
    addr.saturating_add(bytes - 1) / BURST_BYTES - addr / BURST_BYTES + 1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_bursts: u64,
    pub write_bursts: u64,
}

#[derive(Debug, Clone)]
struct Region {
    base: u64,
    data: Vec<Data>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64 * ELEMENT_BYTES
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceMemory {
    regions: Vec<Region>,
    stats: MemoryStats,
}

impl DeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// map `bytes` zeroed bytes at `base`
    pub fn map_region(&mut self, base: u64, bytes: u64) -> Result<(), ConfigError> {
        if base % ELEMENT_BYTES != 0 {
            return Err(ConfigError::Misaligned(base));
        }
        if bytes % ELEMENT_BYTES != 0 {
            return Err(ConfigError::Misaligned(base + bytes));
        }
        let end = base
            .checked_add(bytes)
            .ok_or(ConfigError::AddressOverflow(base))?;
        if let Some(other) = self
            .regions
            .iter()
            .find(|r| base < r.end() && r.base < end)
        {
            return Err(ConfigError::RegionOverlap {
                a_start: base,
                a_end: end,
                b_start: other.base,
                b_end: other.end(),
            });
        }
        debug!("map region [{:#x}, {:#x})", base, end);
        self.regions.push(Region {
            base,
            data: vec![Data::ZERO; (bytes / ELEMENT_BYTES) as usize],
        });
        Ok(())
    }

    /// the mapped regions as (base, bytes)
    pub fn regions(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.regions
            .iter()
            .map(|r| (r.base, r.data.len() as u64 * ELEMENT_BYTES))
    }

    fn locate(&self, addr: u64, len: usize) -> Result<(usize, usize), AccelError> {
        let bytes = len as u64 * ELEMENT_BYTES;
        let fault = AccelError::MemoryFault { addr, len: bytes };
        if addr % ELEMENT_BYTES != 0 {
            return Err(fault);
        }
        self.regions
            .iter()
            .position(|r| {
                r.base <= addr && addr.checked_add(bytes).map_or(false, |end| end <= r.end())
            })
            .map(|index| {
                let offset = ((addr - self.regions[index].base) / ELEMENT_BYTES) as usize;
                (index, offset)
            })
            .ok_or(fault)
    }

    /// a host view of a mapped range, not counted as device traffic
    pub fn slice(&self, addr: u64, len: usize) -> Result<&[Data], AccelError> {
        let (index, offset) = self.locate(addr, len)?;
        Ok(&self.regions[index].data[offset..offset + len])
    }

    pub fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [Data], AccelError> {
        let (index, offset) = self.locate(addr, len)?;
        Ok(&mut self.regions[index].data[offset..offset + len])
    }

    /// device read of `dst.len()` consecutive elements
    pub fn read(&mut self, addr: u64, dst: &mut [Data]) -> Result<(), AccelError> {
        dst.copy_from_slice(self.slice(addr, dst.len())?);
        self.record_read(addr, dst.len());
        Ok(())
    }

    /// device write of `src.len()` consecutive elements
    pub fn write(&mut self, addr: u64, src: &[Data]) -> Result<(), AccelError> {
        self.slice_mut(addr, src.len())?.copy_from_slice(src);
        self.record_write(addr, src.len());
        Ok(())
    }

    pub fn record_read(&mut self, addr: u64, len: usize) {
        let bytes = len as u64 * ELEMENT_BYTES;
        trace!("read {} bytes at {:#x}", bytes, addr);
        self.stats.bytes_read += bytes;
        self.stats.read_bursts += bursts(addr, bytes);
    }

    pub fn record_write(&mut self, addr: u64, len: usize) {
        let bytes = len as u64 * ELEMENT_BYTES;
        trace!("write {} bytes at {:#x}", bytes, addr);
        self.stats.bytes_written += bytes;
        self.stats.write_bursts += bursts(addr, bytes);
    }

    pub fn read_beat(&self, addr: u64) -> Result<u64, AccelError> {
        let words = self.slice(addr, BEAT_ELEMENTS)?;
        Ok(pack_4x16([words[0], words[1], words[2], words[3]]))
    }

    pub fn write_beat(&mut self, addr: u64, beat: u64) -> Result<(), AccelError> {
        self.slice_mut(addr, BEAT_ELEMENTS)?
            .copy_from_slice(&unpack_4x16(beat));
        Ok(())
    }

    /// host transfer into device memory, whole beats first then the remaining elements
    pub fn upload(&mut self, addr: u64, src: &[Data]) -> Result<(), AccelError> {
        self.slice(addr, src.len())?;
        let mut chunks = src.chunks_exact(BEAT_ELEMENTS);
        let mut cursor = addr;
        for chunk in &mut chunks {
            self.write_beat(cursor, pack_4x16([chunk[0], chunk[1], chunk[2], chunk[3]]))?;
            cursor += BEAT_ELEMENTS as u64 * ELEMENT_BYTES;
        }
        let rest = chunks.remainder();
        self.slice_mut(cursor, rest.len())?.copy_from_slice(rest);
        Ok(())
    }

    /// host transfer out of device memory
    pub fn download(&self, addr: u64, len: usize) -> Result<Vec<Data>, AccelError> {
        let mut out = Vec::with_capacity(len);
        let whole = len / BEAT_ELEMENTS * BEAT_ELEMENTS;
        let mut cursor = addr;
        for _ in 0..len / BEAT_ELEMENTS {
            out.extend_from_slice(&unpack_4x16(self.read_beat(cursor)?));
            cursor += BEAT_ELEMENTS as u64 * ELEMENT_BYTES;
        }
        out.extend_from_slice(self.slice(cursor, len - whole)?);
        Ok(out)
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MemoryStats::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn words(raw: &[i32]) -> Vec<Data> {
        raw.iter().map(|&r| Data::from_raw(r)).collect()
    }

    #[test]
    fn test_beat_layout() {
        let beat = pack_4x16([
            Data::from_raw(1),
            Data::from_raw(-1),
            Data::from_raw(0x1234),
            Data::from_raw(i16::MIN as i32),
        ]);
        assert_eq!(beat, 0x8000_1234_ffff_0001);
        let back = unpack_4x16(beat);
        assert_eq!(back[1].raw(), -1);
        assert_eq!(back[3], Data::MIN);
    }

    #[test]
    fn test_upload_download() -> Result<(), AccelError> {
        let mut mem = DeviceMemory::new();
        mem.map_region(0x1000, 64)?;
        let src = words(&[1, 2, 3, 4, 5, 6, -7]);
        mem.upload(0x1002, &src)?;
        assert_eq!(mem.download(0x1002, 7)?, src);
        assert_eq!(mem.read_beat(0x1000)?, pack_4x16([Data::ZERO, src[0], src[1], src[2]]));
        // host transfers are not device traffic
        assert_eq!(mem.stats(), MemoryStats::default());
        Ok(())
    }

    #[test]
    fn test_faults() -> Result<(), AccelError> {
        let mut mem = DeviceMemory::new();
        mem.map_region(0x100, 16)?;
        let mut dst = [Data::ZERO; 4];
        assert_eq!(
            mem.read(0x10c, &mut dst),
            Err(AccelError::MemoryFault {
                addr: 0x10c,
                len: 8
            })
        );
        assert!(mem.read(0x101, &mut dst[..1]).is_err());
        assert!(mem.write(0x0, &dst).is_err());
        mem.read(0x108, &mut dst)?;
        Ok(())
    }

    #[test]
    fn test_top_of_address_space() -> Result<(), AccelError> {
        let mut mem = DeviceMemory::new();
        assert_eq!(
            mem.map_region(u64::MAX - 15, 16),
            Err(ConfigError::AddressOverflow(u64::MAX - 15))
        );
        mem.map_region(u64::MAX - 17, 16)?;
        let mut dst = [Data::ZERO; 4];
        assert_eq!(
            mem.read(u64::MAX - 3, &mut dst),
            Err(AccelError::MemoryFault {
                addr: u64::MAX - 3,
                len: 8
            })
        );
        mem.read(u64::MAX - 9, &mut dst)?;
        Ok(())
    }

    #[test]
    fn test_overlapping_regions() {
        let mut mem = DeviceMemory::new();
        assert_eq!(mem.map_region(0x1000, 0x100), Ok(()));
        assert_eq!(mem.map_region(0x1100, 0x100), Ok(()));
        assert!(matches!(
            mem.map_region(0x10fe, 4),
            Err(ConfigError::RegionOverlap { .. })
        ));
        assert_eq!(mem.map_region(0x2001, 4), Err(ConfigError::Misaligned(0x2001)));
        assert_eq!(mem.regions().count(), 2);
    }

    #[test]
    fn test_traffic_counters() -> Result<(), AccelError> {
        let mut mem = DeviceMemory::new();
        mem.map_region(0, 256)?;
        mem.write(60, &words(&[1, 2, 3, 4]))?;
        let mut dst = [Data::ZERO; 32];
        mem.read(0, &mut dst)?;
        let stats = mem.stats();
        assert_eq!(stats.bytes_written, 8);
        assert_eq!(stats.write_bursts, 2);
        assert_eq!(stats.bytes_read, 64);
        assert_eq!(stats.read_bursts, 1);
        mem.reset_stats();
        assert_eq!(mem.stats(), MemoryStats::default());
        Ok(())
    }
}
