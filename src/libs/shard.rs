//! Per-shard storage and the byte-level formats moved through the backend.
//!
//! A shard holds a flat packed neighbor table plus a parallel coordinate
//! table, both written once at index-build time and read-only during search.

use anyhow::{anyhow, Result};

/// Result-list capacity per shard; the terminal slot holds the sentinel.
pub const MAX_ALIGN: usize = 1024;

/// Fixed part of a request record: read_id (i64) + offset (u32) + count (u32).
pub const REQUEST_HEADER_BYTES: usize = 16;

/// One result record: read_id (i64) + seq_id (u32) + offset (u64) + score (i32).
pub const RESULT_RECORD_BYTES: usize = 24;

const COORD_BYTES: usize = 12;

/// Width of one request record for a given packed neighbor width.
pub fn request_record_bytes(nbr_bytes: usize) -> usize {
    REQUEST_HEADER_BYTES + nbr_bytes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub seq_id: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentResult {
    pub read_id: i64,
    pub coord: Coordinate,
    pub score: i32,
}

pub struct ShardNeighborTable {
    nbr_bytes: usize,
    neighbors: Vec<u8>,
    coords: Vec<Coordinate>,
}

impl ShardNeighborTable {
    pub fn new(nb_slots: usize, nbr_bytes: usize) -> Self {
        ShardNeighborTable {
            nbr_bytes,
            neighbors: vec![0u8; nb_slots * nbr_bytes],
            coords: vec![Coordinate { seq_id: 0, offset: 0 }; nb_slots],
        }
    }

    pub fn nb_slots(&self) -> usize {
        self.coords.len()
    }

    pub fn nbr_bytes(&self) -> usize {
        self.nbr_bytes
    }

    pub fn write_slot(&mut self, slot: usize, nbr: &[u8], coord: Coordinate) {
        assert_eq!(nbr.len(), self.nbr_bytes);
        self.neighbors[slot * self.nbr_bytes..(slot + 1) * self.nbr_bytes].copy_from_slice(nbr);
        self.coords[slot] = coord;
    }

    pub fn nbr(&self, slot: usize) -> &[u8] {
        &self.neighbors[slot * self.nbr_bytes..(slot + 1) * self.nbr_bytes]
    }

    pub fn coord(&self, slot: usize) -> Coordinate {
        self.coords[slot]
    }

    /// Serializes the two tables as backend regions.
    pub fn to_regions(&self) -> (Vec<u8>, Vec<u8>) {
        let mut coords = Vec::with_capacity(self.coords.len() * COORD_BYTES);
        for coord in &self.coords {
            coords.extend_from_slice(&coord.seq_id.to_le_bytes());
            coords.extend_from_slice(&coord.offset.to_le_bytes());
        }
        (self.neighbors.clone(), coords)
    }

    /// Rebuilds a table from its two regions, validating that both describe
    /// the same number of slots.
    pub fn from_regions(neighbors: &[u8], coords: &[u8], nbr_bytes: usize) -> Result<Self> {
        if nbr_bytes == 0 || neighbors.len() % nbr_bytes != 0 {
            return Err(anyhow!(
                "neighbor region of {} bytes is not a multiple of the slot width {}",
                neighbors.len(),
                nbr_bytes
            ));
        }
        if coords.len() % COORD_BYTES != 0 {
            return Err(anyhow!("torn coordinate region of {} bytes", coords.len()));
        }
        let nb_slots = neighbors.len() / nbr_bytes;
        if coords.len() / COORD_BYTES != nb_slots {
            return Err(anyhow!(
                "neighbor region has {} slots but coordinate region has {}",
                nb_slots,
                coords.len() / COORD_BYTES
            ));
        }

        let coords = coords
            .chunks_exact(COORD_BYTES)
            .map(|chunk| Coordinate {
                seq_id: u32::from_le_bytes(chunk[0..4].try_into().unwrap()),
                offset: u64::from_le_bytes(chunk[4..12].try_into().unwrap()),
            })
            .collect();

        Ok(ShardNeighborTable {
            nbr_bytes,
            neighbors: neighbors.to_vec(),
            coords,
        })
    }
}

/// Appends one request record to a packed stream body.
pub fn push_request(stream: &mut Vec<u8>, read_id: i64, offset: u32, count: u32, nbr: &[u8]) {
    stream.extend_from_slice(&read_id.to_le_bytes());
    stream.extend_from_slice(&offset.to_le_bytes());
    stream.extend_from_slice(&count.to_le_bytes());
    stream.extend_from_slice(nbr);
}

/// Encodes a shard's result list, bounded by `MAX_ALIGN` with the final
/// record as the `read_id = -1` sentinel.
pub fn encode_results(results: &[AlignmentResult]) -> Vec<u8> {
    let kept = results.len().min(MAX_ALIGN - 1);
    let mut bytes = Vec::with_capacity((kept + 1) * RESULT_RECORD_BYTES);
    for result in &results[..kept] {
        bytes.extend_from_slice(&result.read_id.to_le_bytes());
        bytes.extend_from_slice(&result.coord.seq_id.to_le_bytes());
        bytes.extend_from_slice(&result.coord.offset.to_le_bytes());
        bytes.extend_from_slice(&result.score.to_le_bytes());
    }
    bytes.extend_from_slice(&(-1i64).to_le_bytes());
    bytes.extend_from_slice(&[0u8; RESULT_RECORD_BYTES - 8]);
    bytes
}

/// Decodes a result region up to its sentinel.
pub fn decode_results(bytes: &[u8]) -> Result<Vec<AlignmentResult>> {
    let mut results = vec![];
    for chunk in bytes.chunks(RESULT_RECORD_BYTES) {
        if chunk.len() < RESULT_RECORD_BYTES {
            return Err(anyhow!("torn result record of {} bytes", chunk.len()));
        }
        let read_id = i64::from_le_bytes(chunk[0..8].try_into().unwrap());
        if read_id == -1 {
            return Ok(results);
        }
        results.push(AlignmentResult {
            read_id,
            coord: Coordinate {
                seq_id: u32::from_le_bytes(chunk[8..12].try_into().unwrap()),
                offset: u64::from_le_bytes(chunk[12..20].try_into().unwrap()),
            },
            score: i32::from_le_bytes(chunk[20..24].try_into().unwrap()),
        });
    }
    Err(anyhow!("result region has no sentinel record"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(seq_id: u32, offset: u64) -> Coordinate {
        Coordinate { seq_id, offset }
    }

    #[test]
    fn table_slots_roundtrip() -> Result<()> {
        let mut table = ShardNeighborTable::new(3, 2);
        table.write_slot(0, &[0xAA, 0x01], coord(0, 7));
        table.write_slot(2, &[0x5B, 0x02], coord(1, 1234));

        let (neighbors, coords) = table.to_regions();
        let back = ShardNeighborTable::from_regions(&neighbors, &coords, 2)?;

        assert_eq!(back.nb_slots(), 3);
        assert_eq!(back.nbr(0), &[0xAA, 0x01]);
        assert_eq!(back.nbr(1), &[0x00, 0x00]);
        assert_eq!(back.coord(2), coord(1, 1234));
        Ok(())
    }

    #[test]
    fn mismatched_regions_are_rejected() {
        assert!(ShardNeighborTable::from_regions(&[0u8; 5], &[0u8; 24], 2).is_err());
        assert!(ShardNeighborTable::from_regions(&[0u8; 4], &[0u8; 24], 2).is_err());
        assert!(ShardNeighborTable::from_regions(&[0u8; 4], &[0u8; 23], 2).is_err());
    }

    #[test]
    fn results_roundtrip_with_sentinel() -> Result<()> {
        let results = vec![
            AlignmentResult { read_id: 3, coord: coord(0, 4), score: 0 },
            AlignmentResult { read_id: 5, coord: coord(2, 99), score: 20 },
        ];
        let bytes = encode_results(&results);
        assert_eq!(bytes.len(), 3 * RESULT_RECORD_BYTES);
        assert_eq!(decode_results(&bytes)?, results);
        Ok(())
    }

    #[test]
    fn results_are_bounded() -> Result<()> {
        let many: Vec<AlignmentResult> = (0..2 * MAX_ALIGN as i64)
            .map(|read_id| AlignmentResult { read_id, coord: coord(0, 0), score: 1 })
            .collect();
        let bytes = encode_results(&many);
        assert_eq!(bytes.len(), MAX_ALIGN * RESULT_RECORD_BYTES);
        assert_eq!(decode_results(&bytes)?.len(), MAX_ALIGN - 1);
        Ok(())
    }

    #[test]
    fn missing_sentinel_is_an_error() {
        let results = vec![AlignmentResult { read_id: 1, coord: coord(0, 0), score: 0 }];
        let mut bytes = encode_results(&results);
        bytes.truncate(RESULT_RECORD_BYTES);
        assert!(decode_results(&bytes).is_err());
    }
}
