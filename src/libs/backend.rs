//! Shard storage backend boundary.
//!
//! The core never boots or polls hardware itself: it hands the driver byte
//! buffers under named region ids and reads regions back. `MemBackend` is
//! the in-process implementation: `run` rebuilds the shard's tables from
//! its regions, drains the request FIFO with a group of scoped worker
//! threads, and leaves the encoded result list in the results region.

use std::fmt::Write;
use std::io::Cursor;

use anyhow::{anyhow, Result};
use rayon::prelude::*;

use crate::libs::align::{self, EngineStats};
use crate::libs::nt;
use crate::libs::pool::RequestPool;
use crate::libs::shard::{self, AlignmentResult, ShardNeighborTable};

/// Memory budget per shard, all regions together.
pub const SHARD_MEM_BYTES: usize = 64 << 20;

/// Fixed upper bound on worker threads per shard.
pub const MAX_WORKERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    NeighborTable,
    Coordinates,
    Requests,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    Idle,
    Running,
    Error,
}

pub trait ShardBackend {
    fn allocate(&mut self, nb_shards: u32) -> Result<()>;
    fn nb_shards(&self) -> u32;
    fn load_program(&mut self, shard: u32) -> Result<()>;
    fn write_region(&mut self, shard: u32, region: Region, bytes: Vec<u8>) -> Result<()>;
    fn run(&mut self, shard: u32) -> Result<()>;
    fn poll_status(&self, shard: u32) -> ShardStatus;
    fn read_region(&self, shard: u32, region: Region) -> Result<Vec<u8>>;
    fn read_log(&self, shard: u32) -> Result<String>;

    /// Runs every allocated shard to completion.
    fn run_all(&mut self) -> Result<()> {
        for shard in 0..self.nb_shards() {
            self.run(shard)?;
        }
        Ok(())
    }
}

/// Reads every shard's result region back and merges the lists. Worker
/// completion order within a shard is arbitrary, so no order is assumed
/// here beyond what the records themselves carry.
pub fn collect_results(backend: &dyn ShardBackend) -> Result<Vec<AlignmentResult>> {
    let mut all = vec![];
    for shard in 0..backend.nb_shards() {
        match backend.poll_status(shard) {
            ShardStatus::Idle => {}
            ShardStatus::Running => return Err(anyhow!("shard {} still running", shard)),
            ShardStatus::Error => {
                return Err(anyhow!(
                    "shard {} failed:\n{}",
                    shard,
                    backend.read_log(shard)?
                ))
            }
        }
        all.extend(shard::decode_results(
            &backend.read_region(shard, Region::Results)?,
        )?);
    }
    Ok(all)
}

struct ShardUnit {
    neighbors: Vec<u8>,
    coordinates: Vec<u8>,
    requests: Vec<u8>,
    results: Vec<u8>,
    status: ShardStatus,
    log: String,
    programmed: bool,
}

impl ShardUnit {
    fn new() -> Self {
        ShardUnit {
            neighbors: vec![],
            coordinates: vec![],
            requests: vec![],
            results: vec![],
            status: ShardStatus::Idle,
            log: String::new(),
            programmed: false,
        }
    }

    fn region_mut(&mut self, region: Region) -> &mut Vec<u8> {
        match region {
            Region::NeighborTable => &mut self.neighbors,
            Region::Coordinates => &mut self.coordinates,
            Region::Requests => &mut self.requests,
            Region::Results => &mut self.results,
        }
    }

    fn region(&self, region: Region) -> &Vec<u8> {
        match region {
            Region::NeighborTable => &self.neighbors,
            Region::Coordinates => &self.coordinates,
            Region::Requests => &self.requests,
            Region::Results => &self.results,
        }
    }

    fn mem_bytes(&self) -> usize {
        self.neighbors.len() + self.coordinates.len() + self.requests.len() + self.results.len()
    }
}

/// In-process backend: every shard is a plain memory image and `run`
/// executes the alignment engine over it.
pub struct MemBackend {
    nbr_len: usize,
    workers: usize,
    units: Vec<ShardUnit>,
}

impl MemBackend {
    pub fn new(nbr_len: usize, workers: usize) -> Result<Self> {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(anyhow!("worker count {} out of range 1..={}", workers, MAX_WORKERS));
        }
        Ok(MemBackend {
            nbr_len,
            workers,
            units: vec![],
        })
    }

    fn unit(&self, shard: u32) -> Result<&ShardUnit> {
        self.units
            .get(shard as usize)
            .ok_or_else(|| anyhow!("shard {} not allocated", shard))
    }

    fn unit_mut(&mut self, shard: u32) -> Result<&mut ShardUnit> {
        self.units
            .get_mut(shard as usize)
            .ok_or_else(|| anyhow!("shard {} not allocated", shard))
    }
}

/// One shard's full run: decode regions, drain the pool with scoped
/// workers, merge and encode results, write the shard log.
fn run_unit(unit: &mut ShardUnit, nbr_len: usize, workers: usize) -> Result<()> {
    if !unit.programmed {
        unit.status = ShardStatus::Error;
        return Err(anyhow!("shard run before load_program"));
    }
    unit.status = ShardStatus::Running;

    let outcome = (|| -> Result<(Vec<AlignmentResult>, EngineStats)> {
        let nbr_bytes = nt::nbr_len_in_bytes(nbr_len);
        let table =
            ShardNeighborTable::from_regions(&unit.neighbors, &unit.coordinates, nbr_bytes)?;
        let pool = RequestPool::new(Cursor::new(unit.requests.as_slice()), nbr_bytes)?;

        let mut merged = vec![];
        let mut stats = EngineStats::default();
        crossbeam::scope(|s| -> Result<()> {
            let (snd, rcv) = crossbeam::channel::bounded(workers);
            for _ in 0..workers {
                let sendr = snd.clone();
                let table = &table;
                let pool = &pool;
                s.spawn(move |_| {
                    sendr
                        .send(align::process_requests(table, pool, nbr_len))
                        .unwrap();
                });
            }
            drop(snd);
            for worker_outcome in rcv.iter() {
                let (results, worker_stats) = worker_outcome?;
                merged.extend(results);
                stats.merge(&worker_stats);
            }
            Ok(())
        })
        .unwrap()?;

        Ok((merged, stats))
    })();

    match outcome {
        Ok((results, stats)) => {
            writeln!(
                unit.log,
                "requests={} compared={} dp_fallbacks={} results={}",
                stats.nb_requests,
                stats.nb_compared,
                stats.nb_dp_fallbacks,
                results.len().min(shard::MAX_ALIGN - 1)
            )
            .unwrap();
            unit.results = shard::encode_results(&results);
            unit.status = ShardStatus::Idle;
            Ok(())
        }
        Err(err) => {
            writeln!(unit.log, "run failed: {:#}", err).unwrap();
            unit.status = ShardStatus::Error;
            Err(err)
        }
    }
}

impl ShardBackend for MemBackend {
    fn allocate(&mut self, nb_shards: u32) -> Result<()> {
        if nb_shards == 0 {
            return Err(anyhow!("cannot allocate zero shards"));
        }
        self.units = (0..nb_shards).map(|_| ShardUnit::new()).collect();
        Ok(())
    }

    fn nb_shards(&self) -> u32 {
        self.units.len() as u32
    }

    fn load_program(&mut self, shard: u32) -> Result<()> {
        self.unit_mut(shard)?.programmed = true;
        Ok(())
    }

    fn write_region(&mut self, shard: u32, region: Region, bytes: Vec<u8>) -> Result<()> {
        let unit = self.unit_mut(shard)?;
        let occupied = unit.mem_bytes() - unit.region(region).len();
        if occupied + bytes.len() > SHARD_MEM_BYTES {
            return Err(anyhow!(
                "shard {} memory budget of {} bytes exceeded",
                shard,
                SHARD_MEM_BYTES
            ));
        }
        *unit.region_mut(region) = bytes;
        Ok(())
    }

    fn run(&mut self, shard: u32) -> Result<()> {
        let nbr_len = self.nbr_len;
        let workers = self.workers;
        run_unit(self.unit_mut(shard)?, nbr_len, workers)
    }

    fn poll_status(&self, shard: u32) -> ShardStatus {
        match self.unit(shard) {
            Ok(unit) => unit.status,
            Err(_) => ShardStatus::Error,
        }
    }

    fn read_region(&self, shard: u32, region: Region) -> Result<Vec<u8>> {
        Ok(self.unit(shard)?.region(region).clone())
    }

    fn read_log(&self, shard: u32) -> Result<String> {
        Ok(self.unit(shard)?.log.clone())
    }

    /// Shards are independent, so they run fully in parallel; the worker
    /// group inside each shard stays scoped to that shard.
    fn run_all(&mut self) -> Result<()> {
        let nbr_len = self.nbr_len;
        let workers = self.workers;
        self.units
            .par_iter_mut()
            .try_for_each(|unit| run_unit(unit, nbr_len, workers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::dispatch::build_request_streams;
    use crate::libs::genome::{Genome, QueryRead};
    use crate::libs::index::SeedIndex;

    fn mapped_backend(reads: &[QueryRead], nb_shards: u32) -> Result<MemBackend> {
        let genome = Genome::from_seqs(&[("s", "AACCGTAACCGT")]);
        let index = SeedIndex::build(&genome, 4, 4, nb_shards, u32::MAX)?;
        let stores = index.populate(&genome)?;
        let (streams, _) = build_request_streams(&index, reads, u32::MAX)?;

        let mut backend = MemBackend::new(4, 4)?;
        backend.allocate(index.nb_shards)?;
        for shard in 0..index.nb_shards {
            backend.load_program(shard)?;
            let (neighbors, coordinates) = stores[shard as usize].to_regions();
            backend.write_region(shard, Region::NeighborTable, neighbors)?;
            backend.write_region(shard, Region::Coordinates, coordinates)?;
            backend.write_region(shard, Region::Requests, streams[shard as usize].clone())?;
        }
        backend.run_all()?;
        Ok(backend)
    }

    fn query(name: &str, seq: &str) -> QueryRead {
        QueryRead {
            name: name.to_string(),
            symbols: seq.bytes().map(nt::code_base).collect(),
        }
    }

    #[test]
    fn end_to_end_exact_match() -> Result<()> {
        let backend = mapped_backend(&[query("r0", "GTAACCGT")], 2)?;
        let results = collect_results(&backend)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].read_id, 0);
        assert_eq!(results[0].coord.seq_id, 0);
        assert_eq!(results[0].coord.offset, 4);
        assert_eq!(results[0].score, 0);
        Ok(())
    }

    #[test]
    fn shard_logs_expose_run_stats() -> Result<()> {
        let backend = mapped_backend(&[query("r0", "GTAACCGT")], 2)?;
        let logs: String = (0..backend.nb_shards())
            .map(|shard| backend.read_log(shard).unwrap())
            .collect();
        assert!(logs.contains("requests=1"));
        assert!(logs.contains("results=1"));
        Ok(())
    }

    #[test]
    fn run_requires_a_program() -> Result<()> {
        let mut backend = MemBackend::new(4, 2)?;
        backend.allocate(1)?;
        assert!(backend.run(0).is_err());
        assert_eq!(backend.poll_status(0), ShardStatus::Error);
        Ok(())
    }

    #[test]
    fn unallocated_shard_is_an_error() -> Result<()> {
        let mut backend = MemBackend::new(4, 2)?;
        backend.allocate(1)?;
        assert!(backend.write_region(3, Region::Requests, vec![]).is_err());
        assert!(backend.read_region(3, Region::Results).is_err());
        Ok(())
    }

    #[test]
    fn memory_budget_is_enforced() -> Result<()> {
        let mut backend = MemBackend::new(4, 2)?;
        backend.allocate(1)?;
        assert!(backend
            .write_region(0, Region::Requests, vec![0u8; SHARD_MEM_BYTES + 1])
            .is_err());
        Ok(())
    }

    #[test]
    fn corrupt_regions_fail_the_run() -> Result<()> {
        let mut backend = MemBackend::new(4, 2)?;
        backend.allocate(1)?;
        backend.load_program(0)?;
        backend.write_region(0, Region::NeighborTable, vec![0u8; 3])?;
        backend.write_region(0, Region::Coordinates, vec![0u8; 24])?;
        backend.write_region(0, Region::Requests, 0u32.to_le_bytes().to_vec())?;
        assert!(backend.run(0).is_err());
        assert_eq!(backend.poll_status(0), ShardStatus::Error);
        assert!(backend.read_log(0)?.contains("run failed"));
        Ok(())
    }
}
