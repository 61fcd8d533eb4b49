//! Seed index: maps every seed code to a chain of neighbor records and
//! places the records across shards so that expected comparison work, not
//! raw storage, is balanced.
//!
//! The build is two-pass. Placement needs the global occurrence count of
//! every seed code, so a first scan only counts; chains are then split,
//! placed and given offsets; a second scan writes each occurrence's packed
//! neighbor and coordinate into the slot the placement reserved for it.

use std::io::{Read, Write};

use anyhow::{anyhow, Result};

use crate::libs::genome::Genome;
use crate::libs::nt;
use crate::libs::shard::{Coordinate, ShardNeighborTable};

/// Longest run of neighbor occurrences a single record may hold.
pub const MAX_SIZE_IDX_SEED: u32 = 1000;

/// Seed lengths above this make the per-code table unaddressable.
pub const MAX_SEED_LEN: usize = 14;

const SEED_FILE_RECORD_BYTES: usize = 16;

/// One contiguous run of neighbor occurrences of a seed code, all on the
/// same shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedRecord {
    pub nb_nbr: u32,
    pub shard: u32,
    pub offset: u32,
}

pub struct SeedIndex {
    pub seed_len: usize,
    pub nbr_len: usize,
    pub nb_shards: u32,
    /// One chain per seed code, head first. A code absent from the genome
    /// still holds one empty record, so iteration is uniform.
    pub chains: Vec<Vec<SeedRecord>>,
}

fn check_params(seed_len: usize, nbr_len: usize) -> Result<()> {
    if seed_len == 0 || seed_len > MAX_SEED_LEN {
        return Err(anyhow!(
            "seed length {} out of range 1..={}",
            seed_len,
            MAX_SEED_LEN
        ));
    }
    if nbr_len == 0 {
        return Err(anyhow!("neighbor length must be positive"));
    }
    Ok(())
}

impl SeedIndex {
    /// Builds the index: count, split into chains, place on shards, assign
    /// offsets. `max_shard_slots` bounds any one shard's neighbor table.
    pub fn build(
        genome: &Genome,
        seed_len: usize,
        nbr_len: usize,
        nb_shards: u32,
        max_shard_slots: u32,
    ) -> Result<Self> {
        check_params(seed_len, nbr_len)?;
        if nb_shards == 0 {
            return Err(anyhow!("at least one shard is required"));
        }

        let nb_seed = nt::nb_seed(seed_len);
        let window = seed_len + nbr_len;

        log::info!("counting seed occurrences");
        let mut counts = vec![0u32; nb_seed];
        let mut nb_windows = 0u64;
        for seq in 0..genome.nb_seq() {
            let symbols = genome.seq_symbols(seq);
            if symbols.len() < window {
                continue;
            }
            for idx in 0..=(symbols.len() - window) {
                if let Some(code) = nt::seed_code(&symbols[idx..], seed_len) {
                    counts[code as usize] += 1;
                    nb_windows += 1;
                }
            }
        }
        if nb_windows == 0 {
            return Err(anyhow!(
                "every reference sequence is shorter than seed + neighbor ({} symbols)",
                window
            ));
        }
        log::info!("{} seed occurrences counted", nb_windows);

        // Split each code into records of at most MAX_SIZE_IDX_SEED
        // neighbors; the head absorbs the remainder of the even split.
        let mut chains: Vec<Vec<SeedRecord>> = Vec::with_capacity(nb_seed);
        for &count in &counts {
            let nb_records = count / MAX_SIZE_IDX_SEED + 1;
            let per_record = count / nb_records + 1;
            let head = count - (nb_records - 1) * per_record;

            let mut chain = Vec::with_capacity(nb_records as usize);
            chain.push(SeedRecord { nb_nbr: head, shard: 0, offset: 0 });
            for _ in 1..nb_records {
                chain.push(SeedRecord { nb_nbr: per_record, shard: 0, offset: 0 });
            }
            chains.push(chain);
        }

        // Place records on shards, most frequent codes first. Each record
        // goes to the least-loaded shard, scanning from a cursor that keeps
        // rotating so equally-loaded shards are filled round-robin.
        log::info!("distributing records over {} shards", nb_shards);
        let mut order: Vec<u32> = (0..nb_seed as u32).collect();
        order.sort_unstable_by(|a, b| counts[*b as usize].cmp(&counts[*a as usize]));

        let mut workload = vec![0u64; nb_shards as usize];
        let mut cursor = 0usize;
        for &code in &order {
            let count = counts[code as usize] as u64;
            for record in chains[code as usize].iter_mut() {
                let mut chosen = cursor;
                if count != 0 {
                    let mut least = u64::MAX;
                    for _ in 0..nb_shards {
                        if workload[cursor] < least {
                            chosen = cursor;
                            least = workload[cursor];
                        }
                        cursor = (cursor + 1) % nb_shards as usize;
                    }
                }
                workload[chosen] += record.nb_nbr as u64 * count;
                record.shard = chosen as u32;
                cursor = (cursor + 1) % nb_shards as usize;
            }
        }

        // Offsets: running slot counter per shard, in code order.
        let mut next_slot = vec![0u64; nb_shards as usize];
        for chain in chains.iter_mut() {
            for record in chain.iter_mut() {
                let slot = next_slot[record.shard as usize];
                if slot + record.nb_nbr as u64 > max_shard_slots as u64 {
                    return Err(anyhow!(
                        "shard {} exceeds its capacity of {} neighbor slots",
                        record.shard,
                        max_shard_slots
                    ));
                }
                record.offset = slot as u32;
                next_slot[record.shard as usize] += record.nb_nbr as u64;
            }
        }

        let max_load = workload.iter().max().copied().unwrap_or(0);
        let total: u64 = workload.iter().sum();
        log::info!(
            "placement done, max shard workload {} of {} total",
            max_load,
            total
        );
        for (shard, (&load, &slots)) in workload.iter().zip(&next_slot).enumerate() {
            log::debug!("shard {}: workload {}, {} slots", shard, load, slots);
        }

        Ok(SeedIndex {
            seed_len,
            nbr_len,
            nb_shards,
            chains,
        })
    }

    /// Slots needed per shard, from the placed chains.
    pub fn shard_slots(&self) -> Vec<u64> {
        let mut slots = vec![0u64; self.nb_shards as usize];
        for chain in &self.chains {
            for record in chain {
                let end = record.offset as u64 + record.nb_nbr as u64;
                if end > slots[record.shard as usize] {
                    slots[record.shard as usize] = end;
                }
            }
        }
        slots
    }

    /// Second pass: re-scan the genome in original order and write every
    /// occurrence's packed neighbor and coordinate into the shard slot its
    /// record reserved.
    pub fn populate(&self, genome: &Genome) -> Result<Vec<ShardNeighborTable>> {
        let nbr_bytes = nt::nbr_len_in_bytes(self.nbr_len);
        let window = self.seed_len + self.nbr_len;

        let mut stores: Vec<ShardNeighborTable> = self
            .shard_slots()
            .iter()
            .map(|&slots| ShardNeighborTable::new(slots as usize, nbr_bytes))
            .collect();

        log::info!("filling {} shard tables", stores.len());
        let mut filled = vec![0u32; self.chains.len()];
        let mut nbr_buf = vec![0u8; nbr_bytes];
        for seq in 0..genome.nb_seq() {
            let symbols = genome.seq_symbols(seq);
            if symbols.len() < window {
                continue;
            }
            for idx in 0..=(symbols.len() - window) {
                let Some(code) = nt::seed_code(&symbols[idx..], self.seed_len) else {
                    continue;
                };
                let code = code as usize;

                // walk the chain to the record owning this occurrence
                let mut before = 0u32;
                let mut owner = None;
                for record in &self.chains[code] {
                    if filled[code] < before + record.nb_nbr {
                        owner = Some((record, before));
                        break;
                    }
                    before += record.nb_nbr;
                }
                let Some((record, before)) = owner else {
                    return Err(anyhow!(
                        "seed code {} has more occurrences than its chain holds",
                        code
                    ));
                };

                let slot = (record.offset + filled[code] - before) as usize;
                nt::pack_symbols(
                    &symbols[idx + self.seed_len..idx + window],
                    &mut nbr_buf,
                );
                stores[record.shard as usize].write_slot(
                    slot,
                    &nbr_buf,
                    Coordinate { seq_id: seq as u32, offset: idx as u64 },
                );
                filled[code] += 1;
            }
        }

        Ok(stores)
    }

    /// Writes the chains as flat `(seed_code, nb_nbr, shard, offset)`
    /// records, head first.
    pub fn save(&self, outfile: &str) -> Result<()> {
        let mut writer = crate::writer(outfile);
        for (code, chain) in self.chains.iter().enumerate() {
            for record in chain {
                writer.write_all(&(code as u32).to_le_bytes())?;
                writer.write_all(&record.nb_nbr.to_le_bytes())?;
                writer.write_all(&record.shard.to_le_bytes())?;
                writer.write_all(&record.offset.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Reloads a seed file. Each record is prepended to its code's chain,
    /// so disk order becomes the reverse of memory order; the shard count
    /// is the highest shard id seen plus one.
    pub fn load(infile: &str, seed_len: usize, nbr_len: usize) -> Result<Self> {
        check_params(seed_len, nbr_len)?;
        let nb_seed = nt::nb_seed(seed_len);

        let mut bytes = vec![];
        crate::reader(infile).read_to_end(&mut bytes)?;
        if bytes.len() % SEED_FILE_RECORD_BYTES != 0 {
            return Err(anyhow!(
                "seed file {} is torn: {} bytes is not a whole number of records",
                infile,
                bytes.len()
            ));
        }

        let mut chains: Vec<Vec<SeedRecord>> = vec![vec![]; nb_seed];
        let mut max_shard = 0u32;
        for chunk in bytes.chunks_exact(SEED_FILE_RECORD_BYTES) {
            let code = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            if code as usize >= nb_seed {
                return Err(anyhow!(
                    "seed code {} does not fit a seed length of {}",
                    code,
                    seed_len
                ));
            }
            let record = SeedRecord {
                nb_nbr: u32::from_le_bytes(chunk[4..8].try_into().unwrap()),
                shard: u32::from_le_bytes(chunk[8..12].try_into().unwrap()),
                offset: u32::from_le_bytes(chunk[12..16].try_into().unwrap()),
            };
            max_shard = max_shard.max(record.shard);
            chains[code as usize].push(record);
        }
        for chain in chains.iter_mut() {
            chain.reverse();
        }

        log::info!("loaded seed file {} for {} shards", infile, max_shard + 1);

        Ok(SeedIndex {
            seed_len,
            nbr_len,
            nb_shards: max_shard + 1,
            chains,
        })
    }
}
