//! Turns query reads into per-shard packed request streams.
//!
//! A read's seed code selects its record chain; every non-empty record adds
//! one request on that record's shard, addressing the record's slot run in
//! the shard's neighbor table. Reads that are too short or whose seed
//! crosses an ambiguous base are skipped.

use anyhow::{anyhow, Result};

use crate::libs::genome::QueryRead;
use crate::libs::index::SeedIndex;
use crate::libs::nt;
use crate::libs::shard;

/// Builds one request stream per shard, each led by its `u32` request
/// count. Returns the streams and the number of skipped reads.
pub fn build_request_streams(
    index: &SeedIndex,
    reads: &[QueryRead],
    max_requests_per_shard: u32,
) -> Result<(Vec<Vec<u8>>, u64)> {
    let nbr_bytes = nt::nbr_len_in_bytes(index.nbr_len);
    let window = index.seed_len + index.nbr_len;

    let mut streams: Vec<Vec<u8>> = vec![vec![0u8; 4]; index.nb_shards as usize];
    let mut counts = vec![0u32; index.nb_shards as usize];
    let mut skipped = 0u64;
    let mut nbr_buf = vec![0u8; nbr_bytes];

    for (read_id, read) in reads.iter().enumerate() {
        if read.symbols.len() < window {
            log::debug!("read {} shorter than {} symbols, skipped", read.name, window);
            skipped += 1;
            continue;
        }
        let Some(code) = nt::seed_code(&read.symbols, index.seed_len) else {
            log::debug!("read {} has an ambiguous seed, skipped", read.name);
            skipped += 1;
            continue;
        };

        nt::pack_symbols(&read.symbols[index.seed_len..window], &mut nbr_buf);
        for record in &index.chains[code as usize] {
            if record.nb_nbr == 0 {
                continue;
            }
            let shard = record.shard as usize;
            if counts[shard] == max_requests_per_shard {
                return Err(anyhow!(
                    "shard {} exceeds its request capacity of {}",
                    shard,
                    max_requests_per_shard
                ));
            }
            shard::push_request(
                &mut streams[shard],
                read_id as i64,
                record.offset,
                record.nb_nbr,
                &nbr_buf,
            );
            counts[shard] += 1;
        }
    }

    for (stream, &count) in streams.iter_mut().zip(&counts) {
        stream[0..4].copy_from_slice(&count.to_le_bytes());
    }

    Ok((streams, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::genome::Genome;
    use crate::libs::pool::RequestPool;
    use std::io::Cursor;

    fn read(name: &str, seq: &str) -> QueryRead {
        QueryRead {
            name: name.to_string(),
            symbols: seq.bytes().map(nt::code_base).collect(),
        }
    }

    #[test]
    fn requests_follow_the_record_chain() -> Result<()> {
        let genome = Genome::from_seqs(&[("s", "AACCGTAACCGT")]);
        let index = SeedIndex::build(&genome, 4, 4, 2, u32::MAX)?;

        let reads = vec![
            read("hit", "GTAACCGT"),
            read("short", "GTAA"),
            read("unseeded", "TTTTTTTT"),
            read("ambiguous", "GTNACCGT"),
        ];
        let (streams, skipped) = build_request_streams(&index, &reads, u32::MAX)?;
        assert_eq!(skipped, 2, "short and ambiguous reads are skipped");
        assert_eq!(streams.len(), 2);

        let mut total = 0;
        for stream in &streams {
            let pool = RequestPool::new(Cursor::new(stream.clone()), 1)?;
            while let Some(req) = pool.next()? {
                assert_eq!(req.read_id, 0, "only the matching read dispatches");
                assert_eq!(req.count, 1);
                total += 1;
            }
        }
        // GTAA occurs once, TTTT never: one request in the whole batch
        assert_eq!(total, 1);
        Ok(())
    }

    #[test]
    fn request_capacity_is_enforced() -> Result<()> {
        let genome = Genome::from_seqs(&[("s", "AACCGTAACCGT")]);
        let index = SeedIndex::build(&genome, 4, 4, 1, u32::MAX)?;
        let reads: Vec<QueryRead> = (0..3).map(|i| read(&format!("r{}", i), "GTAACCGT")).collect();
        assert!(build_request_streams(&index, &reads, 2).is_err());
        Ok(())
    }
}
