use std::io::Write;

use clap::*;
use itertools::Itertools;

use srmap::libs::backend::{collect_results, MemBackend, Region, ShardBackend};
use srmap::libs::dispatch::build_request_streams;
use srmap::libs::genome::{self, Genome};
use srmap::libs::index::SeedIndex;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("map")
        .about("Maps reads against a reference genome")
        .after_help(
            r###"
Runs the full pipeline: build (or load) the seed index, fill every shard's
neighbor table, dispatch the reads into per-shard request streams, run the
shards in parallel and merge their bounded best-match lists.

Output is a TSV stream with one line per reported match:
    read    sequence    position    score

Examples:
1. Map reads with an in-memory index:
   srmap map ref.fa reads.fa --seed-len 12 --nbr-len 100

2. Reuse a saved seed file (same seed/neighbor lengths as at build time):
   srmap map ref.fa reads.fa --index seeds.idx -o mapped.tsv
"###,
        )
        .arg(
            Arg::new("genome")
                .required(true)
                .index(1)
                .help("Reference genome FASTA file"),
        )
        .arg(
            Arg::new("reads")
                .required(true)
                .index(2)
                .help("Query reads FASTA file"),
        )
        .arg(
            Arg::new("index")
                .long("index")
                .num_args(1)
                .help("Seed file written by `srmap index`; built in memory when absent"),
        )
        .arg(
            Arg::new("seed-len")
                .long("seed-len")
                .short('s')
                .num_args(1)
                .default_value("12")
                .value_parser(value_parser!(usize))
                .help("Seed length in symbols"),
        )
        .arg(
            Arg::new("nbr-len")
                .long("nbr-len")
                .short('n')
                .num_args(1)
                .default_value("100")
                .value_parser(value_parser!(usize))
                .help("Neighbor length in symbols"),
        )
        .arg(
            Arg::new("shards")
                .long("shards")
                .num_args(1)
                .default_value("4")
                .value_parser(value_parser!(u32))
                .help("Number of compute shards (ignored with --index)"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .num_args(1)
                .default_value("16")
                .value_parser(value_parser!(usize))
                .help("Worker threads per shard"),
        )
        .arg(
            Arg::new("max-shard-slots")
                .long("max-shard-slots")
                .num_args(1)
                .default_value("67108864")
                .value_parser(value_parser!(u32))
                .help("Capacity of one shard's neighbor table, in slots"),
        )
        .arg(
            Arg::new("max-requests")
                .long("max-requests")
                .num_args(1)
                .default_value("1048576")
                .value_parser(value_parser!(u32))
                .help("Request capacity of one shard"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let ref_file = args.get_one::<String>("genome").unwrap();
    let reads_file = args.get_one::<String>("reads").unwrap();
    let seed_len = *args.get_one::<usize>("seed-len").unwrap();
    let nbr_len = *args.get_one::<usize>("nbr-len").unwrap();
    let nb_shards = *args.get_one::<u32>("shards").unwrap();
    let workers = *args.get_one::<usize>("workers").unwrap();
    let max_shard_slots = *args.get_one::<u32>("max-shard-slots").unwrap();
    let max_requests = *args.get_one::<u32>("max-requests").unwrap();
    let mut writer = srmap::writer(args.get_one::<String>("outfile").unwrap());

    //----------------------------
    // Index
    //----------------------------
    let genome = Genome::from_fasta(ref_file)?;
    let index = match args.get_one::<String>("index") {
        Some(seed_file) => SeedIndex::load(seed_file, seed_len, nbr_len)?,
        None => SeedIndex::build(&genome, seed_len, nbr_len, nb_shards, max_shard_slots)?,
    };
    let stores = index.populate(&genome)?;

    //----------------------------
    // Dispatch
    //----------------------------
    let reads = genome::load_reads(reads_file)?;
    let (streams, skipped) = build_request_streams(&index, &reads, max_requests)?;
    if skipped > 0 {
        log::warn!("{} of {} reads skipped before dispatch", skipped, reads.len());
    }

    //----------------------------
    // Run shards
    //----------------------------
    let mut backend = MemBackend::new(nbr_len, workers)?;
    backend.allocate(index.nb_shards)?;
    for (shard, (store, stream)) in stores.iter().zip(streams).enumerate() {
        let shard = shard as u32;
        backend.load_program(shard)?;
        let (neighbors, coordinates) = store.to_regions();
        backend.write_region(shard, Region::NeighborTable, neighbors)?;
        backend.write_region(shard, Region::Coordinates, coordinates)?;
        backend.write_region(shard, Region::Requests, stream)?;
    }
    backend.run_all()?;

    for shard in 0..backend.nb_shards() {
        for line in backend.read_log(shard)?.lines() {
            log::debug!("shard {}: {}", shard, line);
        }
    }

    //----------------------------
    // Output
    //----------------------------
    let results = collect_results(&backend)?;
    for result in results
        .into_iter()
        .sorted_by_key(|r| (r.read_id, r.coord.seq_id, r.coord.offset))
    {
        writer.write_fmt(format_args!(
            "{}\t{}\t{}\t{}\n",
            reads[result.read_id as usize].name,
            genome.names[result.coord.seq_id as usize],
            result.coord.offset,
            result.score,
        ))?;
    }

    Ok(())
}
