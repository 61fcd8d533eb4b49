use clap::*;

use srmap::libs::genome::Genome;
use srmap::libs::index::SeedIndex;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("index")
        .about("Builds a seed index of a reference genome")
        .after_help(
            r###"
Scans every window of the reference, splits each seed code's neighbor
occurrences into bounded records and places the records across shards so
that expected comparison work is balanced. The resulting seed file holds
one (seed_code, neighbor_count, shard_id, offset) record per chain node
and can be fed to `srmap map --index`.

Examples:
1. Index a reference for 64 shards:
   srmap index ref.fa --shards 64 -o seeds.idx

2. Short seeds for small test genomes:
   srmap index ref.fa --seed-len 4 --nbr-len 4 --shards 2 -o seeds.idx
"###,
        )
        .arg(
            Arg::new("genome")
                .required(true)
                .index(1)
                .help("Reference genome FASTA file"),
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
                .help("Number of compute shards to place records on"),
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
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("seeds.idx")
                .help("Output seed file"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let infile = args.get_one::<String>("genome").unwrap();
    let seed_len = *args.get_one::<usize>("seed-len").unwrap();
    let nbr_len = *args.get_one::<usize>("nbr-len").unwrap();
    let nb_shards = *args.get_one::<u32>("shards").unwrap();
    let max_shard_slots = *args.get_one::<u32>("max-shard-slots").unwrap();
    let outfile = args.get_one::<String>("outfile").unwrap();

    //----------------------------
    // Process
    //----------------------------
    let genome = Genome::from_fasta(infile)?;
    log::info!("{}: {} sequences", infile, genome.nb_seq());

    let index = SeedIndex::build(&genome, seed_len, nbr_len, nb_shards, max_shard_slots)?;
    index.save(outfile)?;
    log::info!("seed file written to {}", outfile);

    Ok(())
}
