extern crate clap;
use clap::*;

mod cmd_srmap;

fn main() -> anyhow::Result<()> {
    let app = Command::new("srmap")
        .version(crate_version!())
        .about("`srmap` - Sharded Read MAPper")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Verbose mode, repeat for more detail"),
        )
        .subcommand(cmd_srmap::index::make_subcommand())
        .subcommand(cmd_srmap::map::make_subcommand())
        .after_help(
            r###"Subcommands:

* index - Build the seed index of a reference and save it
* map   - Map reads against a reference, end to end

The matcher splits a reference genome's seed occurrences across independent
compute shards, streams read requests through each shard's FIFO and scores
candidates with a mismatch-count fast path backed by a banded DP fallback.

"###,
        );

    let matches = app.get_matches();

    let level = match matches.get_count("verbose") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    // Check which subcomamnd the user ran...
    match matches.subcommand() {
        Some(("index", sub_matches)) => cmd_srmap::index::execute(sub_matches),
        Some(("map", sub_matches)) => cmd_srmap::map::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
