use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

#[test]
fn command_index_writes_seed_file() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let genome = temp.path().join("ref.fa");
    let seeds = temp.path().join("seeds.idx");

    fs::write(&genome, ">ref\nAACCGTAACCGT\n")?;

    let mut cmd = Command::cargo_bin("srmap")?;
    cmd.arg("index")
        .arg(&genome)
        .arg("--seed-len")
        .arg("4")
        .arg("--nbr-len")
        .arg("4")
        .arg("--shards")
        .arg("2")
        .arg("-o")
        .arg(&seeds)
        .assert()
        .success();

    // one 16-byte record for each of the 4^4 seed codes
    let bytes = fs::metadata(&seeds)?.len();
    assert_eq!(bytes, 256 * 16);

    Ok(())
}

#[test]
fn command_index_rejects_tiny_genomes() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let genome = temp.path().join("ref.fa");
    fs::write(&genome, ">ref\nACGT\n")?;

    let mut cmd = Command::cargo_bin("srmap")?;
    cmd.arg("index")
        .arg(&genome)
        .arg("--seed-len")
        .arg("4")
        .arg("--nbr-len")
        .arg("4")
        .arg("-o")
        .arg(temp.path().join("seeds.idx"))
        .assert()
        .failure()
        .stderr(predicates::str::contains("shorter than seed + neighbor"));

    Ok(())
}

#[test]
fn command_map_accepts_a_saved_index() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let genome = temp.path().join("ref.fa");
    let reads = temp.path().join("reads.fa");
    let seeds = temp.path().join("seeds.idx");

    fs::write(&genome, ">ref\nAACCGTAACCGT\n")?;
    fs::write(&reads, ">r0\nGTAACCGT\n")?;

    Command::cargo_bin("srmap")?
        .arg("index")
        .arg(&genome)
        .arg("--seed-len")
        .arg("4")
        .arg("--nbr-len")
        .arg("4")
        .arg("--shards")
        .arg("2")
        .arg("-o")
        .arg(&seeds)
        .assert()
        .success();

    let output = Command::cargo_bin("srmap")?
        .arg("map")
        .arg(&genome)
        .arg(&reads)
        .arg("--index")
        .arg(&seeds)
        .arg("--seed-len")
        .arg("4")
        .arg("--nbr-len")
        .arg("4")
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout, "r0\tref\t4\t0\n");

    Ok(())
}
