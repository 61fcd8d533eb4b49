use anyhow::{anyhow, Result};

use crate::libs::nt;

/// Reference genome as coded symbols, all sequences packed back to back in
/// one buffer. Read-only once loaded.
pub struct Genome {
    pub names: Vec<String>,
    starts: Vec<u64>,
    lens: Vec<u64>,
    data: Vec<u8>,
}

impl Genome {
    pub fn nb_seq(&self) -> usize {
        self.names.len()
    }

    pub fn seq_len(&self, i: usize) -> usize {
        self.lens[i] as usize
    }

    /// Symbol codes of sequence `i`.
    pub fn seq_symbols(&self, i: usize) -> &[u8] {
        let start = self.starts[i] as usize;
        &self.data[start..start + self.lens[i] as usize]
    }

    /// Loads a FASTA file (plain or gzipped, "stdin" for standard input).
    pub fn from_fasta(infile: &str) -> Result<Self> {
        let reader = crate::reader(infile);
        let mut fa_in = noodles_fasta::io::Reader::new(reader);

        let mut genome = Genome {
            names: vec![],
            starts: vec![],
            lens: vec![],
            data: vec![],
        };

        for result in fa_in.records() {
            let record = result?;
            let name = String::from_utf8(record.name().into())?;
            let seq = record.sequence().get(..).unwrap().to_vec();

            genome.starts.push(genome.data.len() as u64);
            genome.lens.push(seq.len() as u64);
            genome
                .data
                .extend(seq.iter().map(|&base| nt::code_base(base)));
            genome.names.push(name);
        }

        if genome.names.is_empty() {
            return Err(anyhow!("no sequences in {}", infile));
        }

        Ok(genome)
    }

    /// Builds a genome directly from named ASCII sequences.
    pub fn from_seqs(seqs: &[(&str, &str)]) -> Self {
        let mut genome = Genome {
            names: vec![],
            starts: vec![],
            lens: vec![],
            data: vec![],
        };
        for (name, seq) in seqs {
            genome.starts.push(genome.data.len() as u64);
            genome.lens.push(seq.len() as u64);
            genome.data.extend(seq.bytes().map(nt::code_base));
            genome.names.push(name.to_string());
        }
        genome
    }
}

/// One query read, symbols coded but not packed.
pub struct QueryRead {
    pub name: String,
    pub symbols: Vec<u8>,
}

/// Loads query reads from a FASTA file.
pub fn load_reads(infile: &str) -> Result<Vec<QueryRead>> {
    let reader = crate::reader(infile);
    let mut fa_in = noodles_fasta::io::Reader::new(reader);

    let mut reads = vec![];
    for result in fa_in.records() {
        let record = result?;
        let name = String::from_utf8(record.name().into())?;
        let symbols = record
            .sequence()
            .get(..)
            .unwrap()
            .iter()
            .map(|&base| nt::code_base(base))
            .collect();
        reads.push(QueryRead { name, symbols });
    }

    if reads.is_empty() {
        return Err(anyhow!("no reads in {}", infile));
    }

    Ok(reads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn from_seqs_codes_symbols() {
        let genome = Genome::from_seqs(&[("chr1", "ACGT"), ("chr2", "TTNA")]);
        assert_eq!(genome.nb_seq(), 2);
        assert_eq!(
            genome.seq_symbols(0),
            &[nt::NT_A, nt::NT_C, nt::NT_G, nt::NT_T]
        );
        assert_eq!(genome.seq_symbols(1), &[nt::NT_T, nt::NT_T, nt::NT_N, nt::NT_A]);
    }

    #[test]
    fn from_fasta_reads_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ref.fa");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, ">seq1\nAACCGTAACCGT\n>seq2\nacgt")?;

        let genome = Genome::from_fasta(path.to_str().unwrap())?;
        assert_eq!(genome.names, vec!["seq1", "seq2"]);
        assert_eq!(genome.seq_len(0), 12);
        // lower case codes the same as upper case
        assert_eq!(
            genome.seq_symbols(1),
            &[nt::NT_A, nt::NT_C, nt::NT_G, nt::NT_T]
        );
        Ok(())
    }

    #[test]
    fn empty_fasta_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.fa");
        std::fs::File::create(&path)?;
        assert!(Genome::from_fasta(path.to_str().unwrap()).is_err());
        Ok(())
    }
}
