//! Two-tier neighbor comparator.
//!
//! `fast_compare` scores substitution-only differences in one pass over the
//! packed bytes and bails out to the caller as soon as the byte pattern
//! looks like an insertion or deletion. `banded_dp` is the fallback: an
//! edit-distance recurrence restricted to a diagonal band, two rolling rows
//! deep. `compare` chains the two.

use std::io::Read;

use anyhow::{anyhow, Result};

use crate::libs::nt;
use crate::libs::pool::RequestPool;
use crate::libs::shard::{AlignmentResult, ShardNeighborTable, MAX_ALIGN};

pub const COST_SUB: i32 = 10;
pub const COST_GAPO: i32 = 11;
pub const COST_GAPE: i32 = 1;

/// Any score above this threshold is not worth reporting.
pub const MAX_SCORE: i32 = 40;

/// Number of diagonals the DP band spans.
pub const NB_DIAG: usize = 15;

/// Out-of-band marker, never selected by `min`.
const PQD_INIT_VAL: i32 = 99;

/// Mismatch cost of a XOR-ed byte: `COST_SUB` per differing 2-bit symbol.
static XOR_COST: [i32; 256] = build_xor_cost();

const fn build_xor_cost() -> [i32; 256] {
    let mut table = [0i32; 256];
    let mut byte = 0usize;
    while byte < 256 {
        let mut sym = 0;
        while sym < 4 {
            if (byte >> (2 * sym)) & 3 != 0 {
                table[byte] += COST_SUB;
            }
            sym += 1;
        }
        byte += 1;
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastScore {
    Score(i32),
    /// The byte pattern suggests an indel; only the DP can score this pair.
    Ambiguous,
}

/// True when `a` from `from` on equals `b` shifted left by `shift` symbols,
/// over a window of at most 16 symbols clamped to the sequence end.
fn shifted_eq(a: &[u8], b: &[u8], from: usize, shift: usize, nbr_len: usize) -> bool {
    if from + shift >= nbr_len {
        return false;
    }
    let win = (16 - shift).min(nbr_len - from - shift);
    for k in 0..win {
        if nt::packed_sym(a, from + k) != nt::packed_sym(b, from + k + shift) {
            return false;
        }
    }
    true
}

/// Substitution-only scorer over packed buffers of `nbr_len` symbols.
///
/// Accumulates the byte cost table; a byte holding more than one mismatch
/// triggers the indel probe: from one symbol past the first difference, test
/// shifted-register equality for 1 to 4 symbol offsets in both directions.
/// Any hit returns `Ambiguous`. Stops early once the sum exceeds
/// `max_score`; the partial sum is a lower bound on the true distance.
pub fn fast_compare(s1: &[u8], s2: &[u8], max_score: i32, nbr_len: usize) -> FastScore {
    let nb_bytes = nt::nbr_len_in_bytes(nbr_len);
    let mut score = 0;
    for i in 0..nb_bytes {
        let cost = XOR_COST[(s1[i] ^ s2[i]) as usize];
        if cost > COST_SUB {
            let mut first = i * 4;
            while nt::packed_sym(s1, first) == nt::packed_sym(s2, first) {
                first += 1;
            }
            for shift in 1..=4 {
                if shifted_eq(s1, s2, first + 1, shift, nbr_len)
                    || shifted_eq(s2, s1, first + 1, shift, nbr_len)
                {
                    return FastScore::Ambiguous;
                }
            }
        }
        score += cost;
        if score > max_score {
            break;
        }
    }
    FastScore::Score(score)
}

/// Banded edit distance between two packed buffers of `nbr_len` symbols.
///
/// Three rolling vectors carry the recurrence: `D` best cost, `P` best cost
/// ending in a gap consuming the reference, `Q` best cost ending in a gap
/// consuming the read. Leading gaps are charged `COST_SUB` per symbol by the
/// boundary rows; trailing gaps are free, the result being the minimum over
/// the last row and the last column inside the band.
///
/// While the band has not reached the last column, a row whose minimum
/// exceeds `max_score` ends the computation; the returned value is then a
/// lower bound on the true distance, not the distance itself.
pub fn banded_dp(s1: &[u8], s2: &[u8], max_score: i32, nbr_len: usize) -> i32 {
    let m = nbr_len + 1;
    let half = NB_DIAG / 2 + 1;

    let mut d_prev = vec![PQD_INIT_VAL; m];
    let mut d_cur = vec![PQD_INIT_VAL; m];
    let mut q_prev = vec![PQD_INIT_VAL; m];
    let mut q_cur = vec![PQD_INIT_VAL; m];
    let mut p_row = vec![PQD_INIT_VAL; m];

    for (j, cell) in d_prev.iter_mut().enumerate().take(m.min(half + 1)) {
        *cell = j as i32 * COST_SUB;
    }

    let mut last_col_best = PQD_INIT_VAL;
    for i in 1..m {
        let jlo = if i + 1 > half { i + 1 - half } else { 1 };
        let jhi = (i + half - 1).min(m - 1);

        // band boundary on the left: either the column-0 ramp or a sentinel
        if jlo == 1 {
            d_cur[0] = i as i32 * COST_SUB;
        } else {
            d_cur[jlo - 1] = PQD_INIT_VAL;
        }
        p_row[jlo - 1] = PQD_INIT_VAL;

        let mut row_min = PQD_INIT_VAL;
        for j in jlo..=jhi {
            let p = (d_cur[j - 1] + COST_GAPO).min(p_row[j - 1] + COST_GAPE);
            let q = (d_prev[j] + COST_GAPO).min(q_prev[j] + COST_GAPE);
            let mut d = d_prev[j - 1];
            if nt::packed_sym(s1, i - 1) != nt::packed_sym(s2, j - 1) {
                d += COST_SUB;
            }
            let d = d.min(p.min(q));
            p_row[j] = p;
            q_cur[j] = q;
            d_cur[j] = d;
            if d < row_min {
                row_min = d;
            }
        }

        // band boundary on the right
        if jhi + 1 < m {
            d_cur[jhi + 1] = PQD_INIT_VAL;
            q_cur[jhi + 1] = PQD_INIT_VAL;
        }

        if jhi == m - 1 {
            if d_cur[m - 1] < last_col_best {
                last_col_best = d_cur[m - 1];
            }
        } else if row_min > max_score {
            return row_min;
        }

        std::mem::swap(&mut d_prev, &mut d_cur);
        std::mem::swap(&mut q_prev, &mut q_cur);
    }

    // last row, banded cells only; d_prev holds it after the final swap
    let mut best = last_col_best;
    let jlo = if m > half { m - half } else { 1 };
    for &cell in &d_prev[jlo..m] {
        if cell < best {
            best = cell;
        }
    }
    best
}

/// Fast path first, full DP only when the fast path flags an indel.
pub fn compare(s1: &[u8], s2: &[u8], max_score: i32, nbr_len: usize) -> i32 {
    match fast_compare(s1, s2, max_score, nbr_len) {
        FastScore::Score(score) => score,
        FastScore::Ambiguous => banded_dp(s1, s2, max_score, nbr_len),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub nb_requests: u64,
    pub nb_compared: u64,
    pub nb_dp_fallbacks: u64,
}

impl EngineStats {
    pub fn merge(&mut self, other: &EngineStats) {
        self.nb_requests += other.nb_requests;
        self.nb_compared += other.nb_compared;
        self.nb_dp_fallbacks += other.nb_dp_fallbacks;
    }
}

/// Drains `pool`, scoring every request's candidate slots against `table`.
///
/// The comparison bound shrinks to the best score seen so far for the
/// request, so worse candidates are rejected earlier and earlier. A strictly
/// better score restarts the request's result list; ties append, bounded by
/// `MAX_ALIGN`. Candidates scoring above `MAX_SCORE` are never reported.
pub fn process_requests<R: Read>(
    table: &ShardNeighborTable,
    pool: &RequestPool<R>,
    nbr_len: usize,
) -> Result<(Vec<AlignmentResult>, EngineStats)> {
    let mut out: Vec<AlignmentResult> = vec![];
    let mut stats = EngineStats::default();

    while let Some(req) = pool.next()? {
        stats.nb_requests += 1;

        let first = req.offset as usize;
        let end = first + req.count as usize;
        if end > table.nb_slots() {
            return Err(anyhow!(
                "request for read {} addresses slots {}..{} of a {}-slot table",
                req.read_id,
                first,
                end,
                table.nb_slots()
            ));
        }

        let mut best = MAX_SCORE;
        let mut kept = 0usize;
        for slot in first..end {
            stats.nb_compared += 1;
            let score = match fast_compare(&req.nbr, table.nbr(slot), best, nbr_len) {
                FastScore::Score(score) => score,
                FastScore::Ambiguous => {
                    stats.nb_dp_fallbacks += 1;
                    banded_dp(&req.nbr, table.nbr(slot), best, nbr_len)
                }
            };
            if score <= best {
                if score < best {
                    best = score;
                    out.truncate(out.len() - kept);
                    kept = 0;
                }
                if out.len() < MAX_ALIGN - 1 {
                    out.push(AlignmentResult {
                        read_id: req.read_id,
                        coord: table.coord(slot),
                        score,
                    });
                    kept += 1;
                }
            }
        }
    }

    Ok((out, stats))
}
