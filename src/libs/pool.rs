//! Shared request FIFO for one shard.
//!
//! Workers pull fixed-size read+neighbor records from a packed stream. The
//! cursor and the scratch cache live behind one mutex, so a fetch-and-advance
//! is atomic: every request reaches exactly one worker, exactly once, in
//! stream order.

use std::io::Read;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::libs::shard;

/// One alignment request, copied out of the pool's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub read_id: i64,
    /// First candidate slot in the shard's neighbor table.
    pub offset: u32,
    /// Number of candidate slots to try.
    pub count: u32,
    /// Packed symbols of the read's neighbor window.
    pub nbr: Vec<u8>,
}

pub struct RequestPool<R: Read> {
    nbr_bytes: usize,
    state: Mutex<PoolState<R>>,
}

struct PoolState<R> {
    reader: R,
    nb_requests: u32,
    next_index: u32,
    cache: Vec<u8>,
}

impl<R: Read> RequestPool<R> {
    /// Consumes the stream header and sizes the scratch cache for exactly
    /// one record.
    pub fn new(mut reader: R, nbr_bytes: usize) -> Result<Self> {
        let mut head = [0u8; 4];
        reader
            .read_exact(&mut head)
            .context("request stream header")?;
        let nb_requests = u32::from_le_bytes(head);

        Ok(RequestPool {
            nbr_bytes,
            state: Mutex::new(PoolState {
                reader,
                nb_requests,
                next_index: 0,
                cache: vec![0u8; shard::request_record_bytes(nbr_bytes)],
            }),
        })
    }

    pub fn nb_requests(&self) -> u32 {
        self.state.lock().unwrap().nb_requests
    }

    /// Fetches the next request, or `None` once the stream is exhausted.
    /// A short read means a torn record; the error is fatal for the shard.
    pub fn next(&self) -> Result<Option<Request>> {
        let mut state = self.state.lock().unwrap();
        if state.next_index == state.nb_requests {
            return Ok(None);
        }

        let PoolState { reader, cache, .. } = &mut *state;
        reader.read_exact(cache).context("torn request record")?;

        let read_id = i64::from_le_bytes(cache[0..8].try_into().unwrap());
        let offset = u32::from_le_bytes(cache[8..12].try_into().unwrap());
        let count = u32::from_le_bytes(cache[12..16].try_into().unwrap());
        let nbr = cache[16..16 + self.nbr_bytes].to_vec();

        state.next_index += 1;

        Ok(Some(Request { read_id, offset, count, nbr }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream_of(nb: u32, nbr_bytes: usize) -> Vec<u8> {
        let mut bytes = nb.to_le_bytes().to_vec();
        for i in 0..nb {
            shard::push_request(
                &mut bytes,
                i as i64,
                i * 10,
                3,
                &vec![i as u8; nbr_bytes],
            );
        }
        bytes
    }

    #[test]
    fn delivers_in_stream_order() -> Result<()> {
        let pool = RequestPool::new(Cursor::new(stream_of(5, 2)), 2)?;
        assert_eq!(pool.nb_requests(), 5);

        for i in 0..5i64 {
            let req = pool.next()?.unwrap();
            assert_eq!(req.read_id, i);
            assert_eq!(req.offset, i as u32 * 10);
            assert_eq!(req.count, 3);
            assert_eq!(req.nbr, vec![i as u8; 2]);
        }
        assert!(pool.next()?.is_none());
        // stays exhausted
        assert!(pool.next()?.is_none());
        Ok(())
    }

    #[test]
    fn concurrent_callers_get_each_request_once() -> Result<()> {
        let nb = 997u32;
        let pool = RequestPool::new(Cursor::new(stream_of(nb, 4)), 4)?;

        let mut seen: Vec<i64> = vec![];
        crossbeam::scope(|s| {
            let (snd, rcv) = crossbeam::channel::unbounded();
            for _ in 0..8 {
                let sendr = snd.clone();
                let pool = &pool;
                s.spawn(move |_| {
                    let mut ids = vec![];
                    while let Some(req) = pool.next().unwrap() {
                        ids.push(req.read_id);
                    }
                    sendr.send(ids).unwrap();
                });
            }
            drop(snd);
            for ids in rcv.iter() {
                seen.extend(ids);
            }
        })
        .unwrap();

        seen.sort_unstable();
        let expected: Vec<i64> = (0..nb as i64).collect();
        assert_eq!(seen, expected, "no loss, no duplication");
        Ok(())
    }

    #[test]
    fn torn_record_is_fatal() -> Result<()> {
        let mut bytes = stream_of(2, 4);
        bytes.truncate(bytes.len() - 1);
        let pool = RequestPool::new(Cursor::new(bytes), 4)?;
        assert!(pool.next()?.is_some());
        assert!(pool.next().is_err());
        Ok(())
    }
}
