use std::collections::VecDeque;
use std::sync::mpsc::channel as mpsc_channel;
use std::sync::mpsc::Receiver as MpscReceiver;
use std::sync::mpsc::Sender as MpscSender;
use std::thread;

use bus::{Bus, BusReader};
use core_affinity::CoreId;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use simple_error::{try_with, SimpleError, SimpleResult};

use crate::util;

pub const MASTER_RANK: usize = 0;

const BROADCAST_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Data,
    Scatter,
    Gather,
}

/// Work handed out by `split_job_from_arrays_to_slaves`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobShare {
    CompletionMask(Vec<bool>),
    Fibers(Vec<usize>),
}

/// Group of cooperating ranks exchanging serialised messages. Collective
/// operations are rooted at `MASTER_RANK` and must be entered by every rank.
pub trait ProcessGroup {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send_bytes(&self, payload: Vec<u8>, dest: usize, tag: Tag) -> SimpleResult<()>;

    fn recv_bytes(&mut self, source: Source, tag: Tag) -> SimpleResult<(Vec<u8>, usize)>;

    fn bcast_bytes(&mut self, payload: Option<Vec<u8>>) -> SimpleResult<Vec<u8>>;

    fn is_alone(&self) -> bool {
        self.size() == 1
    }

    fn is_master(&self) -> bool {
        self.rank() == MASTER_RANK
    }

    fn do_master_only_work(&self) -> bool {
        self.is_alone() || self.is_master()
    }

    fn send<T: Serialize>(&self, data: &T, dest: usize) -> SimpleResult<()> {
        let payload = try_with!(serde_json::to_vec(data), "cannot serialise message");
        self.send_bytes(payload, dest, Tag::Data)
    }

    fn recv<T: DeserializeOwned>(&mut self, source: Source) -> SimpleResult<(T, usize)> {
        let (payload, sender) = self.recv_bytes(source, Tag::Data)?;
        let data = try_with!(serde_json::from_slice(&payload), "cannot deserialise message");
        Ok((data, sender))
    }

    fn bcast<T: Serialize + DeserializeOwned>(&mut self, data: Option<&T>) -> SimpleResult<T> {
        let payload = match (self.is_master(), data) {
            (true, Some(data)) => Some(try_with!(
                serde_json::to_vec(data),
                "cannot serialise broadcast"
            )),
            (true, None) => return Err(SimpleError::new("broadcast root must provide data")),
            (false, _) => None,
        };

        let payload = self.bcast_bytes(payload)?;
        Ok(try_with!(
            serde_json::from_slice(&payload),
            "cannot deserialise broadcast"
        ))
    }

    fn scatter<T: Serialize + DeserializeOwned>(
        &mut self,
        chunks: Option<Vec<T>>,
    ) -> SimpleResult<T> {
        if !self.is_master() {
            let (payload, _) = self.recv_bytes(Source::Rank(MASTER_RANK), Tag::Scatter)?;
            return Ok(try_with!(
                serde_json::from_slice(&payload),
                "cannot deserialise scattered chunk"
            ));
        }

        let chunks = chunks.ok_or_else(|| SimpleError::new("scatter root must provide chunks"))?;
        if chunks.len() != self.size() {
            return Err(SimpleError::new(format!(
                "scatter needs {} chunks, got {}",
                self.size(),
                chunks.len()
            )));
        }

        let mut own_chunk = None;
        for (rank, chunk) in chunks.into_iter().enumerate() {
            if rank == MASTER_RANK {
                own_chunk = Some(chunk);
            } else {
                let payload = try_with!(serde_json::to_vec(&chunk), "cannot serialise chunk");
                self.send_bytes(payload, rank, Tag::Scatter)?;
            }
        }

        own_chunk.ok_or_else(|| SimpleError::new("scatter root chunk missing"))
    }

    /// Collects one item per rank at the master, in rank order.
    fn gather<T: Serialize + DeserializeOwned>(
        &mut self,
        data: T,
    ) -> SimpleResult<Option<Vec<T>>> {
        if !self.is_master() {
            let payload = try_with!(serde_json::to_vec(&data), "cannot serialise gathered item");
            self.send_bytes(payload, MASTER_RANK, Tag::Gather)?;
            return Ok(None);
        }

        let mut gathered = Vec::with_capacity(self.size());
        gathered.push(data);
        for rank in 1..self.size() {
            let (payload, _) = self.recv_bytes(Source::Rank(rank), Tag::Gather)?;
            gathered.push(try_with!(
                serde_json::from_slice(&payload),
                "cannot deserialise gathered item"
            ));
        }

        Ok(Some(gathered))
    }

    /// Brings every rank to the same point before a protocol starts.
    fn send_synchronization_flag(&mut self) -> SimpleResult<bool> {
        let flag = if self.is_master() { Some(&true) } else { None };
        self.bcast(flag)
    }

    /// Contiguous share of `0..num_items` for this rank, split over all ranks.
    fn split_job_from_arrays(&mut self, num_items: usize) -> SimpleResult<Vec<usize>> {
        let chunks = self.is_master().then(|| {
            (0..self.size())
                .map(|rank| util::get_partition_range(self.size(), rank, num_items).collect())
                .collect()
        });
        self.scatter(chunks)
    }

    /// Splits `0..num_items` over the workers only. The master receives an
    /// all-false completion mask covering every item instead.
    fn split_job_from_arrays_to_slaves(&mut self, num_items: usize) -> SimpleResult<JobShare> {
        if self.is_alone() {
            return Ok(JobShare::Fibers((0..num_items).collect()));
        }

        let chunks = self.is_master().then(|| {
            let num_workers = self.size() - 1;
            let mut chunks = vec![JobShare::CompletionMask(vec![false; num_items])];
            chunks.extend((0..num_workers).map(|worker| {
                JobShare::Fibers(
                    util::get_partition_range(num_workers, worker, num_items).collect(),
                )
            }));
            chunks
        });
        self.scatter(chunks)
    }
}

struct Frame {
    source: usize,
    tag: Tag,
    payload: Vec<u8>,
}

/// In-process group: one rank per thread, point-to-point traffic over mpsc
/// channels, broadcasts over a bus owned by the master. A rank holds no
/// sender to itself, so its receiver disconnects once every peer is gone.
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    rx: MpscReceiver<Frame>,
    txs: Vec<Option<MpscSender<Frame>>>,
    pending: VecDeque<Frame>,
    broadcast_tx: Option<Bus<Vec<u8>>>,
    broadcast_rx: Option<BusReader<Vec<u8>>>,
}

impl LocalCommunicator {
    pub fn create_group(size: usize) -> SimpleResult<Vec<LocalCommunicator>> {
        if size == 0 {
            return Err(SimpleError::new("process group needs at least one rank"));
        }

        let (txs, rxs): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc_channel()).unzip();
        let mut broadcast_tx = Bus::new(BROADCAST_CAPACITY);
        let mut broadcast_rxs: Vec<_> = (1..size).map(|_| broadcast_tx.add_rx()).collect();
        let mut broadcast_tx = Some(broadcast_tx);

        let mut group = Vec::with_capacity(size);
        for (rank, rx) in rxs.into_iter().enumerate().rev() {
            let (broadcast_tx, broadcast_rx) = if rank == MASTER_RANK {
                (broadcast_tx.take(), None)
            } else {
                (None, broadcast_rxs.pop())
            };

            group.push(LocalCommunicator {
                rank,
                size,
                rx,
                txs: peer_senders(&txs, rank),
                pending: VecDeque::new(),
                broadcast_tx,
                broadcast_rx,
            });
        }
        group.reverse();

        Ok(group)
    }

    fn take_pending(&mut self, source: Source, tag: Tag) -> Option<Frame> {
        let position = self
            .pending
            .iter()
            .position(|frame| matches_frame(frame, source, tag))?;
        self.pending.remove(position)
    }
}

fn peer_senders(txs: &[MpscSender<Frame>], rank: usize) -> Vec<Option<MpscSender<Frame>>> {
    txs.iter()
        .enumerate()
        .map(|(dest, tx)| (dest != rank).then(|| tx.clone()))
        .collect()
}

fn matches_frame(frame: &Frame, source: Source, tag: Tag) -> bool {
    frame.tag == tag
        && match source {
            Source::Any => true,
            Source::Rank(rank) => frame.source == rank,
        }
}

impl ProcessGroup for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_bytes(&self, payload: Vec<u8>, dest: usize, tag: Tag) -> SimpleResult<()> {
        let tx = match self.txs.get(dest) {
            Some(Some(tx)) => tx,
            Some(None) => {
                return Err(SimpleError::new(format!(
                    "rank {} cannot send to itself",
                    dest
                )))
            }
            None => {
                return Err(SimpleError::new(format!(
                    "invalid destination rank: {}",
                    dest
                )))
            }
        };

        try_with!(
            tx.send(Frame {
                source: self.rank,
                tag,
                payload,
            }),
            "rank {} is no longer reachable",
            dest
        );
        Ok(())
    }

    fn recv_bytes(&mut self, source: Source, tag: Tag) -> SimpleResult<(Vec<u8>, usize)> {
        if let Some(frame) = self.take_pending(source, tag) {
            return Ok((frame.payload, frame.source));
        }

        loop {
            let frame = try_with!(self.rx.recv(), "process group disconnected");
            if matches_frame(&frame, source, tag) {
                return Ok((frame.payload, frame.source));
            }
            self.pending.push_back(frame);
        }
    }

    fn bcast_bytes(&mut self, payload: Option<Vec<u8>>) -> SimpleResult<Vec<u8>> {
        if let Some(broadcast_tx) = self.broadcast_tx.as_mut() {
            let payload =
                payload.ok_or_else(|| SimpleError::new("broadcast root must provide data"))?;
            if self.size > 1 {
                broadcast_tx.broadcast(payload.clone());
            }
            return Ok(payload);
        }

        match self.broadcast_rx.as_mut() {
            Some(broadcast_rx) => Ok(try_with!(broadcast_rx.recv(), "broadcast channel closed")),
            None => Err(SimpleError::new("rank has no broadcast channel")),
        }
    }
}

/// Runs `f` on every rank of a fresh local group, one thread per rank, and
/// returns the results in rank order.
pub fn launch<F, R>(size: usize, pin_threads: bool, f: F) -> SimpleResult<Vec<R>>
where
    F: Fn(LocalCommunicator) -> R + Sync,
    R: Send,
{
    let group = LocalCommunicator::create_group(size)?;
    let f = &f;

    thread::scope(|scope| {
        let join_handles: Vec<_> = group
            .into_iter()
            .map(|communicator| {
                scope.spawn(move || {
                    let rank = communicator.rank();
                    if pin_threads {
                        core_affinity::set_for_current(CoreId { id: rank });
                    }
                    debug!("rank {} started", rank);
                    f(communicator)
                })
            })
            .collect();

        join_handles
            .into_iter()
            .enumerate()
            .map(|(rank, join_handle)| {
                join_handle
                    .join()
                    .map_err(|_| SimpleError::new(format!("rank {} panicked", rank)))
            })
            .collect()
    })
}

pub fn default_group_size() -> usize {
    num_cpus::get()
}
