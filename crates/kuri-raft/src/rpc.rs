//! Wire codec for Raft RPC messages.
//!
//! Every message starts with a u32 tag, followed by fixed little-endian
//! fields; bools are single bytes. AppendEntries carries its entries inline
//! after the fixed header as `term ++ kind ++ cmd_len ++ cmd` sequences —
//! entry indexes are implied by `prev_log_index` and position, so they never
//! travel on the wire.
//!
//! Decoding bounds-checks every length before reading and never panics on
//! arbitrary input; truncated or unknown frames fail with
//! [`RaftError::InvalidMessage`].

use crate::error::{RaftError, Result};
use crate::types::{Entry, EntryKind, LogIndex, NodeId, Term};
use bytes::{BufMut, Bytes, BytesMut};

const TAG_REQUEST_VOTE: u32 = 1;
const TAG_REQUEST_VOTE_RESPONSE: u32 = 2;
const TAG_APPEND_ENTRIES: u32 = 3;
const TAG_APPEND_ENTRIES_RESPONSE: u32 = 4;
const TAG_INSTALL_SNAPSHOT: u32 = 5;
const TAG_INSTALL_SNAPSHOT_RESPONSE: u32 = 6;
const TAG_PRE_VOTE: u32 = 7;
const TAG_PRE_VOTE_RESPONSE: u32 = 8;
const TAG_TIMEOUT_NOW: u32 = 9;

/// RequestVote: candidate canvassing for a real election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// AppendEntries: replication and heartbeats (empty `entries`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub leader_commit: LogIndex,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// Highest index known replicated on the responder; doubles as the
    /// consistency-check hint on rejection.
    pub match_index: LogIndex,
}

/// InstallSnapshot: ships the whole state when the log prefix is gone.
///
/// The chunked form (`offset`, `done`) is decoded for compatibility; this
/// implementation always sends a single `done = true` chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshot {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_index: LogIndex,
    pub last_term: Term,
    pub offset: u64,
    pub done: bool,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshotResponse {
    pub term: Term,
    pub success: bool,
}

/// PreVote: a dry-run RequestVote with `term + 1` that never mutates the
/// receiver's term or vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// TimeoutNow: leader's hint to a transfer target to elect itself at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutNow {
    pub term: Term,
    pub leader_id: NodeId,
}

/// Any Raft RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestVote(RequestVote),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshot),
    InstallSnapshotResponse(InstallSnapshotResponse),
    PreVote(PreVote),
    PreVoteResponse(PreVoteResponse),
    TimeoutNow(TimeoutNow),
}

impl Message {
    /// Encode to a wire frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            Message::RequestVote(m) => {
                buf.put_u32_le(TAG_REQUEST_VOTE);
                put_vote_request(&mut buf, m.term, m.candidate_id, m.last_log_index, m.last_log_term);
            }
            Message::RequestVoteResponse(m) => {
                buf.put_u32_le(TAG_REQUEST_VOTE_RESPONSE);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u8(m.vote_granted as u8);
            }
            Message::AppendEntries(m) => {
                buf.reserve(
                    40 + m
                        .entries
                        .iter()
                        .map(|e| 13 + e.payload.len())
                        .sum::<usize>(),
                );
                buf.put_u32_le(TAG_APPEND_ENTRIES);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u32_le(m.leader_id.as_u32());
                buf.put_u64_le(m.prev_log_index.as_u64());
                buf.put_u64_le(m.prev_log_term.as_u64());
                buf.put_u64_le(m.leader_commit.as_u64());
                buf.put_u32_le(m.entries.len() as u32);
                for entry in &m.entries {
                    buf.put_u64_le(entry.term.as_u64());
                    buf.put_u8(entry.kind.wire_tag());
                    buf.put_u32_le(entry.payload.len() as u32);
                    buf.put_slice(&entry.payload);
                }
            }
            Message::AppendEntriesResponse(m) => {
                buf.put_u32_le(TAG_APPEND_ENTRIES_RESPONSE);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u8(m.success as u8);
                buf.put_u64_le(m.match_index.as_u64());
            }
            Message::InstallSnapshot(m) => {
                buf.reserve(45 + m.data.len());
                buf.put_u32_le(TAG_INSTALL_SNAPSHOT);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u32_le(m.leader_id.as_u32());
                buf.put_u64_le(m.last_index.as_u64());
                buf.put_u64_le(m.last_term.as_u64());
                buf.put_u64_le(m.offset);
                buf.put_u32_le(m.data.len() as u32);
                buf.put_u8(m.done as u8);
                buf.put_slice(&m.data);
            }
            Message::InstallSnapshotResponse(m) => {
                buf.put_u32_le(TAG_INSTALL_SNAPSHOT_RESPONSE);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u8(m.success as u8);
            }
            Message::PreVote(m) => {
                buf.put_u32_le(TAG_PRE_VOTE);
                put_vote_request(&mut buf, m.term, m.candidate_id, m.last_log_index, m.last_log_term);
            }
            Message::PreVoteResponse(m) => {
                buf.put_u32_le(TAG_PRE_VOTE_RESPONSE);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u8(m.vote_granted as u8);
            }
            Message::TimeoutNow(m) => {
                buf.put_u32_le(TAG_TIMEOUT_NOW);
                buf.put_u64_le(m.term.as_u64());
                buf.put_u32_le(m.leader_id.as_u32());
            }
        }
        buf.freeze()
    }

    /// Decode a wire frame.
    pub fn decode(data: &[u8]) -> Result<Message> {
        let mut cur = Cursor::new(data);
        let tag = cur.u32()?;
        let msg = match tag {
            TAG_REQUEST_VOTE => {
                let (term, candidate_id, last_log_index, last_log_term) = get_vote_request(&mut cur)?;
                Message::RequestVote(RequestVote {
                    term,
                    candidate_id,
                    last_log_index,
                    last_log_term,
                })
            }
            TAG_REQUEST_VOTE_RESPONSE => Message::RequestVoteResponse(RequestVoteResponse {
                term: Term(cur.u64()?),
                vote_granted: cur.bool()?,
            }),
            TAG_APPEND_ENTRIES => {
                let term = Term(cur.u64()?);
                let leader_id = NodeId(cur.u32()?);
                let prev_log_index = LogIndex(cur.u64()?);
                let prev_log_term = Term(cur.u64()?);
                let leader_commit = LogIndex(cur.u64()?);
                let count = cur.u32()? as usize;

                let mut entries = Vec::with_capacity(count.min(1024));
                for i in 0..count {
                    let entry_term = Term(cur.u64()?);
                    let kind = EntryKind::from_wire_tag(cur.u8()?)
                        .ok_or(RaftError::InvalidMessage {
                            reason: "unknown entry kind",
                        })?;
                    let cmd_len = cur.u32()? as usize;
                    let payload = cur.bytes(cmd_len)?;
                    entries.push(Entry::new(
                        entry_term,
                        LogIndex(prev_log_index.as_u64() + 1 + i as u64),
                        kind,
                        payload,
                    ));
                }

                Message::AppendEntries(AppendEntries {
                    term,
                    leader_id,
                    prev_log_index,
                    prev_log_term,
                    leader_commit,
                    entries,
                })
            }
            TAG_APPEND_ENTRIES_RESPONSE => Message::AppendEntriesResponse(AppendEntriesResponse {
                term: Term(cur.u64()?),
                success: cur.bool()?,
                match_index: LogIndex(cur.u64()?),
            }),
            TAG_INSTALL_SNAPSHOT => {
                let term = Term(cur.u64()?);
                let leader_id = NodeId(cur.u32()?);
                let last_index = LogIndex(cur.u64()?);
                let last_term = Term(cur.u64()?);
                let offset = cur.u64()?;
                let data_len = cur.u32()? as usize;
                let done = cur.bool()?;
                let data = cur.bytes(data_len)?;
                Message::InstallSnapshot(InstallSnapshot {
                    term,
                    leader_id,
                    last_index,
                    last_term,
                    offset,
                    done,
                    data,
                })
            }
            TAG_INSTALL_SNAPSHOT_RESPONSE => {
                Message::InstallSnapshotResponse(InstallSnapshotResponse {
                    term: Term(cur.u64()?),
                    success: cur.bool()?,
                })
            }
            TAG_PRE_VOTE => {
                let (term, candidate_id, last_log_index, last_log_term) = get_vote_request(&mut cur)?;
                Message::PreVote(PreVote {
                    term,
                    candidate_id,
                    last_log_index,
                    last_log_term,
                })
            }
            TAG_PRE_VOTE_RESPONSE => Message::PreVoteResponse(PreVoteResponse {
                term: Term(cur.u64()?),
                vote_granted: cur.bool()?,
            }),
            TAG_TIMEOUT_NOW => Message::TimeoutNow(TimeoutNow {
                term: Term(cur.u64()?),
                leader_id: NodeId(cur.u32()?),
            }),
            _ => {
                return Err(RaftError::InvalidMessage {
                    reason: "unknown message tag",
                })
            }
        };
        Ok(msg)
    }
}

fn put_vote_request(buf: &mut BytesMut, term: Term, candidate: NodeId, index: LogIndex, last_term: Term) {
    buf.put_u64_le(term.as_u64());
    buf.put_u32_le(candidate.as_u32());
    buf.put_u64_le(index.as_u64());
    buf.put_u64_le(last_term.as_u64());
}

fn get_vote_request(cur: &mut Cursor<'_>) -> Result<(Term, NodeId, LogIndex, Term)> {
    Ok((
        Term(cur.u64()?),
        NodeId(cur.u32()?),
        LogIndex(cur.u64()?),
        Term(cur.u64()?),
    ))
}

/// Bounds-checked little-endian reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(RaftError::InvalidMessage {
                reason: "message truncated",
            });
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn bytes(&mut self, n: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.take(n)?))
    }
}
