// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! Message layer: outgoing datagram queue, confirmable retransmission and duplicate detection.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::net::SocketAddr;

pub const ACK_TIMEOUT_MS: u64 = 2_000;
pub const MAX_RETRANSMIT: u8 = 4;
pub const SEPARATE_RESPONSE_TIMEOUT_MS: u64 = 30_000;
pub const RESPONSE_CACHE_SIZE: usize = 8;
pub const TOKEN_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

/// Datagrams produced by the client, drained by the network task.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Datagram>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, to: SocketAddr, data: Vec<u8>) {
        self.queue.push_back(Datagram { to, data });
    }

    pub fn pop(&mut self) -> Option<Datagram> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Client-initiated exchanges. At most one is outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Bootstrap,
    Register,
    Update,
    Deregister,
}

struct PendingRequest {
    kind: RequestKind,
    peer: SocketAddr,
    message_id: u16,
    token: Vec<u8>,
    data: Vec<u8>,
    retransmissions: u8,
    timeout_ms: u64,
    deadline: u64,
    acknowledged: bool,
}

struct CachedResponse {
    peer: SocketAddr,
    message_id: u16,
    data: Vec<u8>,
}

pub struct Transport {
    message_id: u16,
    token_state: u32,
    pending: Option<PendingRequest>,
    responses: heapless::Deque<CachedResponse, RESPONSE_CACHE_SIZE>,
}

impl Transport {
    pub fn new(seed: u32) -> Self {
        Transport {
            message_id: (seed as u16) ^ ((seed >> 16) as u16),
            // xorshift must not start from zero
            token_state: seed.wrapping_mul(0x9E37_79B9) | 1,
            pending: None,
            responses: heapless::Deque::new(),
        }
    }

    pub fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    pub fn next_token(&mut self) -> Vec<u8> {
        let mut x = self.token_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.token_state = x;
        x.to_be_bytes()[..TOKEN_LENGTH].to_vec()
    }

    /// Sends a confirmable request and tracks it until it is answered or times out.
    /// Replaces any request still outstanding.
    #[allow(clippy::too_many_arguments)]
    pub fn send_request(&mut self, kind: RequestKind, peer: SocketAddr, message_id: u16, token: Vec<u8>, data: Vec<u8>, now: u64, outbox: &mut Outbox) {
        if let Some(previous) = self.pending.take() {
            log::debug!("Abandoning outstanding {:?} request", previous.kind);
        }
        outbox.push(peer, data.clone());
        self.pending = Some(PendingRequest {
            kind,
            peer,
            message_id,
            token,
            data,
            retransmissions: 0,
            timeout_ms: ACK_TIMEOUT_MS,
            deadline: now + ACK_TIMEOUT_MS,
            acknowledged: false,
        });
    }

    pub fn pending_kind(&self) -> Option<RequestKind> {
        self.pending.as_ref().map(|p| p.kind)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Empty ACK: the response follows separately.
    pub fn acknowledge(&mut self, peer: SocketAddr, message_id: u16, now: u64) -> bool {
        match self.pending.as_mut() {
            Some(pending) if pending.peer == peer && pending.message_id == message_id && !pending.acknowledged => {
                pending.acknowledged = true;
                pending.deadline = now + SEPARATE_RESPONSE_TIMEOUT_MS;
                true
            }
            _ => false,
        }
    }

    /// Matches a response by token and ends the exchange.
    pub fn complete(&mut self, peer: SocketAddr, token: &[u8]) -> Option<RequestKind> {
        match self.pending.as_ref() {
            Some(pending) if pending.peer == peer && pending.token == token => self.pending.take().map(|p| p.kind),
            _ => None,
        }
    }

    /// Reset from the peer: the request was rejected.
    pub fn reject(&mut self, peer: SocketAddr, message_id: u16) -> Option<RequestKind> {
        match self.pending.as_ref() {
            Some(pending) if pending.peer == peer && pending.message_id == message_id => self.pending.take().map(|p| p.kind),
            _ => None,
        }
    }

    /// Retransmits the outstanding request when its timer fires. Returns the request kind once
    /// it has finally timed out.
    pub fn poll(&mut self, now: u64, outbox: &mut Outbox) -> Option<RequestKind> {
        let pending = self.pending.as_mut()?;
        if now < pending.deadline {
            return None;
        }
        if pending.acknowledged || pending.retransmissions >= MAX_RETRANSMIT {
            return self.pending.take().map(|p| p.kind);
        }
        pending.retransmissions += 1;
        pending.timeout_ms *= 2;
        pending.deadline = now + pending.timeout_ms;
        log::debug!("Retransmitting {:?} request ({}/{})", pending.kind, pending.retransmissions, MAX_RETRANSMIT);
        outbox.push(pending.peer, pending.data.clone());
        None
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn cached_response(&self, peer: SocketAddr, message_id: u16) -> Option<&[u8]> {
        self.responses
            .iter()
            .find(|r| r.peer == peer && r.message_id == message_id)
            .map(|r| r.data.as_slice())
    }

    pub fn cache_response(&mut self, peer: SocketAddr, message_id: u16, data: Vec<u8>) {
        if self.responses.is_full() {
            self.responses.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.responses.push_back(CachedResponse { peer, message_id, data });
    }
}
