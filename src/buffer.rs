//! Byte buffers shared between the transport and the codecs.
//!
//! Buffers are [`Bytes`] handles: cloning a handle retains the underlying
//! allocation and dropping it releases it, so the last drop frees the memory.
//! The transport owns allocation through a [`BufferAllocator`]; codecs borrow
//! column buffers and must not keep a handle past the call unless the value
//! they return documents it (see [`crate::types::bytea`]).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

/// Source of fresh write buffers.
pub trait BufferAllocator: Send + Sync + fmt::Debug {
    /// Allocate an empty buffer with room for at least `capacity` bytes.
    fn buffer(&self, capacity: usize) -> BytesMut;

    /// Start an empty composite buffer.
    fn composite(&self) -> CompositeBuf {
        CompositeBuf::new()
    }
}

/// Heap allocator backed by `BytesMut::with_capacity`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn buffer(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }
}

pub type SharedAllocator = Arc<dyn BufferAllocator>;

/// A readable buffer made of several [`Bytes`] components.
///
/// Appending a component never copies; reading walks the components in order.
#[derive(Debug, Default, Clone)]
pub struct CompositeBuf {
    parts: VecDeque<Bytes>,
    remaining: usize,
}

impl CompositeBuf {
    pub fn new() -> CompositeBuf {
        CompositeBuf::default()
    }

    /// Append `component`; empty components are dropped immediately.
    pub fn add_component(&mut self, component: Bytes) {
        if component.is_empty() {
            return;
        }
        self.remaining += component.len();
        self.parts.push_back(component);
    }

    pub fn num_components(&self) -> usize {
        self.parts.len()
    }
}

impl Buf for CompositeBuf {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        self.parts.front().map(|b| b.as_ref()).unwrap_or(&[])
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(cnt <= self.remaining, "advance past end of CompositeBuf");
        self.remaining -= cnt;
        while cnt > 0 {
            let Some(front) = self.parts.front_mut() else {
                break;
            };
            if cnt < front.len() {
                front.advance(cnt);
                break;
            }
            cnt -= front.len();
            self.parts.pop_front();
        }
    }
}
