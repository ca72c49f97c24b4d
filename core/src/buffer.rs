/*
 * buffer.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portiere, a lightweight HTTP/1.x server.
 *
 * Portiere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portiere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portiere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Pooled byte buffers with retention counts. The connection owns one reference
//! to its input buffer; body chunks split from it carry retained guards, so the
//! storage cannot be recycled while a slice is still in flight.

use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Pool of `BytesMut` storage shared between connections. Release returns the
/// storage here for reuse; the pool never holds more than `max_pooled` buffers.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
    acquired: AtomicUsize,
    recycled: AtomicUsize,
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
            acquired: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        })
    }

    /// Draw a buffer with at least `capacity` writable bytes. Reuses pooled
    /// storage when a large enough buffer is available.
    pub fn acquire(self: &Arc<Self>, capacity: usize) -> PooledBuffer {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock().unwrap();
        let data = match free.iter().position(|b| b.capacity() >= capacity) {
            Some(i) => free.swap_remove(i),
            None => BytesMut::with_capacity(capacity),
        };
        PooledBuffer {
            data,
            epoch: Arc::new(()),
            pool: Arc::clone(self),
        }
    }

    fn recycle(&self, mut data: BytesMut) {
        data.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_pooled {
            self.recycled.fetch_add(1, Ordering::Relaxed);
            free.push(data);
        }
    }

    /// Number of buffers handed out since creation.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Number of buffers whose storage came back for reuse.
    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::Relaxed)
    }
}

/// One pooled buffer. The holder owns exactly one reference; `retain` hands out
/// extra guards for slices split off the underlying storage.
pub struct PooledBuffer {
    data: BytesMut,
    epoch: Arc<()>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Unread bytes currently in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// True while any retained guard handed out by `retain` is still alive.
    pub fn is_retained(&self) -> bool {
        Arc::strong_count(&self.epoch) > 1
    }

    /// Take an extra reference for a slice that outlives the holder's use of
    /// the buffer (a body chunk handed to the application).
    pub fn retain(&self) -> Retained {
        Retained(Arc::clone(&self.epoch))
    }

    pub fn as_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view plus the retention epoch, for callers that split slices off
    /// while writing (the parser bridge).
    pub fn parts(&mut self) -> (&mut BytesMut, &Arc<()>) {
        (&mut self.data, &self.epoch)
    }

    /// Drop the holder's reference. Storage goes back to the pool only when
    /// the buffer is empty and unretained; returns whether it was recycled.
    pub fn release(self) -> bool {
        if self.data.is_empty() && !self.is_retained() {
            self.pool.recycle(self.data);
            true
        } else {
            false
        }
    }
}

/// Guard representing one extra reference to a pooled buffer's storage.
#[derive(Clone)]
pub struct Retained(Arc<()>);

impl Retained {
    pub(crate) fn from_epoch(epoch: &Arc<()>) -> Self {
        Retained(Arc::clone(epoch))
    }
}

impl std::fmt::Debug for Retained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Retained")
    }
}
