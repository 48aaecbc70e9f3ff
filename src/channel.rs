//! Go-style channels over a mutex and condition variables.
//!
//! Two flavors share one type: a bounded FIFO (used by per-peer writers with
//! capacity 20) and a capacity-0 rendezvous channel where send and receive
//! synchronize pairwise. Receiving from a closed, drained channel returns
//! `Err(TransferError::ChannelClosed)` rather than panicking, and the writer
//! loop terminates on that variant.

use crate::error::TransferError;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct State<T> {
    open: bool,
    buffer: VecDeque<T>,
    // Rendezvous handoff cell; unused by the bounded flavor.
    slot: Option<T>,
    receivers_waiting: usize,
}

/// A single-producer single-consumer friendly channel of owned values.
///
/// All operations are safe under arbitrary concurrent use; the transfer
/// pipeline only ever attaches one producer (the dispatcher) and one
/// consumer (the writer task) per channel.
pub struct Channel<T> {
    state: Mutex<State<T>>,
    send_cv: Condvar,
    recv_cv: Condvar,
    capacity: usize,
}

impl<T> Channel<T> {
    /// A buffered channel holding up to `capacity` values.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "use rendezvous() for an unbuffered channel");
        Self {
            state: Mutex::new(State {
                open: true,
                buffer: VecDeque::with_capacity(capacity),
                slot: None,
                receivers_waiting: 0,
            }),
            send_cv: Condvar::new(),
            recv_cv: Condvar::new(),
            capacity,
        }
    }

    /// An unbuffered channel: each send blocks until a receiver has taken
    /// the value, and each receive blocks until a sender provides one.
    pub fn rendezvous() -> Self {
        Self {
            state: Mutex::new(State {
                open: true,
                buffer: VecDeque::new(),
                slot: None,
                receivers_waiting: 0,
            }),
            send_cv: Condvar::new(),
            recv_cv: Condvar::new(),
            capacity: 0,
        }
    }

    /// Send a value, blocking while the buffer is full (bounded) or until a
    /// receiver arrives (rendezvous). Fails once the channel is closed.
    pub fn send(&self, value: T) -> Result<(), TransferError> {
        if self.capacity == 0 {
            return self.send_rendezvous(value);
        }
        let mut st = self.state.lock().unwrap();
        while st.open && st.buffer.len() >= self.capacity {
            st = self.send_cv.wait(st).unwrap();
        }
        if !st.open {
            return Err(TransferError::ChannelClosed);
        }
        st.buffer.push_back(value);
        self.recv_cv.notify_one();
        Ok(())
    }

    fn send_rendezvous(&self, value: T) -> Result<(), TransferError> {
        let mut st = self.state.lock().unwrap();
        while st.open && !(st.receivers_waiting > 0 && st.slot.is_none()) {
            st = self.send_cv.wait(st).unwrap();
        }
        if !st.open {
            return Err(TransferError::ChannelClosed);
        }
        st.slot = Some(value);
        self.recv_cv.notify_all();
        while st.open && st.slot.is_some() {
            st = self.send_cv.wait(st).unwrap();
        }
        if st.slot.is_some() {
            // Closed before any receiver picked the value up.
            st.slot = None;
            return Err(TransferError::ChannelClosed);
        }
        Ok(())
    }

    /// Receive a value, blocking while the channel is empty and open.
    ///
    /// A closed channel still yields buffered values until drained, then
    /// every receive fails with `ChannelClosed`.
    pub fn recv(&self) -> Result<T, TransferError> {
        if self.capacity == 0 {
            return self.recv_rendezvous();
        }
        let mut st = self.state.lock().unwrap();
        while st.open && st.buffer.is_empty() {
            st = self.recv_cv.wait(st).unwrap();
        }
        match st.buffer.pop_front() {
            Some(value) => {
                self.send_cv.notify_one();
                Ok(value)
            }
            None => Err(TransferError::ChannelClosed),
        }
    }

    fn recv_rendezvous(&self) -> Result<T, TransferError> {
        let mut st = self.state.lock().unwrap();
        st.receivers_waiting += 1;
        self.send_cv.notify_all();
        while st.open && st.slot.is_none() {
            st = self.recv_cv.wait(st).unwrap();
        }
        st.receivers_waiting -= 1;
        match st.slot.take() {
            Some(value) => {
                self.send_cv.notify_all();
                Ok(value)
            }
            None => Err(TransferError::ChannelClosed),
        }
    }

    /// Mark the channel closed and wake every waiter. Subsequent sends fail;
    /// receives succeed until the buffer drains.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.open = false;
        self.send_cv.notify_all();
        self.recv_cv.notify_all();
    }

    /// True iff the channel is closed **and** fully drained.
    pub fn is_closed(&self) -> bool {
        let st = self.state.lock().unwrap();
        !st.open && st.buffer.is_empty() && st.slot.is_none()
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
