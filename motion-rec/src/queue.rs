//! Hand-off queue between frame ingestion and analysis.
//!
//! With a capacity of 0 the queue grows without bound. Otherwise the oldest queued frame is
//! evicted to make room, so the producer never blocks and analysis always sees the most recent
//! frames.

use crate::source::Frame;
use flume::{Receiver, Sender, TryRecvError, TrySendError};
use std::time::Duration;

/// Result of waiting on the queue.
#[derive(Debug)]
pub enum Recv {
    Frame(Frame),
    /// Nothing arrived within the idle timeout.
    Idle,
    /// The producer is gone and every queued frame has been consumed.
    Closed,
}

/// Producing half, owned by the ingestion task.
pub struct FrameSender {
    tx: Sender<Frame>,
    // Used to evict the oldest frame when the queue is full.
    evict: Receiver<Frame>,
}

/// Consuming half, owned by the analysis loop.
pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

/// Create a frame queue holding at most `capacity` frames, or unbounded if 0.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = if capacity == 0 {
        flume::unbounded()
    } else {
        flume::bounded(capacity)
    };

    (
        FrameSender {
            tx,
            evict: rx.clone(),
        },
        FrameReceiver { rx },
    )
}

impl FrameSender {
    /// Push a frame without blocking.
    ///
    /// Returns the number of frames evicted to make room.
    pub fn push(&self, frame: Frame) -> usize {
        let mut frame = frame;
        let mut evicted = 0;

        loop {
            match self.tx.try_send(frame) {
                // The eviction handle keeps the channel connected.
                Ok(()) | Err(TrySendError::Disconnected(_)) => return evicted,
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    // The consumer may have emptied a slot in the meantime, which is fine.
                    if self.evict.try_recv().is_ok() {
                        evicted += 1;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl FrameReceiver {
    /// Wait up to `idle` for the next frame.
    pub fn next(&self, idle: Duration) -> Recv {
        match self.rx.recv_timeout(idle) {
            Ok(frame) => Recv::Frame(frame),
            Err(flume::RecvTimeoutError::Timeout) => Recv::Idle,
            Err(flume::RecvTimeoutError::Disconnected) => Recv::Closed,
        }
    }

    /// Take a frame if one is immediately available.
    pub fn try_next(&self) -> Recv {
        match self.rx.try_recv() {
            Ok(frame) => Recv::Frame(frame),
            Err(TryRecvError::Empty) => Recv::Idle,
            Err(TryRecvError::Disconnected) => Recv::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::flat_frame;
    use std::thread;

    fn index(recv: Recv) -> Option<u64> {
        match recv {
            Recv::Frame(f) => Some(f.index),
            _ => None,
        }
    }

    #[test]
    fn unbounded_keeps_everything() {
        let (tx, rx) = frame_queue(0);

        for i in 0..100 {
            assert_eq!(tx.push(flat_frame(i, 2, 2, 0)), 0);
        }

        assert_eq!(rx.len(), 100);
        assert_eq!(index(rx.try_next()), Some(0));
    }

    #[test]
    fn bounded_drops_oldest() {
        let (tx, rx) = frame_queue(3);

        for i in 0..3 {
            assert_eq!(tx.push(flat_frame(i, 2, 2, 0)), 0);
        }

        assert_eq!(tx.push(flat_frame(3, 2, 2, 0)), 1);
        assert_eq!(tx.push(flat_frame(4, 2, 2, 0)), 1);

        let order = (0..3).filter_map(|_| index(rx.try_next())).collect::<Vec<_>>();
        assert_eq!(order, [2, 3, 4]);
        assert!(rx.is_empty());
    }

    #[test]
    fn closes_after_drain() {
        let (tx, rx) = frame_queue(0);
        tx.push(flat_frame(7, 2, 2, 0));
        drop(tx);

        assert_eq!(index(rx.next(Duration::from_millis(10))), Some(7));
        assert!(matches!(rx.next(Duration::from_millis(10)), Recv::Closed));
    }

    #[test]
    fn idle_times_out() {
        let (_tx, rx) = frame_queue(0);
        assert!(matches!(rx.next(Duration::from_millis(5)), Recv::Idle));
    }

    #[test]
    fn push_after_receiver_dropped() {
        let (tx, rx) = frame_queue(2);
        drop(rx);

        for i in 0..5 {
            tx.push(flat_frame(i, 2, 2, 0));
        }

        assert_eq!(tx.len(), 2);
    }

    #[test]
    fn crosses_threads() {
        let (tx, rx) = frame_queue(0);

        let producer = thread::spawn(move || {
            for i in 0..50 {
                tx.push(flat_frame(i, 2, 2, 0));
            }
        });

        let mut seen = vec![];

        loop {
            match rx.next(Duration::from_millis(100)) {
                Recv::Frame(f) => seen.push(f.index),
                Recv::Idle => continue,
                Recv::Closed => break,
            }
        }

        producer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
