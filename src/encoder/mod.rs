//! The encoder pipeline: one instance per (session, data binding,
//! subtype) triple, running three cooperating tasks over two slots and a
//! FIFO request queue.
//!
//! The input collector snapshots the binding on its "data available"
//! event; the encoder worker transforms the snapshot; the output
//! dispatcher matches the latest encoded buffer against queued requests
//! in arrival order, invoking each request's own callback rather than
//! completing a one-shot reply.

pub mod buffer;
pub mod codec;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::binding::DataBinding;
use crate::slot::Slot;
use buffer::{Buffer, RawFrame};
use codec::Encoder;

/// A pending pull request: deliver the next encoded frame, stamped with
/// `time_code`, to `callback`.
pub struct Request {
    pub id: u64,
    pub time_code: u32,
    pub callback: Arc<dyn Fn(Arc<Buffer>, u32) + Send + Sync>,
}

#[derive(Default)]
struct RequestQueue {
    inner: Mutex<VecDeque<Request>>,
    arrived: Notify,
}

impl RequestQueue {
    fn push(&self, req: Request) {
        self.inner.lock().unwrap().push_back(req);
        self.arrived.notify_waiters();
    }

    fn pop_front(&self) -> Option<Request> {
        self.inner.lock().unwrap().pop_front()
    }

    async fn wait_for_arrival(&self) {
        self.arrived.notified().await;
    }

    /// Removes and returns every still-pending request, used when the
    /// owning session closes: these requests are cancelled, not served.
    fn drain(&self) -> Vec<Request> {
        self.inner.lock().unwrap().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// One running encoder instance. Owns the three worker tasks and tears
/// them down together on `shutdown`.
pub struct StreamEncoder {
    next_request_id: AtomicU64,
    queue: Arc<RequestQueue>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl StreamEncoder {
    /// Spawns the input collector, encoder worker, and output dispatcher
    /// for `binding`, using `encoder` to transform snapshots, and starts
    /// pumping immediately.
    pub fn start(binding: Arc<dyn DataBinding>, encoder: Box<dyn Encoder>) -> Arc<StreamEncoder> {
        let raw_slot: Arc<Slot<RawFrame>> = Arc::new(Slot::new());
        let encoded_slot: Arc<Slot<Arc<Buffer>>> = Arc::new(Slot::new());
        let queue = Arc::new(RequestQueue::default());
        let cancel = CancellationToken::new();
        let encoder: Arc<dyn Encoder> = Arc::from(encoder);

        let mut tasks = JoinSet::new();

        tasks.spawn(input_collector(
            binding.clone(),
            raw_slot.clone(),
            cancel.clone(),
        ));
        tasks.spawn(encoder_worker(
            encoder,
            raw_slot,
            encoded_slot.clone(),
            cancel.clone(),
        ));
        tasks.spawn(output_dispatcher(encoded_slot, queue.clone(), cancel.clone()));

        Arc::new(StreamEncoder {
            next_request_id: AtomicU64::new(1),
            queue,
            cancel,
            tasks: tokio::sync::Mutex::new(tasks),
        })
    }

    /// Enqueues a pull request and returns its id, which `cancel` can
    /// later use to remove it before it is served.
    pub fn push_request(
        &self,
        time_code: u32,
        callback: Arc<dyn Fn(Arc<Buffer>, u32) + Send + Sync>,
    ) -> u64 {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.queue.push(Request {
            id,
            time_code,
            callback,
        });
        id
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Stops the three worker tasks, propagates the abort to the
    /// binding, and cancels every request still in the queue without
    /// invoking its callback.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.queue.drain();
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}

async fn input_collector(
    binding: Arc<dyn DataBinding>,
    raw_slot: Arc<Slot<RawFrame>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                binding.abort();
                return;
            }
            _ = binding.wait_for_data() => {
                binding.wait_async_completed().await;
                match binding.snapshot_rgb() {
                    Ok(bytes) => raw_slot.set(RawFrame {
                        bytes,
                        width: binding.width(),
                        height: binding.height(),
                    }),
                    Err(err) => tracing::warn!(%err, "snapshot failed, dropping frame"),
                }
            }
        }
    }
}

async fn encoder_worker(
    encoder: Arc<dyn Encoder>,
    raw_slot: Arc<Slot<RawFrame>>,
    encoded_slot: Arc<Slot<Arc<Buffer>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = raw_slot.wait_for_update() => {
                let Some(frame) = raw_slot.get() else { continue };
                match encoder.encode(&frame.bytes, frame.width, frame.height) {
                    Ok((metadata, payload)) => {
                        encoded_slot.set(Arc::new(Buffer {
                            subtype: encoder.subtype(),
                            metadata,
                            payload,
                        }));
                    }
                    Err(err) => tracing::warn!(%err, "encode failed, skipping this frame"),
                }
            }
        }
    }
}

async fn output_dispatcher(
    encoded_slot: Arc<Slot<Arc<Buffer>>>,
    queue: Arc<RequestQueue>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = encoded_slot.wait_for_update() => {}
            _ = queue.wait_for_arrival() => {}
        }
        // Drain whatever can be satisfied with the latest buffer. The
        // same encoded buffer may serve more than one queued request;
        // a fresh encode is only needed once the queue outruns it.
        while let Some(buf) = encoded_slot.get() {
            let Some(req) = queue.pop_front() else { break };
            (req.callback)(buf, req.time_code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{ColorType, ElementType, RawImageBinding, RowOrientation};
    use codec::RgbRawEncoder;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_frame_after_request_and_publish() {
        let binding = Arc::new(RawImageBinding::new(
            1,
            1,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        let stream = StreamEncoder::start(binding.clone(), Box::new(RgbRawEncoder));

        let delivered: Arc<Mutex<Vec<(Arc<Buffer>, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = delivered.clone();
        stream.push_request(
            42,
            Arc::new(move |buf, tc| delivered_clone.lock().unwrap().push((buf, tc))),
        );

        binding.write_frame(&[9, 9, 9]);

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !delivered.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let got = delivered.lock().unwrap();
        assert_eq!(got[0].1, 42);
        assert_eq!(got[0].0.payload, vec![9, 9, 9]);
        stream.shutdown().await;
    }

    #[tokio::test]
    async fn preserves_fifo_order_across_multiple_requests() {
        let binding = Arc::new(RawImageBinding::new(
            1,
            1,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        let stream = StreamEncoder::start(binding.clone(), Box::new(RgbRawEncoder));

        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        for tc in [10u32, 20, 30] {
            let order_clone = order.clone();
            stream.push_request(tc, Arc::new(move |_buf, tc| order_clone.lock().unwrap().push(tc)));
        }
        binding.write_frame(&[1, 2, 3]);

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if order.lock().unwrap().len() == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*order.lock().unwrap(), vec![10, 20, 30]);
        stream.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_requests_without_invoking_them() {
        let binding = Arc::new(RawImageBinding::new(
            1,
            1,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        let stream = StreamEncoder::start(binding, Box::new(RgbRawEncoder));
        let invoked = Arc::new(Mutex::new(false));
        let invoked_clone = invoked.clone();
        stream.push_request(
            77,
            Arc::new(move |_buf, _tc| *invoked_clone.lock().unwrap() = true),
        );
        assert_eq!(stream.pending_requests(), 1);
        stream.shutdown().await;
        assert!(!*invoked.lock().unwrap());
    }
}
