use core::pin::Pin;
use core::task::{Context, Poll};
use std::time::Duration;

use futures::{Future, Stream, ready};
use ldr_config::shared::BatchConfig;
use pin_project_lite::pin_project;
use tracing::info;

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::LdrResult;
use crate::source::StreamMessage;

/// An item collected by a [`TimeoutBatchStream`].
pub trait BatchItem {
    /// Contribution of the item to the batch size.
    fn weight(&self) -> usize;

    /// Whether the batch must be emitted right after this item.
    fn ends_batch(&self) -> bool;
}

impl BatchItem for LdrResult<StreamMessage> {
    fn weight(&self) -> usize {
        self.as_ref().map_or(0, StreamMessage::event_count)
    }

    fn ends_batch(&self) -> bool {
        !matches!(self, Ok(StreamMessage::Events(_)))
    }
}

// Implementation adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter that batches items based on size limits and timeouts.
    ///
    /// This stream collects items from the underlying stream into batches, emitting them when either:
    /// - The accumulated weight reaches the maximum batch size
    /// - An item that ends a batch, such as a checkpoint or an error, is received
    /// - A timeout occurs
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct TimeoutBatchStream<B, S: Stream<Item = B>> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Option<tokio::time::Sleep>,
        shutdown_rx: ShutdownRx,
        items: Vec<S::Item>,
        weight: usize,
        batch_config: BatchConfig,
        reset_timer: bool,
        inner_stream_ended: bool,
        stream_stopped: bool
    }
}

impl<B: BatchItem, S: Stream<Item = B>> TimeoutBatchStream<B, S> {
    /// Creates a new [`TimeoutBatchStream`] with the given configuration.
    ///
    /// The stream will batch items according to the provided `batch_config` and can be
    /// stopped using the `shutdown_rx` watch channel.
    pub fn wrap(stream: S, batch_config: BatchConfig, shutdown_rx: ShutdownRx) -> Self {
        TimeoutBatchStream {
            stream,
            deadline: None,
            shutdown_rx,
            items: Vec::new(),
            weight: 0,
            batch_config,
            reset_timer: true,
            inner_stream_ended: false,
            stream_stopped: false,
        }
    }
}

impl<B: BatchItem, S: Stream<Item = B>> Stream for TimeoutBatchStream<B, S> {
    type Item = ShutdownResult<Vec<S::Item>, Vec<S::Item>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.as_mut().project();

        if *this.inner_stream_ended {
            return Poll::Ready(None);
        }

        loop {
            if *this.stream_stopped {
                return Poll::Ready(None);
            }

            // Shutdown takes priority, accumulated items are handed back with the signal.
            if this.shutdown_rx.has_changed().unwrap_or(false) {
                info!("the stream has been forcefully stopped");

                *this.stream_stopped = true;
                this.shutdown_rx.mark_unchanged();
                *this.weight = 0;

                return Poll::Ready(Some(ShutdownResult::Shutdown(std::mem::take(this.items))));
            }

            if *this.reset_timer {
                this.deadline
                    .set(Some(tokio::time::sleep(Duration::from_millis(
                        this.batch_config.max_fill_ms,
                    ))));
                *this.reset_timer = false;
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => break,
                Poll::Ready(Some(item)) => {
                    *this.weight += item.weight();
                    let ends_batch = item.ends_batch();
                    this.items.push(item);

                    if ends_batch || *this.weight >= this.batch_config.max_size {
                        *this.reset_timer = true;
                        *this.weight = 0;
                        return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
                    }
                }
                Poll::Ready(None) => {
                    let last = if this.items.is_empty() {
                        None
                    } else {
                        *this.reset_timer = true;
                        *this.weight = 0;
                        Some(ShutdownResult::Ok(std::mem::take(this.items)))
                    };

                    *this.inner_stream_ended = true;

                    return Poll::Ready(last);
                }
            }
        }

        // Time-based emission bounds the latency of low-volume streams.
        if !this.items.is_empty()
            && let Some(deadline) = this.deadline.as_pin_mut()
        {
            ready!(deadline.poll(cx));
            *this.reset_timer = true;
            *this.weight = 0;

            return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
        }

        Poll::Pending
    }
}
