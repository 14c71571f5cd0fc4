// Single-outstanding-request transaction layer over a Port.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;

use crate::buffer::Buffer;
use crate::descriptor::Evaluator;
use crate::user_info::UserInfo;

/// A request to send over the port, with an optional expected-response
/// predicate and timeout.
///
/// A request with no predicate completes as soon as its bytes are written;
/// the queue immediately advances to the next request.
#[derive(Clone)]
pub struct Request {
    uuid: Uuid,
    data_to_send: Bytes,
    user_info: UserInfo,
    /// Negative means wait indefinitely, matching `ORSSerialRequest`'s
    /// `timeoutInterval` convention.
    timeout: Duration,
    infinite_timeout: bool,
    response_evaluator: Option<Evaluator>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("uuid", &self.uuid)
            .field("data_to_send", &self.data_to_send)
            .field("timeout", &self.timeout)
            .field("infinite_timeout", &self.infinite_timeout)
            .field("has_response_evaluator", &self.response_evaluator.is_some())
            .finish()
    }
}

impl Request {
    /// `timeout_seconds` negative means wait forever for a response.
    pub fn new(
        data_to_send: impl Into<Bytes>,
        user_info: UserInfo,
        timeout_seconds: f64,
        response_evaluator: Option<Evaluator>,
    ) -> Self {
        let infinite_timeout = timeout_seconds < 0.0;
        let timeout = if infinite_timeout {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(timeout_seconds.max(0.0))
        };
        Self {
            uuid: Uuid::new_v4(),
            data_to_send: data_to_send.into(),
            user_info,
            timeout,
            infinite_timeout,
            response_evaluator,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn data_to_send(&self) -> &Bytes {
        &self.data_to_send
    }

    pub fn user_info(&self) -> &UserInfo {
        &self.user_info
    }

    pub fn expects_response(&self) -> bool {
        self.response_evaluator.is_some()
    }

    /// Returns true if `response_data` is a valid response to this request.
    /// A request with no evaluator always returns true (it never needs to
    /// wait for confirming data, per spec.md §4.6).
    pub fn data_is_valid_response(&self, response_data: &[u8]) -> bool {
        match &self.response_evaluator {
            Some(f) => f(response_data),
            None => true,
        }
    }
}

struct InFlight {
    request: Request,
    armed_at: Instant,
}

/// Outcome of offering new buffer contents to the in-flight request.
pub enum QueueEvent {
    /// `request` received `response` at the current buffer position; the
    /// response bytes (through the matched span) should be consumed from
    /// the port's buffer.
    ResponseReceived { request: Request, response: Bytes, consumed: usize },
    /// `request` timed out waiting for a response.
    TimedOut { request: Request },
}

/// FIFO queue of [`Request`]s with single-outstanding-request semantics, as
/// described in spec.md §4.6.
#[derive(Default)]
pub struct RequestQueue {
    pending: VecDeque<Request>,
    in_flight: Option<InFlight>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Appends `request` to the queue. Returns the request immediately if
    /// nothing is in flight and the queue was empty, so the caller can
    /// write its bytes right away.
    pub fn enqueue(&mut self, request: Request) -> Option<Request> {
        self.pending.push_back(request);
        self.try_advance()
    }

    /// Call once `request`'s bytes have actually been written to the port.
    /// Arms the timeout (if finite) when a response is expected; otherwise
    /// the request completes immediately and the next request (if any) is
    /// returned to send.
    pub fn mark_sent(&mut self, request: Request) -> SentOutcome {
        if request.expects_response() {
            self.in_flight = Some(InFlight {
                request: request.clone(),
                armed_at: Instant::now(),
            });
            SentOutcome::AwaitingResponse
        } else {
            SentOutcome::CompletedImmediately(self.try_advance())
        }
    }

    /// If nothing is in flight and a request is waiting, removes it from
    /// the pending queue so the caller can write it (the caller must then
    /// call [`RequestQueue::mark_sent`]).
    fn try_advance(&mut self) -> Option<Request> {
        if self.in_flight.is_some() {
            return None;
        }
        self.pending.pop_front()
    }

    /// Public entry point for advancing the queue after the in-flight slot
    /// has just been vacated (by a response or a timeout), returning the
    /// next request (if any) ready to write.
    pub fn advance(&mut self) -> Option<Request> {
        self.try_advance()
    }

    /// Offers the port's current receive buffer to the in-flight request's
    /// predicate. On a match, consumes the matched span from `buffer` and
    /// returns the next request (if any) ready to send.
    pub fn on_buffer_changed(&mut self, buffer: &mut Buffer) -> Option<QueueEvent> {
        let in_flight = self.in_flight.as_ref()?;
        let data = buffer.as_slice();
        // Per invariant 3: the predicate is offered every growing prefix of
        // the buffer, smallest first, so the shortest valid response wins.
        for end in 1..=data.len() {
            if in_flight.request.data_is_valid_response(&data[..end]) {
                let InFlight { request, .. } = self.in_flight.take().expect("checked above");
                let response = Bytes::copy_from_slice(&data[..end]);
                buffer.consume(end);
                return Some(QueueEvent::ResponseReceived {
                    request,
                    response,
                    consumed: end,
                });
            }
        }
        None
    }

    /// Checks the in-flight request's timeout against `now`. Returns the
    /// timeout event if it has elapsed.
    pub fn check_timeout(&mut self, now: Instant) -> Option<QueueEvent> {
        let expired = match &self.in_flight {
            Some(in_flight) if !in_flight.request.infinite_timeout => {
                now.duration_since(in_flight.armed_at) >= in_flight.request.timeout
            }
            _ => false,
        };
        if !expired {
            return None;
        }
        let InFlight { request, .. } = self.in_flight.take()?;
        Some(QueueEvent::TimedOut { request })
    }

    /// The wall-clock deadline the caller should next wake up at, if any
    /// request is in flight with a finite timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().and_then(|f| {
            if f.request.infinite_timeout {
                None
            } else {
                Some(f.armed_at + f.request.timeout)
            }
        })
    }

    /// Fails every queued and in-flight request, e.g. on port close/removal.
    pub fn drain_all(&mut self) -> Vec<Request> {
        let mut all: Vec<Request> = self.pending.drain(..).collect();
        if let Some(in_flight) = self.in_flight.take() {
            all.push(in_flight.request);
        }
        all
    }
}

/// What to do after a request's bytes were written to the wire.
pub enum SentOutcome {
    /// The request has a predicate; its response is now awaited.
    AwaitingResponse,
    /// The request had no predicate and is already complete; carries the
    /// next request (if any) that should be written next.
    CompletedImmediately(Option<Request>),
}
