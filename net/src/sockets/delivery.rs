use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

use crate::{destination::Destination, error::{TransportError, TransportResult}};

pub(crate) struct DeliveryState {
    pub(crate) result: Option<TransportResult<()>>,
    pub(crate) waker: Option<Waker>,
}

/// Completes when a queued message has been written to the socket, or with the error that
/// stopped it from being written
pub struct Delivery {
    state: Arc<Mutex<DeliveryState>>,
}

/// The writing side of a Delivery. Dropping it without completing resolves the Delivery
/// with `ConnectionClosed`, so a message discarded with its queue is never left pending
pub(crate) struct DeliveryCompletion {
    state: Option<Arc<Mutex<DeliveryState>>>,
    destination: Destination,
}

pub(crate) fn delivery(destination: &Destination) -> (Delivery, DeliveryCompletion) {
    let state = Arc::new(Mutex::new(DeliveryState {
        result: None,
        waker: None,
    }));
    (
        Delivery { state: state.clone() },
        DeliveryCompletion {
            state: Some(state),
            destination: destination.clone(),
        },
    )
}

impl Delivery {
    /// A delivery that has already failed
    pub fn failed(error: TransportError) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeliveryState {
                result: Some(Err(error)),
                waker: None,
            })),
        }
    }

    pub fn is_complete(self: &Self) -> bool {
        self.state.lock().unwrap().result.is_some()
    }

    /// Non-blocking check of the outcome
    pub fn try_result(self: &Self) -> Option<TransportResult<()>> {
        self.state.lock().unwrap().result.clone()
    }
}

impl Future for Delivery {
    type Output = TransportResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap();
        match state.result.clone() {
            Some(result) => Poll::Ready(result),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl DeliveryCompletion {
    pub(crate) fn complete(mut self: Self, result: TransportResult<()>) {
        if let Some(state) = self.state.take() {
            Self::resolve(&state, result);
        }
    }

    fn resolve(state: &Arc<Mutex<DeliveryState>>, result: TransportResult<()>) {
        let mut state = state.lock().unwrap();
        state.result = Some(result);
        if let Some(waker) = state.waker.take() { waker.wake() }
    }
}

impl Drop for DeliveryCompletion {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let error = TransportError::ConnectionClosed {
                destination: self.destination.clone(),
            };
            Self::resolve(&state, Err(error));
        }
    }
}
