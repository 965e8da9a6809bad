//! Combinators over several promises.
//!
//! - [`all_of`] / [`join_all`]: wait for every input
//! - [`any_of`]: first input to settle, whatever the outcome
//! - [`first_success`] / [`either`] / [`accept_either`]: first input to
//!   succeed
//!
//! Inputs that settle after the combined promise already settled are
//! observed and ignored.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::error::WorkError;
use crate::runtime::promise::{Promise, Resolver};

struct Gather<T>
where
    T: Clone + Send + 'static,
{
    slots: Vec<Option<T>>,
    remaining: usize,
    first_error: Option<WorkError>,
    resolver: Option<Resolver<Vec<T>>>,
}

/// Collects every value in input order.
///
/// Settles only once every input has settled. If any failed, the result is
/// the first failure in completion order; otherwise it is the values in the
/// order the promises were given. An empty input resolves immediately.
pub fn join_all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::completed(Vec::new());
    }

    let (resolver, combined) = Promise::channel();
    let gather = Arc::new(Mutex::new(Gather {
        slots: vec![None; promises.len()],
        remaining: promises.len(),
        first_error: None,
        resolver: Some(resolver),
    }));

    for (index, promise) in promises.iter().enumerate() {
        let gather = gather.clone();
        promise.subscribe(move |outcome| {
            let finished = {
                let mut gather = gather.lock();
                match outcome {
                    Ok(value) => gather.slots[index] = Some(value.clone()),
                    Err(error) => {
                        if gather.first_error.is_none() {
                            gather.first_error = Some(error.clone());
                        }
                    }
                }
                gather.remaining -= 1;
                if gather.remaining > 0 {
                    return;
                }
                let resolver = gather.resolver.take();
                let outcome = match gather.first_error.take() {
                    Some(error) => Err(error),
                    None => Ok(gather.slots.drain(..).flatten().collect()),
                };
                resolver.map(|r| (r, outcome))
            };

            if let Some((resolver, outcome)) = finished {
                resolver.settle(outcome);
            }
        });
    }

    combined
}

/// Succeeds once every input has succeeded. Fails like [`join_all`].
pub fn all_of<T, I>(promises: I) -> Promise<()>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    join_all(promises).discard()
}

/// Settles with whichever input settles first, success or failure.
///
/// An empty input can never settle and fails with [`WorkError::Canceled`].
pub fn any_of<T, I>(promises: I) -> Promise<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let (resolver, combined) = Promise::channel();
    let slot = Arc::new(Mutex::new(Some(resolver)));

    for promise in promises {
        let slot = slot.clone();
        promise.subscribe(move |outcome| {
            let winner = slot.lock().take();
            if let Some(resolver) = winner {
                resolver.settle(outcome.clone());
            }
        });
    }

    combined
}

struct Race<T>
where
    T: Clone + Send + 'static,
{
    resolver: Option<Resolver<T>>,
    pending: usize,
}

/// Settles with the first value any input produces.
///
/// Failures only count once every input has failed, in which case the last
/// failure is reported. Between true ties, whichever completion takes the
/// resolver first wins; the other is discarded.
pub fn first_success<T, I>(promises: I) -> Promise<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    let (resolver, combined) = Promise::channel();
    let race = Arc::new(Mutex::new(Race {
        resolver: Some(resolver),
        pending: promises.len(),
    }));

    for promise in &promises {
        let race = race.clone();
        promise.subscribe(move |outcome| {
            let winner = {
                let mut race = race.lock();
                race.pending -= 1;
                match outcome {
                    Ok(_) => race.resolver.take(),
                    Err(_) if race.pending == 0 => race.resolver.take(),
                    Err(_) => None,
                }
            };
            if let Some(resolver) = winner {
                resolver.settle(outcome.clone());
            }
        });
    }

    combined
}

/// The first value produced by `a` or `b`.
pub fn either<T>(a: &Promise<T>, b: &Promise<T>) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    first_success([a.clone(), b.clone()])
}

/// Runs `consumer` exactly once with the first value produced by `a` or
/// `b`. If both fail, `consumer` never runs and the returned promise fails.
pub fn accept_either<T, F>(a: &Promise<T>, b: &Promise<T>, consumer: F) -> Promise<()>
where
    T: Clone + Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    either(a, b).then_accept(consumer)
}
