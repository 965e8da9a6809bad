use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};
use uuid::Uuid;

use crate::runtime::combine;
use crate::runtime::error::{Error, WorkError};
use crate::runtime::executor::Handle;
use crate::runtime::scheduler::{Inline, Job, Scheduler};
use crate::runtime::task::TaskId;

/// What a promise settles to.
pub type Outcome<T> = Result<T, WorkError>;

type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

// Nested settlements deeper than this are queued on the outermost one.
const MAX_INLINE_DEPTH: usize = 64;

thread_local! {
    static SETTLE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static DEFERRED: RefCell<VecDeque<Box<dyn FnOnce()>>> = const { RefCell::new(VecDeque::new()) };
}

/// Runs the callbacks of a promise that just settled.
///
/// A continuation settling another promise re-enters here. Up to
/// `MAX_INLINE_DEPTH` levels run nested; past that the batch is parked and
/// the outermost call on this thread works through the backlog in a loop, so
/// arbitrarily long chains settle in bounded stack.
fn run_callbacks<T>(callbacks: VecDeque<Callback<T>>, outcome: Outcome<T>)
where
    T: Clone + Send + 'static,
{
    let batch = move || {
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&outcome))).is_err() {
                error!("continuation panicked outside its guard");
            }
        }
    };

    let depth = SETTLE_DEPTH.get();
    if depth >= MAX_INLINE_DEPTH {
        DEFERRED.with_borrow_mut(|deferred| deferred.push_back(Box::new(batch)));
        return;
    }

    SETTLE_DEPTH.set(depth + 1);
    batch();
    if depth == 0 {
        while let Some(parked) = DEFERRED.with_borrow_mut(VecDeque::pop_front) {
            parked();
        }
    }
    SETTLE_DEPTH.set(depth);
}

struct State<T> {
    outcome: Option<Outcome<T>>,
    callbacks: VecDeque<Callback<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    id: TaskId,
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T> Shared<T>
where
    T: Clone + Send + 'static,
{
    fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(State {
                outcome: None,
                callbacks: VecDeque::new(),
                wakers: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    /// Moves the promise out of PENDING. Only the first call has any effect.
    ///
    /// The outcome is stored and the waiting callbacks are taken in one
    /// critical section: anything registered afterwards sees the outcome and
    /// runs on its own thread.
    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }

        if !callbacks.is_empty() {
            run_callbacks(callbacks, outcome);
        }
        true
    }

    fn subscribe(&self, callback: Callback<T>) {
        let outcome = {
            let mut state = self.state.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push_back(callback);
                    return;
                }
            }
        };
        callback(&outcome);
    }
}

/// Handle to the eventual outcome of a task.
///
/// Cloning a `Promise` yields another handle to the same result slot. Every
/// combinator returns a new promise immediately; nothing but [`join`] and
/// [`join_timeout`] blocks.
///
/// Continuations come in two flavours. The plain ones (`map`, `flat_map`,
/// `recover`, ...) run on the thread that settles the source, or on the
/// registering thread if the source is already settled. The `_async` and
/// `_on` variants submit the continuation to the given scheduler instead.
///
/// [`join`]: Promise::join
/// [`join_timeout`]: Promise::join_timeout
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

// Manual Debug implementation - works regardless of whether T implements Debug
impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.shared.state.lock().outcome {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("state", &state)
            .field("result_type", &std::any::type_name::<T>())
            .finish()
    }
}

/// The exclusive write side of a promise.
///
/// Consumed by settling. Dropping an unsettled resolver fails its promise
/// with [`WorkError::Canceled`].
pub struct Resolver<T>
where
    T: Clone + Send + 'static,
{
    shared: Option<Arc<Shared<T>>>,
}

impl<T> fmt::Debug for Resolver<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.shared.as_ref().map(|s| s.id))
            .finish()
    }
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn id(&self) -> TaskId {
        self.shared.as_ref().map(|s| s.id).unwrap_or_default()
    }

    pub fn settle(mut self, outcome: Outcome<T>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(outcome);
        }
    }

    pub fn resolve(self, value: T) {
        self.settle(Ok(value))
    }

    pub fn reject(self, error: WorkError) {
        self.settle(Err(error))
    }
}

impl<T> Drop for Resolver<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            if shared.complete(Err(WorkError::Canceled)) {
                debug!(task_id = %shared.id, "resolver dropped before settling");
            }
        }
    }
}

/// Runs `f`, turning a panic into [`WorkError::Panicked`].
pub(crate) fn guarded<R>(f: impl FnOnce() -> Outcome<R>) -> Outcome<R> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(WorkError::from_panic(payload)))
}

fn dispatch<S>(scheduler: &S, job: Job)
where
    S: Scheduler + ?Sized,
{
    let id = job.id();
    if let Err(error) = scheduler.schedule(job) {
        debug!(task_id = %id, %error, "continuation rejected");
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a pending promise and the resolver that settles it.
    pub fn channel() -> (Resolver<T>, Promise<T>) {
        Self::channel_with_id(Uuid::new_v4())
    }

    pub(crate) fn channel_with_id(id: TaskId) -> (Resolver<T>, Promise<T>) {
        let shared = Arc::new(Shared::new(id));
        let resolver = Resolver {
            shared: Some(Arc::clone(&shared)),
        };
        (resolver, Promise { shared })
    }

    /// A promise already resolved with `value`.
    pub fn completed(value: T) -> Self {
        let (resolver, promise) = Self::channel();
        resolver.resolve(value);
        promise
    }

    /// A promise already failed with `error`.
    pub fn failed(error: WorkError) -> Self {
        let (resolver, promise) = Self::channel();
        resolver.reject(error);
        promise
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Err(_)))
    }

    /// The outcome if already settled, without blocking.
    pub fn try_get(&self) -> Option<Outcome<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// Joining from a worker of the pool that must run the awaited task can
    /// deadlock when every worker is blocked the same way. The same goes for
    /// joining, from inside a continuation, a promise that continuation's
    /// own chain is supposed to settle.
    pub fn join(&self) -> Result<T, Error> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone().map_err(Error::from);
            }
            self.shared.settled.wait(&mut state);
        }
    }

    /// Like [`join`](Promise::join) but gives up after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone().map_err(Error::from);
            }
            if self
                .shared
                .settled
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.outcome.is_none()
            {
                return Err(Error::Timeout);
            }
        }
    }

    /// Registers `callback` to observe the outcome exactly once.
    pub(crate) fn subscribe(&self, callback: impl FnOnce(&Outcome<T>) + Send + 'static) {
        self.shared.subscribe(Box::new(callback));
    }

    /// Settles `resolver` with whatever this promise settles to.
    pub(crate) fn forward_to(&self, resolver: Resolver<T>) {
        self.subscribe(move |outcome| resolver.settle(outcome.clone()));
    }

    // Success runs `step` on `scheduler`; failure is forwarded inline.
    fn then_value<U, S, F>(&self, scheduler: &S, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: Scheduler + Clone + 'static,
        F: FnOnce(T, Resolver<U>) + Send + 'static,
    {
        let (resolver, derived) = Promise::channel();
        let scheduler = scheduler.clone();
        self.subscribe(move |outcome| match outcome {
            Ok(value) => {
                let value = value.clone();
                dispatch(&scheduler, Job::continuing(resolver, move |r| step(value, r)));
            }
            Err(error) => resolver.reject(error.clone()),
        });
        derived
    }

    // Failure runs `step` on `scheduler`; success passes through inline.
    fn then_error<S, F>(&self, scheduler: &S, step: F) -> Promise<T>
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(WorkError, Resolver<T>) + Send + 'static,
    {
        let (resolver, derived) = Promise::channel();
        let scheduler = scheduler.clone();
        self.subscribe(move |outcome| match outcome {
            Ok(value) => resolver.resolve(value.clone()),
            Err(error) => {
                let error = error.clone();
                dispatch(&scheduler, Job::continuing(resolver, move |r| step(error, r)));
            }
        });
        derived
    }

    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_on(&Inline, f)
    }

    pub fn map_async<U, F>(&self, executor: &Handle, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_on(executor, f)
    }

    pub fn map_on<U, S, F>(&self, scheduler: &S, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: Scheduler + Clone + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map_on(scheduler, move |value| Ok(f(value)))
    }

    /// Like [`map`](Promise::map) for a function that can fail.
    pub fn try_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        self.try_map_on(&Inline, f)
    }

    pub fn try_map_on<U, S, F>(&self, scheduler: &S, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: Scheduler + Clone + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        self.then_value(scheduler, move |value, resolver| {
            resolver.settle(guarded(move || f(value)))
        })
    }

    /// Chains a step that itself returns a promise. The derived promise
    /// settles with the inner promise's outcome.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.flat_map_on(&Inline, f)
    }

    pub fn flat_map_async<U, F>(&self, executor: &Handle, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.flat_map_on(executor, f)
    }

    pub fn flat_map_on<U, S, F>(&self, scheduler: &S, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: Scheduler + Clone + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.then_value(scheduler, move |value, resolver| {
            match guarded(move || Ok(f(value))) {
                Ok(inner) => inner.forward_to(resolver),
                Err(error) => resolver.reject(error),
            }
        })
    }

    /// Replaces a failure with a value computed from it. Successes pass
    /// through and `f` never runs.
    pub fn recover<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(WorkError) -> T + Send + 'static,
    {
        self.recover_on(&Inline, f)
    }

    pub fn recover_on<S, F>(&self, scheduler: &S, f: F) -> Promise<T>
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(WorkError) -> T + Send + 'static,
    {
        self.then_error(scheduler, move |error, resolver| {
            resolver.settle(guarded(move || Ok(f(error))))
        })
    }

    pub fn then_accept<F>(&self, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.map(f)
    }

    pub fn then_accept_async<F>(&self, executor: &Handle, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.map_on(executor, f)
    }

    /// Keeps the outcome, forgets the value.
    pub fn discard(&self) -> Promise<()> {
        self.map(|_| ())
    }

    /// Observes the outcome without changing it, unless `f` panics on a
    /// successful outcome, in which case the panic becomes the failure.
    pub fn when_complete<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let (resolver, derived) = Promise::channel();
        self.subscribe(move |outcome| {
            let observed = guarded(|| {
                f(outcome);
                Ok(())
            });
            match (outcome, observed) {
                (Ok(_), Err(error)) => resolver.reject(error),
                (outcome, _) => resolver.settle(outcome.clone()),
            }
        });
        derived
    }

    /// Joins both values through `f` once both succeed.
    pub fn combine<V, R, F>(&self, other: &Promise<V>, f: F) -> Promise<R>
    where
        V: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnOnce(T, V) -> R + Send + 'static,
    {
        let other = other.clone();
        self.flat_map(move |left| other.map(move |right| f(left, right)))
    }

    /// The first value produced by either promise.
    pub fn either(&self, other: &Promise<T>) -> Promise<T> {
        combine::either(self, other)
    }

    /// Runs `consumer` once with the first value produced by either promise.
    pub fn accept_either<F>(&self, other: &Promise<T>, consumer: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        combine::accept_either(self, other, consumer)
    }
}

impl<T> Future for Promise<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone().map_err(Error::from));
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::thread;

    #[test]
    fn test_settles_exactly_once() {
        let (resolver, promise) = Promise::channel();
        assert!(!promise.is_done());

        resolver.resolve(1);
        assert!(!promise.shared.complete(Ok(2)));
        assert_eq!(promise.join().unwrap(), 1);
    }

    #[test]
    fn test_dropped_resolver_cancels() {
        let (resolver, promise) = Promise::<u8>::channel();
        drop(resolver);

        assert!(matches!(
            promise.try_get(),
            Some(Err(WorkError::Canceled))
        ));
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let (resolver, promise) = Promise::channel();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            promise.subscribe(move |outcome: &Outcome<i32>| {
                seen.lock().unwrap().push((tag, outcome.clone().unwrap()));
            });
        }
        resolver.resolve(5);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 5), ("second", 5), ("third", 5)]
        );
    }

    #[test]
    fn test_late_registration_runs_on_registering_thread() {
        let promise = Promise::completed("done".to_string());
        let here = thread::current().id();
        let ran_here = Arc::new(StdMutex::new(None));

        let flag = ran_here.clone();
        promise.subscribe(move |_| {
            *flag.lock().unwrap() = Some(thread::current().id() == here);
        });

        assert_eq!(*ran_here.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_long_chain_settles_on_small_stack() {
        let settled = thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let (resolver, source) = Promise::channel();
                let mut last = source.clone();
                for _ in 0..20_000 {
                    last = last.map(|v: u64| v + 1);
                }
                resolver.resolve(0);
                last.try_get()
            })
            .unwrap()
            .join()
            .unwrap();

        assert!(matches!(settled, Some(Ok(20_000))));
    }

    #[test]
    fn test_dropped_resolver_cancels_long_chain() {
        let last = thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let (resolver, source) = Promise::<u64>::channel();
                let mut last = source.flat_map(Promise::completed);
                for _ in 0..20_000 {
                    last = last.flat_map(Promise::completed);
                }
                drop(resolver);
                last
            })
            .unwrap()
            .join()
            .unwrap();

        assert!(matches!(last.try_get(), Some(Err(WorkError::Canceled))));
    }

    #[test]
    fn test_registration_during_settlement_runs_inline() {
        let (resolver, promise) = Promise::channel();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let inner = promise.clone();
        let outer_seen = seen.clone();
        promise.subscribe(move |_: &Outcome<i32>| {
            let late_seen = outer_seen.clone();
            inner.subscribe(move |_| late_seen.lock().unwrap().push("late"));
            outer_seen.lock().unwrap().push("early");
        });
        resolver.resolve(1);

        assert_eq!(*seen.lock().unwrap(), vec!["late", "early"]);
    }

    #[test]
    fn test_map_skips_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mapped = Promise::<i32>::failed(WorkError::msg("out of stock")).map(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v + 1
        });

        let err = mapped.join().unwrap_err();
        assert_eq!(err.to_string(), "composition failed: out of stock");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recover_only_on_failure() {
        let recovered =
            Promise::failed(WorkError::msg("boom")).recover(|e| format!("Thrown: {e}"));
        assert_eq!(recovered.join().unwrap(), "Thrown: boom");

        let untouched = Promise::completed("fine".to_string())
            .recover(|_| unreachable!("success must not be recovered"));
        assert_eq!(untouched.join().unwrap(), "fine");
    }

    #[test]
    fn test_try_map_and_panics_become_failures() {
        let failed = Promise::completed(3).try_map(|_| Err::<i32, _>(WorkError::msg("bad")));
        assert!(failed.is_failed());

        let panicked = Promise::completed(3).map(|_: i32| -> i32 { panic!("map blew up") });
        assert!(matches!(
            panicked.try_get(),
            Some(Err(WorkError::Panicked(_)))
        ));
    }

    #[test]
    fn test_flat_map_follows_inner() {
        let (inner_resolver, inner) = Promise::channel();
        let chained = Promise::completed(7).flat_map(move |_| inner);

        assert!(!chained.is_done());
        inner_resolver.resolve(8);
        assert_eq!(chained.join().unwrap(), 8);
    }

    #[test]
    fn test_when_complete_keeps_outcome() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let observed = Promise::completed(4).when_complete(move |outcome| {
            if outcome.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(observed.join().unwrap(), 4);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_combine_both_values() {
        let price = Promise::completed(2.5_f64);
        let total = Promise::completed(4_u32).combine(&price, |qty, price| f64::from(qty) * price);

        assert_eq!(total.join().unwrap(), 10.0);
    }

    #[test]
    fn test_join_timeout() {
        let (_resolver, promise) = Promise::<i32>::channel();

        assert!(matches!(
            promise.join_timeout(Duration::from_millis(20)),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn test_join_from_other_thread() {
        let (resolver, promise) = Promise::channel();

        let waiter = {
            let promise = promise.clone();
            thread::spawn(move || promise.join().unwrap())
        };
        thread::sleep(Duration::from_millis(10));
        resolver.resolve("late");

        assert_eq!(waiter.join().unwrap(), "late");
    }

    #[test]
    fn test_debug_reports_state() {
        let promise = Promise::completed(1_u8);
        let rendered = format!("{promise:?}");

        assert!(rendered.contains("resolved"));
        assert!(rendered.contains("u8"));
    }
}
