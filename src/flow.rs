//! Every stage runs as its own task and talks to its neighbours through a
//! pair of bounded channels, one for results and one for errors. Blocking
//! sends and receives race against a shared [`CancellationToken`], so a
//! cancelled run unwinds promptly and every task drops (closes) its
//! channels exactly once on the way out.

use crate::error::{Cancelled, Error, RunError};

use log::{debug, error};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CAPACITY: usize = 100;

/// Sends `item`, waiting for room in the channel. Fails once `token` is
/// cancelled or the receiving side is gone.
pub async fn push<T>(token: &CancellationToken, tx: &Sender<T>, item: T) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled),
        sent = tx.send(item) => sent.map_err(|_| Cancelled),
    }
}

/// Receives the next item; `Ok(None)` once the sending side closed.
pub async fn pop<T>(token: &CancellationToken, rx: &mut Receiver<T>) -> Result<Option<T>, Cancelled> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled),
        item = rx.recv() => Ok(item),
    }
}

/// Output side of a stage.
#[derive(Debug)]
pub struct Link<T> {
    pub items: Receiver<T>,
    pub errors: Receiver<Error>,
}

impl<T> Link<T> {
    pub fn new(items: Receiver<T>, errors: Receiver<Error>) -> Self {
        Self { items, errors }
    }
}

/// Collects what a stage produces for one input item.
#[derive(Debug)]
pub struct Emitter<T> {
    items: Vec<T>,
    errors: Vec<Error>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> Emitter<T> {
    pub fn emit(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn error(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    fn take(&mut self) -> (Vec<T>, Vec<Error>) {
        (
            std::mem::take(&mut self.items),
            std::mem::take(&mut self.errors),
        )
    }
}

/// A pipeline stage. Owns its state exclusively; sees its inputs in order.
pub trait Processor: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    fn process(&mut self, item: Self::Input, out: &mut Emitter<Self::Output>);

    /// Called once the input is exhausted.
    fn finalize(&mut self, _out: &mut Emitter<Self::Output>) {}
}

/// Spawns `processor` on its own task, reading from `input`.
pub fn connect<P: Processor>(
    token: &CancellationToken,
    capacity: usize,
    processor: P,
    input: Receiver<P::Input>,
) -> Link<P::Output> {
    let (tx, rx) = mpsc::channel(capacity);
    let (etx, erx) = mpsc::channel(capacity);
    let name = processor.name();

    let worker = tokio::spawn(run_stage(token.clone(), processor, input, tx, etx.clone()));
    supervise(token, name, etx, worker);

    Link::new(rx, erx)
}

async fn run_stage<P: Processor>(
    token: CancellationToken,
    mut processor: P,
    mut input: Receiver<P::Input>,
    tx: Sender<P::Output>,
    etx: Sender<Error>,
) {
    let name = processor.name();
    debug!("{}: started", name);
    let mut out = Emitter::default();
    loop {
        let finished = match pop(&token, &mut input).await {
            Ok(Some(item)) => {
                processor.process(item, &mut out);
                false
            }
            Ok(None) => {
                processor.finalize(&mut out);
                true
            }
            Err(Cancelled) => {
                debug!("{}: cancelled", name);
                return;
            }
        };
        if forward(&token, &tx, &etx, &mut out).await.is_err() {
            debug!("{}: cancelled", name);
            return;
        }
        if finished {
            debug!("{}: done", name);
            return;
        }
    }
}

/// Watches `task` and reports it on `errors` if it panicked, so a stage that
/// died is never mistaken for one that finished. `errors` stays open until
/// the task is gone.
pub fn supervise(token: &CancellationToken, name: &'static str, errors: Sender<Error>, task: JoinHandle<()>) {
    let token = token.clone();
    tokio::spawn(async move {
        match task.await {
            Err(failure) if failure.is_panic() => {
                error!("{}: aborted", name);
                let _ = push(&token, &errors, Error::Aborted { stage: name.to_string() }).await;
            }
            _ => {}
        }
    });
}

async fn forward<T>(
    token: &CancellationToken,
    tx: &Sender<T>,
    etx: &Sender<Error>,
    out: &mut Emitter<T>,
) -> Result<(), Cancelled> {
    let (items, errors) = out.take();
    for error in errors {
        debug!("side error: {}", error);
        push(token, etx, error).await?;
    }
    for item in items {
        push(token, tx, item).await?;
    }
    Ok(())
}

/// Runs `processor` over `inputs` in the calling thread, stopping at the
/// first error.
pub fn run_batch<P: Processor>(
    mut processor: P,
    inputs: impl IntoIterator<Item = P::Input>,
) -> crate::Result<Vec<P::Output>> {
    let mut out = Emitter::default();
    let mut result = Vec::new();
    for item in inputs {
        processor.process(item, &mut out);
        let (items, errors) = out.take();
        if let Some(error) = errors.into_iter().next() {
            return Err(error);
        }
        result.extend(items);
    }
    processor.finalize(&mut out);
    let (items, errors) = out.take();
    if let Some(error) = errors.into_iter().next() {
        return Err(error);
    }
    result.extend(items);
    Ok(result)
}

/// Merges several error channels into one, keeping every error.
pub fn demultiplex(
    token: &CancellationToken,
    capacity: usize,
    sources: Vec<Receiver<Error>>,
) -> Receiver<Error> {
    let (tx, rx) = mpsc::channel(capacity);
    for mut source in sources {
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            while let Ok(Some(error)) = pop(&token, &mut source).await {
                if push(&token, &tx, error).await.is_err() {
                    break;
                }
            }
        });
    }
    rx
}

/// Result of draining the last stage of a pipeline.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    /// At least one error arrived; `partial` holds whatever was produced.
    Failed { partial: T, errors: Vec<Error> },
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn into_result(self) -> Result<T, RunError> {
        match self {
            Outcome::Completed(result) => Ok(result),
            Outcome::Failed { errors, .. } => Err(RunError::Failed(errors)),
            Outcome::Cancelled => Err(RunError::Cancelled(Cancelled)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Reads both channels of `link` until both are closed.
pub async fn drain<T>(token: &CancellationToken, link: Link<T>) -> Outcome<Vec<T>> {
    let Link {
        mut items,
        mut errors,
    } = link;
    let mut results = Vec::new();
    let mut failures = Vec::new();
    let (mut items_open, mut errors_open) = (true, true);

    while items_open || errors_open {
        tokio::select! {
            _ = token.cancelled() => return Outcome::Cancelled,
            item = items.recv(), if items_open => match item {
                Some(item) => results.push(item),
                None => items_open = false,
            },
            error = errors.recv(), if errors_open => match error {
                Some(error) => failures.push(error),
                None => errors_open = false,
            },
        }
    }

    if token.is_cancelled() {
        return Outcome::Cancelled;
    }
    if failures.is_empty() {
        Outcome::Completed(results)
    } else {
        Outcome::Failed {
            partial: results,
            errors: failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Doubler;

    impl Processor for Doubler {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn process(&mut self, item: i64, out: &mut Emitter<i64>) {
            if item < 0 {
                out.error(Error::Config(format!("negative input {}", item)));
                return;
            }
            out.emit(item * 2);
        }
    }

    struct Summer(i64);

    impl Processor for Summer {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &'static str {
            "summer"
        }

        fn process(&mut self, item: i64, _out: &mut Emitter<i64>) {
            self.0 += item;
        }

        fn finalize(&mut self, out: &mut Emitter<i64>) {
            out.emit(self.0);
        }
    }

    struct Fragile;

    impl Processor for Fragile {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &'static str {
            "fragile"
        }

        fn process(&mut self, item: i64, out: &mut Emitter<i64>) {
            if item == 3 {
                panic!("cannot handle {}", item);
            }
            out.emit(item);
        }
    }

    struct Counter(Arc<AtomicUsize>);

    impl Processor for Counter {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &'static str {
            "counter"
        }

        fn process(&mut self, item: i64, out: &mut Emitter<i64>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            out.emit(item);
        }
    }

    fn source(token: &CancellationToken, items: Vec<i64>) -> Receiver<i64> {
        let (tx, rx) = mpsc::channel(1);
        let token = token.clone();
        tokio::spawn(async move {
            for item in items {
                if push(&token, &tx, item).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    #[tokio::test]
    async fn test_connected_stages_keep_order() {
        let token = CancellationToken::new();
        let link = connect(&token, 2, Doubler, source(&token, (0..50).collect()));
        let errors = demultiplex(&token, 2, vec![link.errors]);

        let outcome = drain(&token, Link::new(link.items, errors)).await;
        let items = outcome.into_result().unwrap();
        assert_eq!(items, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_all_errors_are_kept() {
        let token = CancellationToken::new();
        let first = connect(&token, 1, Doubler, source(&token, vec![1, -1, 2, -2]));
        let second = connect(&token, 1, Summer(0), first.items);
        let errors = demultiplex(&token, 1, vec![first.errors, second.errors]);

        match drain(&token, Link::new(second.items, errors)).await {
            Outcome::Failed { partial, errors } => {
                assert_eq!(partial, vec![6]);
                let mut messages: Vec<_> = errors.iter().map(|e| e.to_string()).collect();
                messages.sort();
                assert_eq!(
                    messages,
                    vec![
                        "invalid configuration: negative input -1",
                        "invalid configuration: negative input -2",
                    ]
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let token = CancellationToken::new();
        // an endless source only stops through cancellation
        let (tx, rx) = mpsc::channel(1);
        let producer = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut i = 0;
                while push(&token, &tx, i).await.is_ok() {
                    i += 1;
                }
            })
        };
        let link = connect(&token, 1, Summer(0), rx);
        let errors = demultiplex(&token, 1, vec![link.errors]);

        token.cancel();
        let outcome = drain(&token, Link::new(link.items, errors)).await;

        assert!(outcome.is_cancelled());
        assert!(matches!(outcome.into_result(), Err(RunError::Cancelled(_))));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_stage_fails_the_run() {
        let token = CancellationToken::new();
        let first = connect(&token, 1, Fragile, source(&token, (0..10).collect()));
        let second = connect(&token, 1, Summer(0), first.items);
        let errors = demultiplex(&token, 1, vec![first.errors, second.errors]);

        match drain(&token, Link::new(second.items, errors)).await {
            Outcome::Failed { partial, errors } => {
                assert_eq!(partial, vec![3]);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].to_string(), "stage `fragile' aborted");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_while_items_flow() {
        let token = CancellationToken::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(1);
        let producer = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut i = 0;
                while push(&token, &tx, i).await.is_ok() {
                    i += 1;
                }
            })
        };
        let counted = connect(&token, 1, Counter(Arc::clone(&seen)), rx);
        let summed = connect(&token, 1, Summer(0), counted.items);
        let errors = demultiplex(&token, 1, vec![counted.errors, summed.errors]);

        while seen.load(Ordering::SeqCst) < 10 {
            tokio::task::yield_now().await;
        }
        token.cancel();
        let outcome = drain(&token, Link::new(summed.items, errors)).await;
        assert!(outcome.is_cancelled());
        producer.await.unwrap();

        // the counter stage drops its state once its task ends
        for _ in 0..1000 {
            if Arc::strong_count(&seen) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&seen), 1);
    }

    #[test]
    fn test_run_batch_stops_at_first_error() {
        assert_eq!(run_batch(Doubler, vec![1, 2, 3]).unwrap(), vec![2, 4, 6]);
        assert_eq!(run_batch(Summer(0), vec![1, 2, 3]).unwrap(), vec![6]);
        assert_eq!(
            format!("{}", run_batch(Doubler, vec![1, -5, -6]).unwrap_err()),
            "invalid configuration: negative input -5"
        );
    }
}
