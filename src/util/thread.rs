//! Module `thread` implement a generic multi-threading pattern.
//!
//! It is inspired from gen-server model from Erlang, where by, every thread is
//! expected to hold onto its own state, and handle all inter-thread communication
//! via channels and message queues.

use std::{
    mem,
    sync::{mpsc, Arc, Mutex},
    thread,
};

use crate::{err_at, Result};

/// Thread type, providing gen-server pattern to do multi-threading.
///
/// NOTE: When a thread value is dropped, it is made sure that there are no dangling
/// thread routines. To achieve this following requirements need to be satisfied:
///
/// * The thread's main loop should handle _disconnect_ signal on its [Rx] channel.
/// * Call `join()` on the [Thread] instance.
pub struct Thread<Q, R = (), T = ()> {
    inner: Option<Inner<Q, R, T>>,
}

struct Inner<Q, R, T> {
    handle: thread::JoinHandle<T>,
    tx: Option<Arc<Mutex<Tx<Q, R>>>>,
}

impl<Q, R, T> Inner<Q, R, T> {
    fn join(mut self) -> Result<T> {
        mem::drop(self.tx.take());

        match self.handle.join() {
            Ok(val) => Ok(val),
            Err(err) => err_at!(ThreadFail, msg: "fail {:?}", err),
        }
    }
}

impl<Q, R, T> Drop for Thread<Q, R, T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.join().ok();
        }
    }
}

impl<Q, R, T> Thread<Q, R, T> {
    /// Create a new Thread instance, using asynchronous channel with infinite buffer.
    /// `main_loop` shall be called with the rx side of the channel and shall return
    /// a function that can be spawned using thread::spawn.
    pub fn new<F, N>(main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(main_loop(rx));

        let tx = Some(Arc::new(Mutex::new(Tx::N(tx))));

        Thread {
            inner: Some(Inner { handle, tx }),
        }
    }

    /// Recommended way to exit/shutdown the thread. Note that all [Tx] clones of this
    /// thread must also be dropped for this call to return.
    ///
    /// Even otherwise, when Thread value goes out of scope its drop implementation
    /// shall call this method to exit the thread, except that any errors are ignored.
    pub fn join(mut self) -> Result<T> {
        self.inner.take().unwrap().join()
    }

    /// Return a clone of tx channel.
    pub fn to_tx(&self) -> Tx<Q, R> {
        match self.inner.as_ref() {
            Some(inner) => inner.tx.as_ref().unwrap().lock().unwrap().clone(),
            None => unreachable!(),
        }
    }
}

/// IPC type wrapping the async [mpsc::Sender] side of a thread's channel.
///
/// The clone behavior is similar to [mpsc::Sender].
pub enum Tx<Q, R = ()> {
    N(mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>),
}

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        match self {
            Tx::N(tx) => Tx::N(tx.clone()),
        }
    }
}

impl<Q, R> Tx<Q, R> {
    /// Post a message to thread and don't wait for response.
    pub fn post(&self, msg: Q) -> Result<()> {
        match self {
            Tx::N(tx) => err_at!(ThreadFail, tx.send((msg, None)))?,
        };
        Ok(())
    }
}

/// IPC type, that shall be passed to the thread's main loop.
///
/// Refer to [Thread::new] for details.
pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;

