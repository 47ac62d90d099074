//! Polling-based reactor. This is a single-threaded reactor using a `polling` loop.
use crossbeam_channel as chan;

use mockwire_net::error::Error;
use mockwire_net::time::{LocalDuration, LocalTime, TimeoutManager};
use mockwire_net::{Deferred, Event, Key, Scheduler, Service, TimerId};

use log::*;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Maximum amount of time to wait for i/o.
const WAIT_TIMEOUT: LocalDuration = LocalDuration::from_mins(60);
/// Smallest period a repeating timer can have.
const MIN_PERIOD: LocalDuration = LocalDuration::from_millis(1);

/// Wakes up a reactor blocked waiting for i/o.
#[derive(Clone)]
pub struct Waker(Arc<polling::Poller>);

impl Waker {
    /// Wake up the reactor.
    pub fn wake(&self) -> io::Result<()> {
        self.0.notify()
    }
}

/// A registered handle and the notifications it's interested in.
#[derive(Debug, Clone, Copy)]
struct Source {
    fd: RawFd,
    readable: bool,
    writable: bool,
}

impl Source {
    fn interest(&self, key: Key) -> polling::Event {
        polling::Event {
            key: key.0 as usize,
            readable: self.readable,
            writable: self.writable,
        }
    }
}

/// A single-threaded non-blocking reactor.
pub struct Reactor {
    poller: Arc<polling::Poller>,
    sources: HashMap<Key, Source>,
    timeouts: TimeoutManager<Key>,
    deferred: VecDeque<(Key, Deferred)>,
    /// I/O readiness events populated by `polling::Poller::wait`.
    events: Vec<polling::Event>,
}

impl Reactor {
    /// Construct a new reactor.
    pub fn new() -> Result<Self, io::Error> {
        let poller = Arc::new(polling::Poller::new()?);

        Ok(Self {
            poller,
            sources: HashMap::new(),
            timeouts: TimeoutManager::new(),
            deferred: VecDeque::new(),
            events: Vec::with_capacity(32),
        })
    }

    /// Return a new waker.
    ///
    /// Used to wake up the main event loop.
    pub fn waker(&self) -> Waker {
        Waker(self.poller.clone())
    }

    /// Number of handles registered.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check whether no handles are registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Run one iteration of the reactor: deliver deferred callbacks, wait for i/o
    /// for at most `timeout`, then deliver readiness events and expired timers.
    ///
    /// Returns the number of events delivered.
    pub fn step<S: Service + ?Sized>(
        &mut self,
        service: &mut S,
        timeout: LocalDuration,
    ) -> io::Result<usize> {
        let deferred = self.deferred.drain(..).collect::<Vec<_>>();
        let now = LocalTime::now();
        let timeout = if deferred.is_empty() {
            self.timeouts
                .next(now)
                .map_or(timeout, |next| next.min(timeout))
        } else {
            LocalDuration::ZERO
        };

        trace!(
            "Polling {} source(s) and {} timeout(s), waking up in {}..",
            self.sources.len(),
            self.timeouts.len(),
            timeout
        );

        let mut events = std::mem::take(&mut self.events);
        events.clear();

        match self.poller.wait(&mut events, Some(timeout.into())) {
            Ok(n) => {
                trace!("Woke up with {} source(s) ready", n);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                self.events = events;
                return Err(err);
            }
        }
        let local_time = LocalTime::now();
        let mut ready = Vec::with_capacity(events.len());

        for ev in events.drain(..) {
            let key = Key(ev.key as u64);

            if let Some(source) = self.sources.get(&key) {
                if ev.readable && source.readable {
                    ready.push(Event::Readable(key));
                }
                if ev.writable && source.writable {
                    ready.push(Event::Writable(key));
                }
                // Registrations are one-shot; re-arm with the current interest.
                if let Err(err) = self.poller.modify(source.fd, source.interest(key)) {
                    error!("{}: Failed to re-arm interest: {}", key, err);
                }
            }
        }
        self.events = events;

        let mut woken = Vec::new();
        self.timeouts.wake(local_time, &mut woken);

        let count = deferred.len() + ready.len() + woken.len();
        let events = deferred
            .into_iter()
            .map(|(key, action)| Event::Deferred(key, action))
            .chain(ready)
            .chain(woken.into_iter().map(|(id, key)| Event::Timer(key, id)));

        for event in events {
            trace!("Event: {:?}", event);

            service.handle(self, event);
        }
        Ok(count)
    }

    /// Run the reactor until `done` returns `true`, or `limit` has passed.
    /// Returns whether `done` was satisfied.
    pub fn run_until<S, F>(
        &mut self,
        service: &mut S,
        limit: LocalDuration,
        mut done: F,
    ) -> io::Result<bool>
    where
        S: Service,
        F: FnMut(&S) -> bool,
    {
        let deadline = LocalTime::now() + limit;

        loop {
            if done(service) {
                return Ok(true);
            }
            let now = LocalTime::now();
            if now >= deadline {
                return Ok(false);
            }
            self.step(service, deadline - now)?;
        }
    }

    /// Run the given service with the reactor, until a shutdown is received.
    pub fn run<S: Service + ?Sized>(
        &mut self,
        service: &mut S,
        shutdown: chan::Receiver<()>,
    ) -> Result<(), Error> {
        info!("Running reactor with {} source(s)..", self.sources.len());

        loop {
            self.step(service, WAIT_TIMEOUT)?;

            // Exit reactor loop if a shutdown was received.
            match shutdown.try_recv() {
                Ok(()) | Err(chan::TryRecvError::Disconnected) => {
                    info!("Shutdown received");
                    return Ok(());
                }
                Err(chan::TryRecvError::Empty) => {}
            }
        }
    }

    fn update(&mut self, key: Key, fd: RawFd, f: impl FnOnce(&mut Source)) -> io::Result<()> {
        if let Some(source) = self.sources.get_mut(&key) {
            if source.fd == fd {
                f(source);

                let interest = source.interest(key);
                return match self.poller.modify(fd, interest) {
                    // Closed and reopened under the same number: the poller forgot it.
                    Err(err) if err.kind() == io::ErrorKind::NotFound => self.poller.add(fd, interest),
                    result => result,
                };
            }
            // A closed handle leaves the poller on its own, and its number may
            // already belong to someone else, so it is never deleted here.
            debug!("{}: Handle changed from {} to {}", key, source.fd, fd);
            self.sources.remove(&key);
        }
        let mut source = Source {
            fd,
            readable: false,
            writable: false,
        };
        f(&mut source);
        self.poller.add(fd, source.interest(key))?;
        self.sources.insert(key, source);

        Ok(())
    }

    fn unset(&mut self, key: Key, f: impl FnOnce(&mut Source)) {
        let Some(source) = self.sources.get_mut(&key) else {
            return;
        };
        f(source);

        let result = if source.readable || source.writable {
            self.poller.modify(source.fd, source.interest(key))
        } else {
            let fd = source.fd;
            self.sources.remove(&key);
            self.poller.delete(fd)
        };
        if let Err(err) = result {
            error!("{}: Failed to unregister interest: {}", key, err);
        }
    }
}

impl Scheduler for Reactor {
    fn add_input_callback(&mut self, fd: RawFd, key: Key) -> io::Result<()> {
        self.update(key, fd, |s| s.readable = true)
    }

    fn remove_input_callback(&mut self, key: Key) {
        self.unset(key, |s| s.readable = false)
    }

    fn add_output_callback(&mut self, fd: RawFd, key: Key) -> io::Result<()> {
        self.update(key, fd, |s| s.writable = true)
    }

    fn remove_output_callback(&mut self, key: Key) {
        self.unset(key, |s| s.writable = false)
    }

    fn add_timeout(&mut self, delay: LocalDuration, key: Key) -> TimerId {
        self.timeouts.register(key, LocalTime::now() + delay)
    }

    fn add_repeating_timeout(&mut self, period: LocalDuration, key: Key) -> TimerId {
        let period = period.max(MIN_PERIOD);

        self.timeouts
            .register_repeating(key, LocalTime::now() + period, period)
    }

    fn remove_timeout(&mut self, id: TimerId) {
        self.timeouts.remove(id);
    }

    fn add_callback(&mut self, key: Key, action: Deferred) {
        self.deferred.push_back((key, action));
    }

    fn local_time(&self) -> LocalTime {
        LocalTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl Service for Recorder {
        fn handle(&mut self, _scheduler: &mut dyn Scheduler, event: Event) {
            self.events.push(event);
        }
    }

    #[test]
    fn test_readable() {
        mockwire_test::logger::init(log::Level::Debug);

        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();
        let (a, mut b) = UnixStream::pair().unwrap();

        a.set_nonblocking(true).unwrap();
        reactor.add_input_callback(a.as_raw_fd(), Key(1)).unwrap();
        b.write_all(b"ping").unwrap();

        let ok = reactor
            .run_until(&mut rec, LocalDuration::from_secs(5), |r| !r.events.is_empty())
            .unwrap();

        assert!(ok);
        assert!(matches!(rec.events[0], Event::Readable(Key(1))));

        reactor.remove_input_callback(Key(1));
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_writable_and_merged_interest() {
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();
        let (a, _b) = UnixStream::pair().unwrap();

        reactor.add_input_callback(a.as_raw_fd(), Key(3)).unwrap();
        reactor.add_output_callback(a.as_raw_fd(), Key(3)).unwrap();
        assert_eq!(reactor.len(), 1);

        reactor.step(&mut rec, LocalDuration::from_secs(1)).unwrap();
        assert!(rec.events.iter().any(|e| matches!(e, Event::Writable(Key(3)))));
        assert!(!rec.events.iter().any(|e| matches!(e, Event::Readable(_))));

        reactor.remove_output_callback(Key(3));
        assert_eq!(reactor.len(), 1);
        reactor.remove_input_callback(Key(3));
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_replaced_handle() {
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();

        let (a, b) = UnixStream::pair().unwrap();
        reactor.add_input_callback(a.as_raw_fd(), Key(1)).unwrap();
        drop(a);
        drop(b);

        // Likely to get the numbers just released.
        let (c, mut d) = UnixStream::pair().unwrap();
        c.set_nonblocking(true).unwrap();
        reactor.add_input_callback(c.as_raw_fd(), Key(1)).unwrap();
        assert_eq!(reactor.len(), 1);

        d.write_all(b"ping").unwrap();
        let ok = reactor
            .run_until(&mut rec, LocalDuration::from_secs(5), |r| {
                r.events.iter().any(|e| matches!(e, Event::Readable(Key(1))))
            })
            .unwrap();
        assert!(ok);

        reactor.remove_input_callback(Key(1));
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_timers_and_deferred() {
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();

        let id = reactor.add_repeating_timeout(LocalDuration::from_millis(5), Key(9));
        reactor.add_timeout(LocalDuration::from_millis(1), Key(8));
        reactor.add_callback(Key(7), Deferred::InitialRead);

        let ok = reactor
            .run_until(&mut rec, LocalDuration::from_secs(5), |r| {
                r.events
                    .iter()
                    .filter(|e| matches!(e, Event::Timer(Key(9), _)))
                    .count()
                    >= 2
            })
            .unwrap();
        assert!(ok);
        assert!(matches!(rec.events[0], Event::Deferred(Key(7), Deferred::InitialRead)));
        assert!(rec.events.iter().any(|e| matches!(e, Event::Timer(Key(8), _))));

        reactor.remove_timeout(id);
        rec.events.clear();
        reactor.step(&mut rec, LocalDuration::from_millis(20)).unwrap();
        assert!(rec.events.is_empty());
    }
}
