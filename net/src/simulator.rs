//! A deterministic scheduler. Acts as the _reactor_, but without waiting on any I/O.
//!
//! Time only moves when the simulation is told to, and readiness is only reported
//! when asked for. This makes it possible to drive components step by step and
//! observe exactly which registrations they hold at each point.
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::os::unix::io::RawFd;

use log::*;

use crate::time::{LocalDuration, LocalTime, TimeoutManager};
use crate::{Deferred, Event, Key, Scheduler, Service, TimerId};

#[cfg(feature = "quickcheck")]
pub mod arbitrary;

/// Smallest period a repeating timer can have.
pub const MIN_PERIOD: LocalDuration = LocalDuration::from_millis(1);

/// Simulation options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Seed for the simulation RNG.
    pub seed: u64,
    /// Whether readiness events are delivered in random order. There is no
    /// ordering guarantee across handles, so components must cope with any order.
    pub shuffle: bool,
}

/// Registration counters for a single key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registrations {
    /// Number of times input notifications were requested.
    pub input_added: usize,
    /// Number of times input notifications were removed while registered.
    pub input_removed: usize,
    /// Number of times output notifications were requested.
    pub output_added: usize,
    /// Number of times output notifications were removed while registered.
    pub output_removed: usize,
}

/// A deterministic scheduler simulation.
#[derive(Debug)]
pub struct Simulator {
    /// Current simulation time.
    time: LocalTime,
    /// Keys registered for input notifications.
    inputs: BTreeMap<Key, RawFd>,
    /// Keys registered for output notifications.
    outputs: BTreeMap<Key, RawFd>,
    /// Handles for which output registration fails.
    unusable: BTreeSet<RawFd>,
    /// Pending timers.
    timeouts: TimeoutManager<Key>,
    /// Deferred callbacks, in the order they were scheduled.
    deferred: VecDeque<(Key, Deferred)>,
    /// Registration counters.
    stats: BTreeMap<Key, Registrations>,
    /// Simulation options.
    opts: Options,
    /// RNG.
    rng: fastrand::Rng,
}

impl Simulator {
    /// Create a new simulation, starting at the given time.
    pub fn new(time: LocalTime, opts: Options) -> Self {
        let rng = fastrand::Rng::with_seed(opts.seed);

        Self {
            time,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            unusable: BTreeSet::new(),
            timeouts: TimeoutManager::new(),
            deferred: VecDeque::new(),
            stats: BTreeMap::new(),
            opts,
            rng,
        }
    }

    /// Current simulation time.
    pub fn time(&self) -> LocalTime {
        self.time
    }

    /// Move the clock forward. No events are delivered.
    pub fn elapse(&mut self, duration: LocalDuration) {
        self.time.elapse(duration);
    }

    /// Make output registration fail for the given handle, as if the peer had
    /// already closed it.
    pub fn fail_output(&mut self, fd: RawFd) {
        self.unusable.insert(fd);
    }

    /// Check whether input notifications are registered for `key`.
    pub fn is_reading(&self, key: Key) -> bool {
        self.inputs.contains_key(&key)
    }

    /// Check whether output notifications are registered for `key`.
    pub fn is_writing(&self, key: Key) -> bool {
        self.outputs.contains_key(&key)
    }

    /// Number of timers pending for `key`.
    pub fn timers(&self, key: Key) -> usize {
        self.timeouts.count(&key)
    }

    /// Number of deferred callbacks waiting for the next iteration.
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    /// Registration counters for `key`.
    pub fn registrations(&self, key: Key) -> Registrations {
        self.stats.get(&key).copied().unwrap_or_default()
    }

    /// Collect the events of one iteration at the current time: deferred callbacks
    /// scheduled so far, followed by expired timers.
    pub fn events(&mut self, events: &mut Vec<Event>) {
        let mut woken = Vec::new();

        events.extend(
            self.deferred
                .drain(..)
                .map(|(key, action)| Event::Deferred(key, action)),
        );
        self.timeouts.wake(self.time, &mut woken);
        events.extend(woken.into_iter().map(|(id, key)| Event::Timer(key, id)));
    }

    /// Report every registered interest as ready.
    pub fn ready(&mut self, events: &mut Vec<Event>) {
        let start = events.len();

        events.extend(self.inputs.keys().map(|k| Event::Readable(*k)));
        events.extend(self.outputs.keys().map(|k| Event::Writable(*k)));

        if self.opts.shuffle {
            self.rng.shuffle(&mut events[start..]);
        }
    }

    /// Deliver an event to the service.
    pub fn deliver<S: Service + ?Sized>(&mut self, service: &mut S, event: Event) {
        trace!(target: "sim", "{}: Delivering {:?}", self.time, event);

        service.handle(self, event);
    }

    /// Deliver all deferred callbacks and timers up to and including `until`,
    /// moving the clock from timer to timer.
    pub fn run_until<S: Service + ?Sized>(&mut self, service: &mut S, until: LocalTime) {
        let mut events = Vec::new();

        loop {
            self.events(&mut events);

            if events.is_empty() {
                match self.timeouts.next(self.time) {
                    Some(wait) if self.time + wait <= until => {
                        self.time = self.time + wait;
                        continue;
                    }
                    _ => {
                        self.time = self.time.max(until);
                        break;
                    }
                }
            }
            for event in events.drain(..) {
                self.deliver(service, event);
            }
        }
    }

    /// Like [`Simulator::run_until`], relative to the current time.
    pub fn run_for<S: Service + ?Sized>(&mut self, service: &mut S, duration: LocalDuration) {
        let until = self.time + duration;

        self.run_until(service, until)
    }

    fn stats(&mut self, key: Key) -> &mut Registrations {
        self.stats.entry(key).or_default()
    }
}

impl Scheduler for Simulator {
    fn add_input_callback(&mut self, fd: RawFd, key: Key) -> io::Result<()> {
        self.inputs.insert(key, fd);
        self.stats(key).input_added += 1;

        Ok(())
    }

    fn remove_input_callback(&mut self, key: Key) {
        if self.inputs.remove(&key).is_some() {
            self.stats(key).input_removed += 1;
        }
    }

    fn add_output_callback(&mut self, fd: RawFd, key: Key) -> io::Result<()> {
        if self.unusable.contains(&fd) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        self.outputs.insert(key, fd);
        self.stats(key).output_added += 1;

        Ok(())
    }

    fn remove_output_callback(&mut self, key: Key) {
        if self.outputs.remove(&key).is_some() {
            self.stats(key).output_removed += 1;
        }
    }

    fn add_timeout(&mut self, delay: LocalDuration, key: Key) -> TimerId {
        self.timeouts.register(key, self.time + delay)
    }

    fn add_repeating_timeout(&mut self, period: LocalDuration, key: Key) -> TimerId {
        let period = period.max(MIN_PERIOD);

        self.timeouts
            .register_repeating(key, self.time + period, period)
    }

    fn remove_timeout(&mut self, id: TimerId) {
        self.timeouts.remove(id);
    }

    fn add_callback(&mut self, key: Key, action: Deferred) {
        self.deferred.push_back((key, action));
    }

    fn local_time(&self) -> LocalTime {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<(LocalTime, Event)>,
        rearm: bool,
    }

    impl Service for Recorder {
        fn handle(&mut self, scheduler: &mut dyn Scheduler, event: Event) {
            if self.rearm {
                if let Event::Deferred(key, _) = event {
                    scheduler.add_callback(key, Deferred::Close);
                    self.rearm = false;
                }
            }
            self.events.push((scheduler.local_time(), event));
        }
    }

    #[test]
    fn test_timers_ring_in_order() {
        let start = LocalTime::from_secs(100);
        let mut sim = Simulator::new(start, Options::default());
        let mut rec = Recorder::default();

        sim.add_timeout(LocalDuration::from_millis(20), Key(2));
        sim.add_timeout(LocalDuration::from_millis(10), Key(1));
        sim.run_for(&mut rec, LocalDuration::from_secs(1));

        let keys = rec.events.iter().map(|(_, e)| e.key()).collect::<Vec<_>>();
        assert_eq!(keys, vec![Key(1), Key(2)]);
        assert_eq!(rec.events[0].0, start + LocalDuration::from_millis(10));
        assert_eq!(sim.time(), start + LocalDuration::from_secs(1));
    }

    #[test]
    fn test_repeating_timer_until_removed() {
        let mut sim = Simulator::new(LocalTime::from_secs(1), Options::default());
        let mut rec = Recorder::default();

        let id = sim.add_repeating_timeout(LocalDuration::from_millis(100), Key(7));
        sim.run_for(&mut rec, LocalDuration::from_millis(350));
        assert_eq!(rec.events.len(), 3);
        assert_eq!(sim.timers(Key(7)), 1);

        sim.remove_timeout(id);
        sim.run_for(&mut rec, LocalDuration::from_secs(1));
        assert_eq!(rec.events.len(), 3);
        assert_eq!(sim.timers(Key(7)), 0);
    }

    #[test]
    fn test_deferred_runs_on_next_iteration() {
        let mut sim = Simulator::new(LocalTime::from_secs(1), Options::default());
        let mut rec = Recorder {
            rearm: true,
            ..Recorder::default()
        };
        let mut events = Vec::new();

        sim.add_callback(Key(1), Deferred::InitialRead);
        sim.events(&mut events);
        assert_eq!(events.len(), 1);

        for e in events.drain(..) {
            sim.deliver(&mut rec, e);
        }
        // Scheduled during delivery, so not part of the previous iteration.
        assert_eq!(sim.pending(), 1);

        sim.events(&mut events);
        assert!(matches!(events[..], [Event::Deferred(Key(1), Deferred::Close)]));
    }

    #[test]
    fn test_registrations() {
        let mut sim = Simulator::new(LocalTime::default(), Options::default());

        sim.add_output_callback(3, Key(1)).unwrap();
        sim.remove_output_callback(Key(1));
        sim.remove_output_callback(Key(1));
        sim.fail_output(4);

        assert!(sim.add_output_callback(4, Key(2)).is_err());
        assert!(!sim.is_writing(Key(1)));
        assert_eq!(
            sim.registrations(Key(1)),
            Registrations {
                output_added: 1,
                output_removed: 1,
                ..Registrations::default()
            }
        );
    }
}
