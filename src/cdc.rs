//! Configuration clock domain crossing.
//!
//! Configuration is decided in the control domain (the HTTP server and the
//! acquisition scheduler) and consumed in the sample domain (the down
//! converter). Each parameter has a storage register owned by the control
//! domain and a one-bit commit toggle. Only the toggle bits cross the domain
//! boundary: the sample domain resynchronizes them with two registers, and an
//! edge on the second register is the commit pulse that samples the storage
//! register. The control domain must not modify a storage register while its
//! commit is in flight: the writer detects such commits, logs them and queues
//! them until the reader has acknowledged the previous one, so that a toggle
//! never cancels another one that has not been seen yet.
//!
//! All the toggle bits of a bus live in a single atomic word, so the sample
//! domain observes commits in the order in which they were issued.
//!
//! # Examples
//!
//! ```
//! use vvm_httpd::cdc::ConfigBus;
//!
//! let mut bus = ConfigBus::new();
//! let decimation = bus.latched("decimation", 13, 100u16);
//! let (mut writer, mut reader) = bus.split();
//! writer.commit(decimation, 250)?;
//! reader.tick();
//! assert_eq!(reader.get(decimation), 100);
//! reader.tick();
//! assert_eq!(reader.get(decimation), 250);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::Result;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Maximum number of parameters in a configuration bus.
pub const MAX_PARAMETERS: usize = 64;

/// Value that can be transported by the configuration bus.
///
/// Values are transported as raw register bits.
pub trait ConfigValue: Copy + std::fmt::Debug {
    /// Converts the value into register bits.
    fn to_bits(self) -> u64;
    /// Converts register bits into a value.
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_config_value {
    ($($ty:ty),*) => {
        $(
            impl ConfigValue for $ty {
                fn to_bits(self) -> u64 {
                    u64::from(self)
                }

                fn from_bits(bits: u64) -> $ty {
                    bits as $ty
                }
            }
        )*
    };
}

impl_config_value!(u8, u16, u32, u64);

impl ConfigValue for bool {
    fn to_bits(self) -> u64 {
        u64::from(self)
    }

    fn from_bits(bits: u64) -> bool {
        bits & 1 != 0
    }
}

/// Reader policy of a parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Policy {
    /// The reader holds the committed value until the next commit.
    Latched,
    /// The reader sees the committed value only during the cycle of the commit
    /// pulse, and the `off` value otherwise.
    Pulsed {
        /// Register bits seen by the reader outside of commit pulses.
        off: u64,
    },
}

/// Handle to a parameter of a configuration bus.
///
/// A handle is obtained when the parameter is declared with
/// [`ConfigBus::latched`] or [`ConfigBus::pulsed`], and it is used with the
/// [`ConfigWriter`] and [`ConfigReader`] of the same bus.
#[derive(Debug)]
pub struct Parameter<T> {
    id: u8,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Parameter<T> {
    fn clone(&self) -> Parameter<T> {
        *self
    }
}

impl<T> Copy for Parameter<T> {}

impl<T> Parameter<T> {
    fn index(&self) -> usize {
        usize::from(self.id)
    }

    fn mask(&self) -> u64 {
        1 << self.id
    }
}

#[derive(Debug)]
struct Slot {
    name: &'static str,
    width: u32,
    policy: Policy,
    reset: u64,
    storage: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    slots: Vec<Slot>,
    toggles: AtomicU64,
    acknowledged: AtomicU64,
}

fn fits(bits: u64, width: u32) -> bool {
    width >= 64 || bits >> width == 0
}

/// Configuration bus builder.
///
/// The parameters of the bus are declared with [`ConfigBus::latched`] and
/// [`ConfigBus::pulsed`]. Then the bus is split into its control domain side
/// and its sample domain side with [`ConfigBus::split`].
#[derive(Debug, Default)]
pub struct ConfigBus {
    slots: Vec<Slot>,
}

impl ConfigBus {
    /// Creates a bus without parameters.
    pub fn new() -> ConfigBus {
        ConfigBus::default()
    }

    /// Declares a latched parameter.
    ///
    /// The reader sees `reset` until the first commit.
    ///
    /// # Panics
    ///
    /// Panics if the bus already has [`MAX_PARAMETERS`] parameters, if `width`
    /// is not between 1 and 64, or if `reset` does not fit in `width` bits.
    pub fn latched<T: ConfigValue>(
        &mut self,
        name: &'static str,
        width: u32,
        reset: T,
    ) -> Parameter<T> {
        self.declare(name, width, Policy::Latched, reset.to_bits())
    }

    /// Declares a pulsed parameter.
    ///
    /// The reader sees `off` except during the cycle of each commit pulse.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`ConfigBus::latched`].
    pub fn pulsed<T: ConfigValue>(
        &mut self,
        name: &'static str,
        width: u32,
        off: T,
    ) -> Parameter<T> {
        let off = off.to_bits();
        self.declare(name, width, Policy::Pulsed { off }, off)
    }

    fn declare<T>(
        &mut self,
        name: &'static str,
        width: u32,
        policy: Policy,
        reset: u64,
    ) -> Parameter<T> {
        assert!(self.slots.len() < MAX_PARAMETERS, "too many parameters");
        assert!((1..=64).contains(&width), "invalid width for {name}");
        assert!(fits(reset, width), "reset value of {name} too wide");
        let id = self.slots.len() as u8;
        self.slots.push(Slot {
            name,
            width,
            policy,
            reset,
            storage: AtomicU64::new(reset),
        });
        Parameter {
            id,
            _value: PhantomData,
        }
    }

    /// Splits the bus into its writer and reader sides.
    pub fn split(self) -> (ConfigWriter, ConfigReader) {
        let held = self.slots.iter().map(|slot| slot.reset).collect();
        let shared = Arc::new(Shared {
            slots: self.slots,
            toggles: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
        });
        let writer = ConfigWriter {
            shared: Arc::clone(&shared),
            queue: VecDeque::new(),
            violations: 0,
        };
        let reader = ConfigReader {
            shared,
            sync: [0; 2],
            pulses: 0,
            held,
        };
        (writer, reader)
    }
}

/// Control domain side of a configuration bus.
///
/// Commits are applied in the order in which they are issued. A commit that
/// cannot be applied yet because its parameter still has a commit in flight is
/// queued, and so are all the commits issued after it. Queued commits are
/// applied by later calls to [`ConfigWriter::commit`] or
/// [`ConfigWriter::flush`].
#[derive(Debug)]
pub struct ConfigWriter {
    shared: Arc<Shared>,
    // commits waiting to be applied, as (parameter id, register bits)
    queue: VecDeque<(u8, u64)>,
    violations: u64,
}

impl ConfigWriter {
    /// Writes a value into the storage register of a parameter and commits it.
    ///
    /// Values that do not fit in the parameter width are rejected and leave
    /// the storage register unchanged. Committing while a previous commit of
    /// the same parameter is still in flight is a protocol violation, which is
    /// logged and counted. The commit is then deferred until the reader
    /// acknowledges the previous one, so the reader sees both values in order.
    pub fn commit<T: ConfigValue>(&mut self, parameter: Parameter<T>, value: T) -> Result<()> {
        let slot = &self.shared.slots[parameter.index()];
        let bits = value.to_bits();
        if !fits(bits, slot.width) {
            anyhow::bail!(
                "value {value:?} does not fit in the {} bits of {}",
                slot.width,
                slot.name
            );
        }
        if self.in_flight(parameter) {
            self.violations += 1;
            tracing::warn!(
                parameter = slot.name,
                ?value,
                "parameter modified while a commit is in flight; deferring commit"
            );
        }
        self.queue.push_back((parameter.id, bits));
        self.flush();
        Ok(())
    }

    /// Applies the queued commits that can be applied.
    ///
    /// Commits are applied in order until one of them finds its parameter
    /// still in flight. Returns the number of commits that remain queued.
    pub fn flush(&mut self) -> usize {
        while let Some(&(id, bits)) = self.queue.front() {
            let mask = 1u64 << id;
            if self.unacknowledged() & mask != 0 {
                break;
            }
            let slot = &self.shared.slots[usize::from(id)];
            slot.storage.store(bits, Ordering::Relaxed);
            self.shared.toggles.fetch_xor(mask, Ordering::Release);
            tracing::trace!(parameter = slot.name, bits, "commit");
            self.queue.pop_front();
        }
        self.queue.len()
    }

    // toggles that the reader has not acknowledged yet
    fn unacknowledged(&self) -> u64 {
        let toggles = self.shared.toggles.load(Ordering::Relaxed);
        let acknowledged = self.shared.acknowledged.load(Ordering::Acquire);
        toggles ^ acknowledged
    }

    /// Returns `true` if a commit of the parameter is queued or has not been
    /// acknowledged by the reader yet.
    pub fn in_flight<T>(&self, parameter: Parameter<T>) -> bool {
        self.unacknowledged() & parameter.mask() != 0
            || self.queue.iter().any(|&(id, _)| id == parameter.id)
    }

    /// Returns the number of queued commits.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Reads back the last value committed to a parameter.
    ///
    /// This includes queued commits that have not reached the storage
    /// register yet.
    pub fn read<T: ConfigValue>(&self, parameter: Parameter<T>) -> T {
        let queued = self
            .queue
            .iter()
            .rev()
            .find(|&&(id, _)| id == parameter.id)
            .map(|&(_, bits)| bits);
        T::from_bits(queued.unwrap_or_else(|| {
            self.shared.slots[parameter.index()]
                .storage
                .load(Ordering::Relaxed)
        }))
    }

    /// Returns the name of a parameter.
    pub fn name<T>(&self, parameter: Parameter<T>) -> &'static str {
        self.shared.slots[parameter.index()].name
    }

    /// Returns the number of protocol violations detected so far.
    pub fn protocol_violations(&self) -> u64 {
        self.violations
    }
}

/// Sample domain side of a configuration bus.
///
/// The reader is clocked by calling [`ConfigReader::tick`] once per sample
/// domain cycle. A commit becomes visible two ticks after it is issued.
#[derive(Debug)]
pub struct ConfigReader {
    shared: Arc<Shared>,
    // two-register synchronizer of the commit toggles
    sync: [u64; 2],
    // commit pulses of the current cycle
    pulses: u64,
    held: Vec<u64>,
}

impl ConfigReader {
    /// Advances the reader by one sample domain cycle.
    ///
    /// Returns the commit pulses of this cycle as a bit mask indexed by
    /// parameter.
    pub fn tick(&mut self) -> u64 {
        let raw = self.shared.toggles.load(Ordering::Acquire);
        let previous = self.sync[1];
        self.sync[1] = self.sync[0];
        self.sync[0] = raw;
        self.pulses = self.sync[1] ^ previous;
        if self.pulses != 0 {
            let mut pending = self.pulses;
            while pending != 0 {
                let index = pending.trailing_zeros() as usize;
                pending &= pending - 1;
                self.held[index] = self.shared.slots[index].storage.load(Ordering::Relaxed);
            }
            self.shared
                .acknowledged
                .store(self.sync[1], Ordering::Release);
        }
        self.pulses
    }

    /// Returns `true` if the parameter had a commit pulse in this cycle.
    pub fn committed<T>(&self, parameter: Parameter<T>) -> bool {
        self.pulses & parameter.mask() != 0
    }

    /// Returns the value of a parameter as seen by the sample domain in this
    /// cycle.
    pub fn get<T: ConfigValue>(&self, parameter: Parameter<T>) -> T {
        let index = parameter.index();
        let bits = match self.shared.slots[index].policy {
            Policy::Latched => self.held[index],
            Policy::Pulsed { off } => {
                if self.committed(parameter) {
                    self.held[index]
                } else {
                    off
                }
            }
        };
        T::from_bits(bits)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn latched_latency() {
        let mut bus = ConfigBus::new();
        let ftw = bus.latched("ftw", 32, 0u32);
        let (mut writer, mut reader) = bus.split();
        reader.tick();
        assert_eq!(reader.get(ftw), 0);
        writer.commit(ftw, 0xdead_beef).unwrap();
        assert!(writer.in_flight(ftw));
        assert_eq!(reader.tick(), 0);
        assert_eq!(reader.get(ftw), 0);
        assert_eq!(reader.tick(), 1);
        assert!(reader.committed(ftw));
        assert_eq!(reader.get(ftw), 0xdead_beef);
        assert!(!writer.in_flight(ftw));
        // held until the next commit
        for _ in 0..10 {
            reader.tick();
            assert!(!reader.committed(ftw));
            assert_eq!(reader.get(ftw), 0xdead_beef);
        }
    }

    #[test]
    fn pulsed_single_cycle() {
        let mut bus = ConfigBus::new();
        let reset = bus.pulsed("phase_reset", 1, false);
        let (mut writer, mut reader) = bus.split();
        writer.commit(reset, true).unwrap();
        let seen = (0..8)
            .map(|_| {
                reader.tick();
                reader.get(reset)
            })
            .collect::<Vec<bool>>();
        assert_eq!(seen, [false, true, false, false, false, false, false, false]);
        // each commit gives one pulse, even with the same value
        writer.commit(reset, true).unwrap();
        let pulses = (0..8)
            .filter(|_| {
                reader.tick();
                reader.get(reset)
            })
            .count();
        assert_eq!(pulses, 1);
    }

    #[test]
    fn latched_before_pulse() {
        let mut bus = ConfigBus::new();
        let ftw = bus.latched("ftw", 32, 1u32);
        let reset = bus.pulsed("phase_reset", 1, false);
        let (mut writer, mut reader) = bus.split();
        writer.commit(ftw, 1234).unwrap();
        reader.tick();
        writer.commit(reset, true).unwrap();
        for _ in 0..4 {
            reader.tick();
            if reader.get(reset) {
                assert_eq!(reader.get(ftw), 1234);
                return;
            }
        }
        panic!("phase reset pulse not seen");
    }

    #[test]
    fn too_wide() {
        let mut bus = ConfigBus::new();
        let decimation = bus.latched("decimation", 13, 100u16);
        let (mut writer, mut reader) = bus.split();
        assert!(writer.commit(decimation, 9000).is_err());
        assert!(!writer.in_flight(decimation));
        assert_eq!(writer.read(decimation), 100);
        writer.commit(decimation, 8191).unwrap();
        reader.tick();
        reader.tick();
        assert_eq!(reader.get(decimation), 8191);
    }

    #[test]
    fn violation_counted() {
        let mut bus = ConfigBus::new();
        let shift = bus.latched("shift", 4, 0u8);
        let (mut writer, mut reader) = bus.split();
        writer.commit(shift, 1).unwrap();
        writer.commit(shift, 2).unwrap();
        assert_eq!(writer.protocol_violations(), 1);
        assert_eq!(writer.queued(), 1);
        assert_eq!(writer.read(shift), 2);
        reader.tick();
        reader.tick();
        assert_eq!(reader.get(shift), 1);
        assert_eq!(writer.flush(), 0);
        reader.tick();
        reader.tick();
        assert_eq!(reader.get(shift), 2);
        writer.commit(shift, 3).unwrap();
        assert_eq!(writer.protocol_violations(), 1);
        assert_eq!(writer.name(shift), "shift");
    }

    // Runs the reader, flushing the writer between ticks, and returns the
    // values seen after each commit pulse of `parameter`.
    fn drain<T: ConfigValue>(
        writer: &mut ConfigWriter,
        reader: &mut ConfigReader,
        parameter: Parameter<T>,
    ) -> Vec<T> {
        let mut seen = Vec::new();
        for _ in 0..32 {
            writer.flush();
            reader.tick();
            if reader.committed(parameter) {
                seen.push(reader.get(parameter));
            }
        }
        seen
    }

    #[test]
    fn back_to_back_commits() {
        let mut bus = ConfigBus::new();
        let ftw = bus.latched("ftw", 32, 0u32);
        let reset = bus.pulsed("phase_reset", 1, false);
        let (mut writer, mut reader) = bus.split();
        writer.commit(ftw, 10).unwrap();
        reader.tick();
        // two updates with no reader cycle in between must not cancel out
        writer.commit(ftw, 30).unwrap();
        writer.commit(ftw, 20).unwrap();
        assert_eq!(drain(&mut writer, &mut reader, ftw), [10, 30, 20]);
        assert_eq!(reader.get(ftw), 20);
        assert!(!writer.in_flight(ftw));

        writer.commit(reset, true).unwrap();
        writer.commit(reset, true).unwrap();
        assert_eq!(drain(&mut writer, &mut reader, reset), [true, true]);
        assert!(!reader.get(reset));
    }

    #[test]
    fn queued_commits_keep_order() {
        let mut bus = ConfigBus::new();
        let ftw = bus.latched("ftw", 32, 0u32);
        let reset = bus.pulsed("phase_reset", 1, false);
        let (mut writer, mut reader) = bus.split();
        writer.commit(ftw, 1).unwrap();
        writer.commit(ftw, 2).unwrap();
        // the phase reset waits behind the queued tuning word
        writer.commit(reset, true).unwrap();
        assert_eq!(writer.queued(), 2);
        assert!(writer.in_flight(reset));
        let mut pulses = 0;
        for _ in 0..32 {
            writer.flush();
            reader.tick();
            if reader.get(reset) {
                assert_eq!(reader.get(ftw), 2);
                pulses += 1;
            }
        }
        assert_eq!(pulses, 1);
    }

    #[test]
    fn tear_free_across_threads() {
        const COMMITS: u64 = 200;
        let mut bus = ConfigBus::new();
        let word = bus.latched("word", 64, 0u64);
        let (mut writer, mut reader) = bus.split();
        let done = AtomicBool::new(false);
        let pattern = |n: u64| n * 0x0101_0101_0101_0101;
        let observed = std::thread::scope(|s| {
            let done = &done;
            s.spawn(move || {
                for n in 1..=COMMITS {
                    while writer.in_flight(word) {
                        std::hint::spin_loop();
                    }
                    writer.commit(word, pattern(n)).unwrap();
                }
                while writer.in_flight(word) {
                    std::hint::spin_loop();
                }
                assert_eq!(writer.protocol_violations(), 0);
                done.store(true, Ordering::Release);
            });
            let reader = s.spawn(move || {
                let mut observed = vec![0];
                loop {
                    let finished = done.load(Ordering::Acquire);
                    reader.tick();
                    let value = reader.get(word);
                    if observed.last() != Some(&value) {
                        observed.push(value);
                    }
                    if finished {
                        return observed;
                    }
                }
            });
            reader.join().unwrap()
        });
        let committed = (0..=COMMITS).map(pattern).collect::<HashSet<u64>>();
        assert!(observed.iter().all(|value| committed.contains(value)));
        assert!(observed.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*observed.last().unwrap(), pattern(COMMITS));
    }
}
