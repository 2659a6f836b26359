//! Pair-code admission and rotation.
//!
//! A receiver may require a 6-digit shared secret before accepting a header.
//! Two rotation policies exist and compose: per-transfer (a fresh code after
//! every successful ack, returned to the sender so a batch can chain) and TTL
//! (a periodic rotation that keeps the old code valid for one further window).
//!
//! All receiver sessions share one `Pairing` instance. Mutation is serialized
//! through a mutex with short critical sections; no await happens while it is
//! held. The in-flight counter is incremented before the admission check and
//! decremented by a drop guard, so a TTL tick can never invalidate a session
//! that already passed admission.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::constants::PAIR_CODE_REGEN_ATTEMPTS;
use crate::error::{Error, Result};

/// Produces fresh 6-digit decimal codes.
pub type PairCodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Observes every rotation; receives the new current code.
pub type PairCodeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// The default generator: uniform 6-digit decimal strings.
pub fn default_generator() -> PairCodeGenerator {
    Arc::new(|| format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32)))
}

/// Pairing configuration for a receiver.
#[derive(Default, Clone)]
pub struct PairingConfig {
    /// Initial code; `None` admits every header.
    pub code: Option<String>,
    /// Rotate after each successful ack and chain via `next_pair_code`.
    pub rotate_per_transfer: bool,
    /// Rotate on this period while the receiver is idle.
    pub ttl: Option<Duration>,
    /// Code generator; required when either rotation policy is on.
    pub generator: Option<PairCodeGenerator>,
    /// Rotation observer.
    pub on_change: Option<PairCodeListener>,
}

#[derive(Debug)]
struct State {
    current: Option<String>,
    previous: Option<String>,
    previous_valid_until: Option<Instant>,
    active_transfers: u32,
}

/// Shared pairing state for one receiver.
pub struct Pairing {
    state: Mutex<State>,
    generator: Option<PairCodeGenerator>,
    on_change: Option<PairCodeListener>,
    rotate_per_transfer: bool,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for Pairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pairing")
            .field("rotate_per_transfer", &self.rotate_per_transfer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Pairing {
    /// Build shared pairing state from configuration.
    pub fn new(config: PairingConfig) -> Result<Arc<Self>> {
        if (config.rotate_per_transfer || config.ttl.is_some()) && config.generator.is_none() {
            return Err(Error::config(
                "pair code rotation requires a code generator",
            ));
        }
        if let Some(ttl) = config.ttl {
            if ttl.is_zero() {
                return Err(Error::config("pair code TTL must be positive"));
            }
        }

        Ok(Arc::new(Self {
            state: Mutex::new(State {
                current: config.code,
                previous: None,
                previous_valid_until: None,
                active_transfers: 0,
            }),
            generator: config.generator,
            on_change: config.on_change,
            rotate_per_transfer: config.rotate_per_transfer,
            ttl: config.ttl,
        }))
    }

    /// The TTL period, when TTL rotation is configured.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// The current code, for display at startup.
    pub fn current_code(&self) -> Option<String> {
        self.state.lock().expect("pairing lock").current.clone()
    }

    /// Mark a session in flight. Must be called before [`Pairing::admit`];
    /// dropping the guard releases the slot.
    pub fn begin_transfer(self: &Arc<Self>) -> TransferGuard {
        let mut state = self.state.lock().expect("pairing lock");
        state.active_transfers += 1;
        TransferGuard {
            pairing: Arc::clone(self),
        }
    }

    /// Check an offered code against the current code, or the previous code
    /// while its grace window is open.
    pub fn admit(&self, offered: Option<&str>) -> bool {
        let state = self.state.lock().expect("pairing lock");
        let Some(current) = state.current.as_deref() else {
            return true;
        };
        let Some(offered) = offered else {
            return false;
        };
        if offered == current {
            return true;
        }
        match (&state.previous, state.previous_valid_until) {
            (Some(previous), Some(valid_until)) => {
                offered == previous && Instant::now() <= valid_until
            }
            _ => false,
        }
    }

    /// Per-transfer rotation, run after a successful ack.
    ///
    /// Returns the new current code to embed in the ack. Clears the previous
    /// code: a chained batch holds the fresh code, and a stale one has no
    /// grace claim.
    pub fn rotate_after_ack(&self) -> Option<String> {
        if !self.rotate_per_transfer {
            return None;
        }
        let next = {
            let mut state = self.state.lock().expect("pairing lock");
            let next = self.generate_distinct(state.current.as_deref())?;
            state.current = Some(next.clone());
            state.previous = None;
            state.previous_valid_until = None;
            next
        };
        debug!("pair code rotated after transfer");
        self.notify(&next);
        Some(next)
    }

    /// TTL rotation tick.
    ///
    /// Skipped silently while transfers are in flight, so a sender holding the
    /// pre-rotation code still completes. Returns the new current code when a
    /// rotation happened.
    pub fn ttl_tick(&self) -> Option<String> {
        let ttl = self.ttl?;
        let next = {
            let mut state = self.state.lock().expect("pairing lock");
            if state.active_transfers > 0 || state.current.is_none() {
                return None;
            }
            let next = self.generate_distinct(state.current.as_deref())?;
            state.previous = state.current.replace(next.clone());
            state.previous_valid_until = Some(Instant::now() + ttl);
            next
        };
        info!("pair code rotated on TTL");
        self.notify(&next);
        Some(next)
    }

    /// Code to hand back in an ack when no per-transfer rotation happened.
    ///
    /// A session admitted under the previous (grace) code returns the current
    /// code so the sender resynchronizes for its next entry.
    pub fn chain_code_for(&self, offered: Option<&str>) -> Option<String> {
        let state = self.state.lock().expect("pairing lock");
        match state.current.as_deref() {
            Some(current) if offered != Some(current) => Some(current.to_string()),
            _ => None,
        }
    }

    fn generate_distinct(&self, current: Option<&str>) -> Option<String> {
        let generator = self.generator.as_ref()?;
        let mut code = generator();
        for _ in 0..PAIR_CODE_REGEN_ATTEMPTS {
            if Some(code.as_str()) != current {
                break;
            }
            code = generator();
        }
        Some(code)
    }

    fn notify(&self, code: &str) {
        if let Some(listener) = &self.on_change {
            listener(code);
        }
    }

    fn end_transfer(&self) {
        let mut state = self.state.lock().expect("pairing lock");
        state.active_transfers = state.active_transfers.saturating_sub(1);
    }
}

/// Holds one in-flight slot; dropping it releases the slot even on failure
/// paths.
pub struct TransferGuard {
    pairing: Arc<Pairing>,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.pairing.end_transfer();
    }
}
