//! Debugger kernel: breakpoint and watchpoint tables, step modes.
//!
//! Breakpoints key on address and may carry a condition expression that
//! is evaluated when the address is hit; a false condition lets execution
//! continue silently. Watchpoints fire on matching memory or register
//! accesses, checked from the per-step access log immediately after the
//! instruction that made them. Step-over and step-out arm a transient
//! breakpoint that is consumed on its first hit.

use crate::memory::Access;
use cpu_arm2::AccessKind;
use std::collections::BTreeMap;

/// One breakpoint record.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub address: u32,
    pub enabled: bool,
    /// Expression evaluated at hit time; fires only when truthy.
    pub condition: Option<String>,
    pub hit_count: u64,
}

/// What a watchpoint watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    Address(u32),
    Register(u8),
}

/// Access kinds a watchpoint fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Read,
    Write,
    ReadWrite,
}

impl WatchKind {
    fn matches(self, is_write: bool) -> bool {
        match self {
            Self::Read => !is_write,
            Self::Write => is_write,
            Self::ReadWrite => true,
        }
    }
}

/// One watchpoint record.
#[derive(Debug, Clone)]
pub struct Watchpoint {
    pub id: u32,
    pub target: WatchTarget,
    pub kind: WatchKind,
    pub enabled: bool,
}

/// A fired watchpoint, reported after the triggering instruction.
#[derive(Debug, Clone, Copy)]
pub struct WatchHit {
    pub id: u32,
    pub target: WatchTarget,
    pub is_write: bool,
}

/// Breakpoint/watchpoint tables and transient step state.
#[derive(Debug, Default)]
pub struct Debugger {
    breakpoints: BTreeMap<u32, Breakpoint>,
    watchpoints: BTreeMap<u32, Watchpoint>,
    next_watch_id: u32,
    /// Step-over / step-out target; consumed on first hit.
    transient: Option<u32>,
}

impl Debugger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget transient state but keep user breakpoints (program reset).
    pub fn clear_transient(&mut self) {
        self.transient = None;
    }

    /// Remove everything (session close / fresh load).
    pub fn clear(&mut self) {
        self.breakpoints.clear();
        self.watchpoints.clear();
        self.transient = None;
        self.next_watch_id = 0;
    }

    // === Breakpoints ===

    pub fn add_breakpoint(&mut self, address: u32, condition: Option<String>) {
        self.breakpoints
            .entry(address)
            .and_modify(|bp| {
                bp.enabled = true;
                bp.condition.clone_from(&condition);
            })
            .or_insert(Breakpoint {
                address,
                enabled: true,
                condition,
                hit_count: 0,
            });
    }

    pub fn remove_breakpoint(&mut self, address: u32) -> bool {
        self.breakpoints.remove(&address).is_some()
    }

    pub fn set_breakpoint_enabled(&mut self, address: u32, enabled: bool) -> bool {
        match self.breakpoints.get_mut(&address) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// The enabled breakpoint at `pc`, if any (condition not yet checked).
    #[must_use]
    pub fn breakpoint_at(&self, pc: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&pc).filter(|bp| bp.enabled)
    }

    /// Record a hit at `pc` and return the condition to evaluate, if set.
    pub fn record_hit(&mut self, pc: u32) -> Option<String> {
        let bp = self.breakpoints.get_mut(&pc)?;
        bp.hit_count += 1;
        bp.condition.clone()
    }

    // === Transient breakpoints (step over / step out) ===

    /// Arm a transient stop at `address`.
    pub fn arm_transient(&mut self, address: u32) {
        self.transient = Some(address);
    }

    /// True (and consumed) when `pc` is the armed transient target.
    pub fn take_transient(&mut self, pc: u32) -> bool {
        if self.transient == Some(pc) {
            self.transient = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn has_transient(&self) -> bool {
        self.transient.is_some()
    }

    // === Watchpoints ===

    pub fn add_watchpoint(&mut self, target: WatchTarget, kind: WatchKind) -> u32 {
        self.next_watch_id += 1;
        let id = self.next_watch_id;
        self.watchpoints.insert(
            id,
            Watchpoint {
                id,
                target,
                kind,
                enabled: true,
            },
        );
        id
    }

    pub fn remove_watchpoint(&mut self, id: u32) -> bool {
        self.watchpoints.remove(&id).is_some()
    }

    #[must_use]
    pub fn watchpoints(&self) -> impl Iterator<Item = &Watchpoint> {
        self.watchpoints.values()
    }

    /// Check the step's accesses against the watchpoint table. The first
    /// match wins; execution suspends immediately after the access.
    #[must_use]
    pub fn check_watchpoints(
        &self,
        accesses: &[Access],
        regs_read: u16,
        regs_written: u16,
    ) -> Option<WatchHit> {
        for wp in self.watchpoints.values().filter(|w| w.enabled) {
            match wp.target {
                WatchTarget::Address(addr) => {
                    for access in accesses {
                        let lo = access.addr;
                        let hi = access.addr + u32::from(access.size);
                        let is_write = access.kind == AccessKind::Write;
                        if addr >= lo && addr < hi && wp.kind.matches(is_write) {
                            return Some(WatchHit {
                                id: wp.id,
                                target: wp.target,
                                is_write,
                            });
                        }
                    }
                }
                WatchTarget::Register(r) => {
                    let bit = 1u16 << (r & 15);
                    if regs_written & bit != 0 && wp.kind.matches(true) {
                        return Some(WatchHit {
                            id: wp.id,
                            target: wp.target,
                            is_write: true,
                        });
                    }
                    if regs_read & bit != 0 && wp.kind.matches(false) {
                        return Some(WatchHit {
                            id: wp.id,
                            target: wp.target,
                            is_write: false,
                        });
                    }
                }
            }
        }
        None
    }
}
