//! Per-connection state: login/command-interpreter state machine, timers,
//! subscriptions, rate limiting, and open tunnels.

use std::collections::VecDeque;
use std::net::IpAddr;

use hashbrown::HashMap;

use crate::arena::Index;
use crate::match_::Match;
use crate::rate_limit::LeakyBucket;
use crate::room::Room;
use crate::tunnel::{AsyncState, Tunnel};

pub const LOGIN_GRACE_TICKS: u32 = 4 * 20; // ~4s at a 20-tick/s schedule
pub const DISCONNECT_GRACE_TICKS: u32 = 500;
pub const IDLE_TIMEOUT_TICKS: u32 = 30 * 20;
pub const TIMER_SLOTS: usize = 5;
/// Length of the short key a client presents during login (spec.md §4.3.1).
pub const USER_KEY_LEN: usize = 8;
pub const SUBSCRIBE_UNICAST: u8 = 1;
pub const SUBSCRIBE_BROADCAST: u8 = 2;
pub const SUBSCRIBE_DISCONNECT_ALERT: u8 = 4;
pub const SUBSCRIBE_IP_SHARE: u8 = 128;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PlayerState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// A countdown timer slot, one of the five a client can arm via `SET_TIMER`.
/// `state == 0` fires once; nonzero reloads to `reload_value` and repeats.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    pub remaining_ms: u32,
    pub reload_value: u32,
    pub repeating: bool,
}

/// Mid-argument resume state for the command interpreter: set when an
/// opcode's argument block has not fully arrived by the end of a tick.
pub struct PendingCommand {
    pub opcode: u8,
    pub collected: Vec<u8>,
    pub needed: usize,
}

pub struct Player {
    pub user_id: u16,
    pub ip: IpAddr,
    pub state: PlayerState,

    pub rom_name: [u8; 8],
    pub font_translate: Option<Box<[u8; 96]>>,
    pub mtu: u16,
    pub match_password: [u8; 32],

    pub room: Option<Index<Room>>,
    pub active_match: Option<Index<Match>>,
    pub match_slot: Option<u8>,
    pub match_ready: bool,

    pub subscribed: HashMap<u32, u8>,
    pub timers: [Option<Timer>; TIMER_SLOTS],
    pub martians: u32,

    pub inbound: VecDeque<u8>,
    pub outbound: VecDeque<u8>,
    pub pending_command: Option<PendingCommand>,
    pub tunnels: HashMap<u8, Tunnel>,
    pub awaiting: Option<AsyncState>,

    pub rate_bucket: LeakyBucket,
    pub flow_hold: bool,

    pub connection_ticks: u32,
    pub idle_ticks: u32,
    pub disconnect_counter: u32,

    /// Login-key bytes accumulated so far while `state == Connecting`.
    pub login_key: Vec<u8>,
}

impl Player {
    pub fn new(user_id: u16, ip: IpAddr) -> Player {
        Player {
            user_id,
            ip,
            state: PlayerState::Connecting,
            rom_name: [0; 8],
            font_translate: None,
            mtu: 256,
            match_password: [0; 32],
            room: None,
            active_match: None,
            match_slot: None,
            match_ready: false,
            subscribed: HashMap::new(),
            timers: [None; TIMER_SLOTS],
            martians: 0,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            pending_command: None,
            tunnels: HashMap::new(),
            awaiting: None,
            rate_bucket: LeakyBucket::new(0),
            flow_hold: false,
            connection_ticks: 0,
            idle_ticks: 0,
            disconnect_counter: DISCONNECT_GRACE_TICKS,
            login_key: Vec::with_capacity(USER_KEY_LEN),
        }
    }

    /// Moves bytes off `inbound` into the in-progress login key. Returns the
    /// completed key once `USER_KEY_LEN` bytes have accumulated, `None` if
    /// `inbound` ran dry first (call again next tick).
    pub fn accumulate_login_key(&mut self) -> Option<[u8; USER_KEY_LEN]> {
        while self.login_key.len() < USER_KEY_LEN {
            match self.inbound.pop_front() {
                Some(b) => self.login_key.push(b),
                None => return None,
            }
        }
        let mut key = [0u8; USER_KEY_LEN];
        key.copy_from_slice(&self.login_key);
        self.login_key.clear();
        Some(key)
    }

    pub fn complete_login(&mut self, user_id: u16) {
        self.user_id = user_id;
        self.state = PlayerState::Connected;
        self.connection_ticks = 0;
    }

    pub fn begin_disconnect(&mut self) {
        if self.state != PlayerState::Disconnecting && self.state != PlayerState::Disconnected {
            self.state = PlayerState::Disconnecting;
            self.disconnect_counter = DISCONNECT_GRACE_TICKS;
        }
    }

    pub fn disconnect_immediately(&mut self) {
        self.state = PlayerState::Disconnecting;
        self.disconnect_counter = 0;
    }

    pub fn record_martian(&mut self) {
        self.martians = self.martians.saturating_add(1);
    }

    /// Validates and stores timer slot `j`. Returns `false` (caller should
    /// disconnect) if `j` is out of range, per spec.md §4.3.3.
    pub fn set_timer(&mut self, j: usize, value: u32, state: u8) -> bool {
        if j >= TIMER_SLOTS {
            return false;
        }
        self.timers[j] = Some(Timer { remaining_ms: value, reload_value: value, repeating: state != 0 });
        true
    }

    pub fn tick_timers(&mut self, elapsed_ms: u32) -> Vec<usize> {
        let mut fired = Vec::new();
        for (j, slot) in self.timers.iter_mut().enumerate() {
            if let Some(timer) = slot {
                timer.remaining_ms = timer.remaining_ms.saturating_sub(elapsed_ms);
                if timer.remaining_ms == 0 {
                    fired.push(j);
                    if timer.repeating {
                        timer.remaining_ms = timer.reload_value;
                    } else {
                        *slot = None;
                    }
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn player() -> Player {
        Player::new(1, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
    }

    #[test]
    fn set_timer_rejects_out_of_range_slot() {
        let mut p = player();
        assert!(!p.set_timer(TIMER_SLOTS, 1000, 0));
        assert!(p.set_timer(0, 1000, 0));
    }

    #[test]
    fn one_shot_timer_clears_after_firing() {
        let mut p = player();
        p.set_timer(0, 100, 0);
        assert!(p.tick_timers(100).contains(&0));
        assert!(p.timers[0].is_none());
    }

    #[test]
    fn repeating_timer_reloads() {
        let mut p = player();
        p.set_timer(1, 50, 1);
        assert!(p.tick_timers(50).contains(&1));
        assert_eq!(p.timers[1].unwrap().remaining_ms, 50);
    }

    #[test]
    fn login_key_accumulates_across_ticks() {
        let mut p = player();
        p.inbound.extend(*b"ABCD");
        assert_eq!(p.accumulate_login_key(), None);
        p.inbound.extend(*b"EFGH");
        assert_eq!(p.accumulate_login_key(), Some(*b"ABCDEFGH"));
        assert!(p.login_key.is_empty());
    }
}
