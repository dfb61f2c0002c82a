//! Top-level server state bundle: the arenas plus cross-cutting trackers the
//! cooperative tick loop threads through. Deliberately not `Send`/`Sync` —
//! the room server is single-threaded by design (spec.md §5), so no locking
//! is needed across players.

use slog::Logger;

use crate::arena::{Arena, Index};
use crate::config::RoomConfig;
use crate::ip_deny::IpDenyTracker;
use crate::match_::Match;
use crate::player::{Player, PlayerState};
use crate::room::Room;

pub const MAX_PLAYERS: usize = 256;
pub const MAX_ROOMS: usize = 256;
pub const MAX_MATCHES: usize = 1024;

pub struct RoomState {
    pub players: Arena<Player>,
    pub rooms: Arena<Room>,
    pub matches: Arena<Match>,
    pub ip_deny: IpDenyTracker,
    pub config: RoomConfig,
    pub log: Logger,
}

impl RoomState {
    pub fn new(config: RoomConfig, log: Logger) -> RoomState {
        RoomState {
            players: Arena::with_capacity(MAX_PLAYERS),
            rooms: Arena::with_capacity(MAX_ROOMS),
            matches: Arena::with_capacity(MAX_MATCHES),
            ip_deny: IpDenyTracker::new(),
            config,
            log,
        }
    }

    pub fn leave_room(&mut self, player_index: Index<Player>) {
        let room_index = match self.players.get(player_index).and_then(|p| p.room) {
            Some(r) => r,
            None => return,
        };
        if let Some(room) = self.rooms.get_mut(room_index) {
            room.kick(player_index);
            let empty = room.players.is_empty();
            if empty {
                self.rooms.remove(room_index);
            }
        }
        if let Some(player) = self.players.get_mut(player_index) {
            player.room = None;
        }
    }

    /// Per-tick maintenance for one player: login-grace countdown,
    /// disconnect-grace countdown, and idle timeout. Command dispatch and
    /// tunnel flushing are driven separately by `interpreter::drive` / the
    /// runner's socket I/O.
    pub fn tick_player(&mut self, player_index: Index<Player>, elapsed_ms: u32) {
        let Some(player) = self.players.get_mut(player_index) else { return };

        match player.state {
            PlayerState::Connecting => {
                player.connection_ticks += 1;
                if player.connection_ticks > crate::player::LOGIN_GRACE_TICKS {
                    let ip = player.ip;
                    player.begin_disconnect();
                    self.ip_deny.strike(ip);
                }
            }
            PlayerState::Disconnecting => {
                if player.disconnect_counter > 0 {
                    player.disconnect_counter -= 1;
                }
            }
            PlayerState::Connected => {
                player.idle_ticks += 1;
                if player.idle_ticks as u64 * elapsed_ms as u64 > crate::player::IDLE_TIMEOUT_TICKS as u64 {
                    player.begin_disconnect();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn login_grace_timeout_strikes_ip_and_disconnects() {
        let mut state = RoomState::new(RoomConfig::default(), uzenet_wire::logging::test_logger());
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let index = state.players.insert(Player::new(0, addr)).unwrap();

        for _ in 0..crate::player::LOGIN_GRACE_TICKS {
            state.tick_player(index, 1);
        }
        assert_eq!(state.players.get(index).unwrap().state, PlayerState::Connecting);
        assert_eq!(state.ip_deny.strikes_for(addr), 0);

        state.tick_player(index, 1);
        assert_eq!(state.players.get(index).unwrap().state, PlayerState::Disconnecting);
        assert_eq!(state.ip_deny.strikes_for(addr), 1);
    }
}
