//! Persistent in-server groupings of players: a room owns a shared memory
//! region, up to 4 bridge links to other rooms, and a password-gated
//! player list whose slot 0 is always the owner.

use crate::arena::Index;

pub const MAX_PLAYERS_IN_ROOM: usize = 8;
pub const MAX_ROOM_PASSWORD_LEN: usize = 32;
pub const MAX_BRIDGES: usize = 4;
pub const SHARED_MEM_LEN: usize = 128 * 1024;

pub struct Room {
    pub players: Vec<Index<crate::player::Player>>,
    pub max_players: u8,
    pub password: Option<[u8; MAX_ROOM_PASSWORD_LEN]>,
    pub bridges: [Option<Index<Room>>; MAX_BRIDGES],
    pub shared_mem: Box<[u8; SHARED_MEM_LEN]>,
}

impl Room {
    pub fn new(owner: Index<crate::player::Player>) -> Room {
        Room {
            players: vec![owner],
            max_players: MAX_PLAYERS_IN_ROOM as u8,
            password: None,
            bridges: [None; MAX_BRIDGES],
            shared_mem: Box::new([0u8; SHARED_MEM_LEN]),
        }
    }

    pub fn owner(&self) -> Option<Index<crate::player::Player>> {
        self.players.first().copied()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players as usize
    }

    pub fn add_bridge(&mut self, target: Index<Room>) -> bool {
        for slot in self.bridges.iter_mut() {
            if slot.is_none() {
                *slot = Some(target);
                return true;
            }
        }
        false
    }

    pub fn kick(&mut self, player: Index<crate::player::Player>) {
        self.players.retain(|&p| p != player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::player::Player;

    #[test]
    fn owner_is_first_player_added_at_creation() {
        let mut players: Arena<Player> = Arena::with_capacity(4);
        let owner = players.insert(Player::new(1, [0; 4].into())).unwrap();
        let room = Room::new(owner);
        assert_eq!(room.owner(), Some(owner));
    }

    #[test]
    fn bridges_are_capped_at_four() {
        let mut players: Arena<Player> = Arena::with_capacity(8);
        let owner = players.insert(Player::new(1, [0; 4].into())).unwrap();
        let mut rooms: Arena<Room> = Arena::with_capacity(8);
        let mut room = Room::new(owner);
        for _ in 0..MAX_BRIDGES {
            let other = rooms.insert(Room::new(owner)).unwrap();
            assert!(room.add_bridge(other));
        }
        let extra = rooms.insert(Room::new(owner)).unwrap();
        assert!(!room.add_bridge(extra));
    }
}
