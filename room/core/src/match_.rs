//! Matchmaking: `Match` records plus the `REQ_MATCH_SIMPLE` two-pass engine.
//! A match holds RSVPs (pre-claims) and player slots; `rsvp[i]` and
//! `players[i]` are never both nonzero for the same `i` (Invariant 2).

use rand::Rng;

use crate::arena::{Arena, Index};
use crate::player::Player;
use uzenet_wire::time::timestamp_secs;

pub const MAX_MATCH_PLAYERS: usize = 8;
pub const MAX_MATCH_LFSR: usize = 8;
pub const RSVP_EXPIRY_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MatchState {
    None,
    Simple,
}

pub struct Match {
    pub state: MatchState,
    pub rom_name: [u8; 8],
    pub password: Option<[u8; 32]>,
    pub min_players: u8,
    pub max_players: u8,
    pub rsvp: [u16; MAX_MATCH_PLAYERS],
    pub players: [u16; MAX_MATCH_PLAYERS],
    pub ready: [bool; MAX_MATCH_PLAYERS],
    pub lfsr: [u32; MAX_MATCH_LFSR],
    pub rsvp_expire_epoch: [u64; MAX_MATCH_PLAYERS],
}

impl Match {
    fn empty() -> Match {
        Match {
            state: MatchState::None,
            rom_name: [0; 8],
            password: None,
            min_players: 0,
            max_players: 0,
            rsvp: [0; MAX_MATCH_PLAYERS],
            players: [0; MAX_MATCH_PLAYERS],
            ready: [false; MAX_MATCH_PLAYERS],
            lfsr: [0; MAX_MATCH_LFSR],
            rsvp_expire_epoch: [0; MAX_MATCH_PLAYERS],
        }
    }

    pub fn num_players(&self) -> usize {
        self.players.iter().filter(|&&p| p != 0).count()
    }

    pub fn num_rsvp(&self) -> usize {
        self.rsvp.iter().filter(|&&p| p != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.num_players() == 0 && self.num_rsvp() == 0
    }

    /// `CHECK_MATCH_READY`: non-zero low byte of `lfsr[1]` iff every
    /// populated player slot is ready and there are at least two players.
    pub fn ready_signal(&self) -> u8 {
        if self.num_players() < 2 {
            return 0;
        }
        for (i, &player) in self.players.iter().enumerate() {
            if player != 0 && !self.ready[i] {
                return 0;
            }
        }
        (self.lfsr[1] & 0xFF) as u8
    }
}

fn generate_lfsr_seed<R: Rng>(rng: &mut R) -> u32 {
    loop {
        let seed: u32 = rng.gen();
        if seed & 0xFF != 0 {
            return seed;
        }
    }
}

/// Removes `user_id`'s RSVP from every match other than `keep`. A match that
/// becomes fully empty (no players, no RSVPs) reverts to `MatchState::None`.
pub fn eliminate_old_rsvp(matches: &mut Arena<Match>, user_id: u16, keep: Option<Index<Match>>) {
    for (index, m) in matches.iter_mut() {
        if Some(index) == keep {
            continue;
        }
        for slot in m.rsvp.iter_mut() {
            if *slot == user_id {
                *slot = 0;
            }
        }
        if m.is_empty() {
            *m = Match::empty();
        }
    }
}

/// `REQ_MATCH_SIMPLE`: the two-pass join-or-create scan (spec.md §4.3.4).
pub fn request_match_simple<R: Rng>(
    matches: &mut Arena<Match>,
    player: &Player,
    user_id: u16,
    rng: &mut R,
) -> Option<Index<Match>> {
    // Join pass.
    let mut join_target = None;
    for (index, m) in matches.iter() {
        if m.state != MatchState::Simple || m.rom_name != player.rom_name {
            continue;
        }
        if let Some(existing) = m.password {
            if existing != player.match_password {
                continue;
            }
        }
        let occupancy = m.num_players() + m.num_rsvp();
        if occupancy == 0 || occupancy >= m.max_players as usize {
            continue;
        }
        if let Some(slot) = (0..MAX_MATCH_PLAYERS).find(|&i| m.players[i] == 0 && m.rsvp[i] == 0) {
            join_target = Some((index, slot));
            break;
        }
    }

    if let Some((index, slot)) = join_target {
        if let Some(m) = matches.get_mut(index) {
            m.rsvp[slot] = user_id;
        }
        eliminate_old_rsvp(matches, user_id, Some(index));
        return Some(index);
    }

    // Create pass: find the first retired (`None`) slot and install a new
    // match with this player as leader in RSVP slot 1.
    let target = matches.iter().find(|(_, m)| m.state == MatchState::None).map(|(i, _)| i);
    let index = match target {
        Some(index) => index,
        None => matches.insert(Match::empty())?,
    };

    let mut seeds = [0u32; MAX_MATCH_LFSR];
    for seed in seeds.iter_mut() {
        *seed = generate_lfsr_seed(rng);
    }

    if let Some(m) = matches.get_mut(index) {
        *m = Match::empty();
        m.state = MatchState::Simple;
        m.rom_name = player.rom_name;
        m.password = if player.match_password == [0; 32] { None } else { Some(player.match_password) };
        m.min_players = 2;
        m.max_players = 2;
        m.rsvp[1] = user_id;
        // Recorded for parity with the original's rsvp_expire[] but not yet
        // swept anywhere — the original never built that sweep either.
        m.rsvp_expire_epoch[1] = timestamp_secs() + RSVP_EXPIRY_SECS;
        m.lfsr = seeds;
    }

    eliminate_old_rsvp(matches, user_id, Some(index));
    Some(index)
}

/// `CHECK_RSVP`: scans all matches for an RSVP slot matching `user_id`.
pub fn find_rsvp(matches: &Arena<Match>, user_id: u16) -> u32 {
    if user_id == 0 {
        return 0;
    }
    for (index, m) in matches.iter() {
        for &slot in m.rsvp.iter() {
            if slot == user_id {
                return index.slot() + 1;
            }
        }
    }
    0
}

/// `JOIN_MATCH`: moves a player's RSVP in match `m` into a player slot.
/// Returns the 1-based slot index, or 0 on failure.
pub fn join_match(matches: &mut Arena<Match>, index: Index<Match>, user_id: u16) -> u8 {
    let Some(m) = matches.get_mut(index) else { return 0 };
    for i in 0..MAX_MATCH_PLAYERS {
        if m.rsvp[i] == user_id {
            m.rsvp[i] = 0;
            m.players[i] = user_id;
            return i as u8;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn seeded_rng() -> StepRng {
        StepRng::new(1, 1)
    }

    fn player_with_rom(rom: &[u8; 8]) -> Player {
        let mut p = Player::new(42, "127.0.0.1".parse().unwrap());
        p.rom_name = *rom;
        p
    }

    #[test]
    fn create_pass_installs_leader_in_rsvp_slot_1() {
        let mut matches: Arena<Match> = Arena::with_capacity(8);
        let player = player_with_rom(b"MEGATR00");
        let index = request_match_simple(&mut matches, &player, 7, &mut seeded_rng()).unwrap();
        let m = matches.get(index).unwrap();
        assert_eq!(m.state, MatchState::Simple);
        assert_eq!(m.rsvp[1], 7);
        assert!(m.lfsr.iter().all(|&s| s & 0xFF != 0));
    }

    #[test]
    fn join_pass_finds_compatible_open_match() {
        let mut matches: Arena<Match> = Arena::with_capacity(8);
        let a = player_with_rom(b"MEGATR00");
        let index = request_match_simple(&mut matches, &a, 1, &mut seeded_rng()).unwrap();

        let b = player_with_rom(b"MEGATR00");
        let joined = request_match_simple(&mut matches, &b, 2, &mut seeded_rng()).unwrap();
        assert_eq!(joined, index);

        let m = matches.get(index).unwrap();
        assert!(m.rsvp.contains(&2));
    }

    #[test]
    fn find_rsvp_returns_match_slot_plus_one() {
        let mut matches: Arena<Match> = Arena::with_capacity(8);
        let a = player_with_rom(b"MEGATR00");
        let index = request_match_simple(&mut matches, &a, 1, &mut seeded_rng()).unwrap();
        assert_eq!(find_rsvp(&matches, 1), index.slot() + 1);
        assert_eq!(find_rsvp(&matches, 999), 0);
    }

    #[test]
    fn eliminate_old_rsvp_retires_emptied_match() {
        let mut matches: Arena<Match> = Arena::with_capacity(8);
        let a = player_with_rom(b"MEGATR00");
        let index = request_match_simple(&mut matches, &a, 1, &mut seeded_rng()).unwrap();
        eliminate_old_rsvp(&mut matches, 1, None);
        assert_eq!(matches.get(index).unwrap().state, MatchState::None);
    }

    #[test]
    fn ready_signal_requires_two_players_and_all_ready() {
        let mut m = Match::empty();
        m.state = MatchState::Simple;
        m.players[1] = 1;
        m.players[2] = 2;
        m.lfsr[1] = 0xAB;
        assert_eq!(m.ready_signal(), 0);
        m.ready[1] = true;
        m.ready[2] = true;
        assert_eq!(m.ready_signal(), 0xAB);
    }
}
