//! The client command interpreter: drains `Player.inbound`, resuming a
//! partially-arrived argument block via `Player.pending_command` across
//! ticks, dispatching complete commands, and appending replies to
//! `Player.outbound`. Framed tunnel bytes (`0xFX`) are routed to the tunnel
//! multiplexer instead of this table.

use slog::warn;

use crate::arena::Index;
use crate::match_;
use crate::opcode::Opcode;
use crate::player::{Player, PlayerState};
use crate::room::Room;
use crate::server::RoomState;
use crate::tunnel::{AsyncState, Tunnel};

/// High nibble marking a client tunnel-select byte (spec.md §4.3.3, final
/// paragraph): `0xFX` opens/selects tunnel `X`, with a one-byte length
/// prefix and that many payload bytes following.
const TUNNEL_FRAME_NIBBLE: u8 = 0xF0;

/// Drains as much of `player_index`'s inbound buffer as it can make progress
/// on this tick. Stops when the buffer is exhausted, an argument block is
/// incomplete, the player is suspended awaiting an async completion, or the
/// player transitions out of `Connected`.
pub fn drive(state: &mut RoomState, player_index: Index<Player>) {
    loop {
        match state.players.get(player_index) {
            Some(p) if p.state == PlayerState::Connected && p.awaiting.is_none() => {}
            _ => return,
        }

        let opcode_byte = match next_opcode_byte(state, player_index) {
            Some(b) => b,
            None => return,
        };

        if opcode_byte & 0xF0 == TUNNEL_FRAME_NIBBLE {
            match handle_tunnel_frame(state, player_index, opcode_byte) {
                Some(()) => continue,
                None => return, // length/payload not fully arrived; resume next tick
            }
        }

        let Some(opcode) = Opcode::from_u8(opcode_byte) else {
            warn!(state.log, "unknown opcode, disconnecting"; "opcode" => opcode_byte);
            if let Some(player) = state.players.get_mut(player_index) {
                player.record_martian();
                player.begin_disconnect();
            }
            return;
        };

        let needed = opcode.fixed_arg_len();
        let args = match needed {
            Some(len) => match take_bytes(state, player_index, opcode_byte, len) {
                Some(bytes) => bytes,
                None => return, // argument not fully arrived; resume next tick
            },
            None => match take_variable_args(state, player_index, opcode_byte, opcode) {
                Some(bytes) => bytes,
                None => return,
            },
        };

        dispatch(state, player_index, opcode, &args);
    }
}

fn next_opcode_byte(state: &mut RoomState, player_index: Index<Player>) -> Option<u8> {
    let player = state.players.get_mut(player_index)?;
    if let Some(pending) = &player.pending_command {
        return Some(pending.opcode);
    }
    player.inbound.pop_front()
}

/// Collects `len` argument bytes, resuming a prior partial collection if one
/// is in flight. Returns `None` (and leaves `pending_command` set) if not
/// enough bytes have arrived yet.
fn take_bytes(state: &mut RoomState, player_index: Index<Player>, opcode_byte: u8, len: usize) -> Option<Vec<u8>> {
    let player = state.players.get_mut(player_index)?;

    let mut collected = match player.pending_command.take() {
        Some(pending) => pending.collected,
        None => Vec::new(),
    };

    while collected.len() < len {
        match player.inbound.pop_front() {
            Some(b) => collected.push(b),
            None => {
                player.pending_command = Some(crate::player::PendingCommand { opcode: opcode_byte, collected, needed: len });
                return None;
            }
        }
    }
    Some(collected)
}

/// Collects bytes one at a time until `compute_total` — given the bytes
/// collected so far — reports a total length that has now been reached.
/// Used for opcodes whose total argument length is itself carried in the
/// first byte(s) of the argument (`BROADCAST`, `UNICAST`).
fn take_dynamic(
    state: &mut RoomState,
    player_index: Index<Player>,
    opcode_byte: u8,
    compute_total: impl Fn(&[u8]) -> Option<usize>,
) -> Option<Vec<u8>> {
    let player = state.players.get_mut(player_index)?;
    let mut collected = match player.pending_command.take() {
        Some(pending) => pending.collected,
        None => Vec::new(),
    };

    loop {
        if let Some(total) = compute_total(&collected) {
            if collected.len() >= total {
                return Some(collected);
            }
        }
        match player.inbound.pop_front() {
            Some(b) => collected.push(b),
            None => {
                player.pending_command = Some(crate::player::PendingCommand { opcode: opcode_byte, collected, needed: 0 });
                return None;
            }
        }
    }
}

/// Collects a tunnel-select byte's one-byte length prefix plus that many
/// payload bytes, then appends the payload to the named tunnel's
/// client→service queue. Bytes addressed to a tunnel that isn't open are
/// dropped — there is no service file descriptor to write them to.
fn handle_tunnel_frame(state: &mut RoomState, player_index: Index<Player>, opcode_byte: u8) -> Option<()> {
    let tunnel_id = opcode_byte & 0x0F;
    let collected = take_dynamic(state, player_index, opcode_byte, |collected| {
        (!collected.is_empty()).then(|| 1 + collected[0] as usize)
    })?;
    let payload = &collected[1..];
    if let Some(player) = state.players.get_mut(player_index) {
        if let Some(tunnel) = player.tunnels.get_mut(&tunnel_id) {
            tunnel.queue_to_service(payload);
        }
    }
    Some(())
}

/// Called by the runner once a backend reply arrives on `service_id`'s
/// tunnel. If the Player is suspended awaiting that exact tunnel's
/// completion, appends the response to its outbound buffer and lifts the
/// `AWAIT_ASYNCHRONOUS` suspension; otherwise a no-op (the data belongs to
/// the ordinary tunnel flush path instead).
pub fn complete_async(state: &mut RoomState, player_index: Index<Player>, service_id: u8, response: &[u8]) -> bool {
    if let Some(player) = state.players.get_mut(player_index) {
        if matches!(&player.awaiting, Some(AsyncState::Awaiting { service_id: s, .. }) if *s == service_id) {
            player.awaiting = None;
            player.outbound.extend(response.iter().copied());
            return true;
        }
    }
    false
}

/// `BROADCAST`/`UNICAST`/`CHECK_MTU`/`GET_FILTERED_ROOMS` carry a
/// length-prefixed or terminator-delimited argument instead of a fixed size.
fn take_variable_args(state: &mut RoomState, player_index: Index<Player>, opcode_byte: u8, opcode: Opcode) -> Option<Vec<u8>> {
    match opcode {
        Opcode::CheckMtu => {
            let player = state.players.get_mut(player_index)?;
            let mut collected = match player.pending_command.take() {
                Some(pending) => pending.collected,
                None => Vec::new(),
            };
            loop {
                match player.inbound.pop_front() {
                    Some(0xFF) => return Some(collected),
                    Some(b) => collected.push(b),
                    None => {
                        player.pending_command =
                            Some(crate::player::PendingCommand { opcode: opcode_byte, collected, needed: 0 });
                        return None;
                    }
                }
            }
        }
        Opcode::Broadcast => take_dynamic(state, player_index, opcode_byte, |collected| {
            (!collected.is_empty()).then(|| 1 + collected[0] as usize)
        }),
        Opcode::Unicast => take_dynamic(state, player_index, opcode_byte, |collected| {
            (collected.len() >= 2).then(|| 2 + collected[1] as usize)
        }),
        Opcode::GetFilteredRooms => take_bytes(state, player_index, opcode_byte, 8),
        _ => Some(Vec::new()),
    }
}

/// Flushes at most one ring-buffer slot per open service tunnel as a
/// `0xFX`-framed tunnel frame bound for the client (spec.md §4.3.2 step 4).
pub fn flush_tunnel_slots(state: &mut RoomState, player_index: Index<Player>) {
    if let Some(player) = state.players.get_mut(player_index) {
        for (&id, tunnel) in player.tunnels.iter_mut() {
            if let Some(payload) = tunnel.drain_one() {
                player.outbound.push_back(TUNNEL_FRAME_NIBBLE | (id & 0x0F));
                player.outbound.push_back(payload.len().min(255) as u8);
                player.outbound.extend(payload.iter().take(255).copied());
            }
        }
    }
}

fn reply(state: &mut RoomState, player_index: Index<Player>, bytes: &[u8]) {
    if let Some(player) = state.players.get_mut(player_index) {
        player.outbound.extend(bytes.iter().copied());
    }
}

fn dispatch(state: &mut RoomState, player_index: Index<Player>, opcode: Opcode, args: &[u8]) {
    match opcode {
        Opcode::RomIdentify => {
            if let Some(player) = state.players.get_mut(player_index) {
                player.rom_name.copy_from_slice(&args[..8]);
            }
        }

        Opcode::FontSpecCommon => {
            if let Some(player) = state.players.get_mut(player_index) {
                player.font_translate = Some(Box::new(crate::DEFAULT_FONTSET));
            }
        }

        Opcode::FontSpecify => {
            if let Some(player) = state.players.get_mut(player_index) {
                let mut table = [0u8; 96];
                table.copy_from_slice(&args[..96]);
                player.font_translate = Some(Box::new(table));
            }
        }

        Opcode::CheckRsvp => {
            let user_id = match state.players.get(player_index) {
                Some(p) => p.user_id,
                None => return,
            };
            let result = match_::find_rsvp(&state.matches, user_id);
            reply(state, player_index, &[result as u8]);
        }

        Opcode::JoinMatch => {
            let user_id = match state.players.get(player_index) {
                Some(p) => p.user_id,
                None => return,
            };
            let match_slot = args.first().copied().unwrap_or(0);
            let result = state
                .matches
                .iter()
                .find(|(idx, _)| idx.slot() as u8 == match_slot.wrapping_sub(1))
                .map(|(idx, _)| idx);
            let slot = match result {
                Some(index) => match_::join_match(&mut state.matches, index, user_id),
                None => 0,
            };
            reply(state, player_index, &[slot]);
        }

        Opcode::ReqMatchSimple => {
            let mut rng = rand::thread_rng();
            let index = {
                let player = match state.players.get(player_index) {
                    Some(p) => p,
                    None => return,
                };
                let user_id = player.user_id;
                match_::request_match_simple(&mut state.matches, player, user_id, &mut rng)
            };
            if let (Some(index), Some(player)) = (index, state.players.get_mut(player_index)) {
                player.active_match = Some(index);
            }
        }

        Opcode::CheckMatchReady => {
            let signal = state
                .players
                .get(player_index)
                .and_then(|p| p.active_match)
                .and_then(|idx| state.matches.get(idx))
                .map(|m| m.ready_signal())
                .unwrap_or(0);
            reply(state, player_index, &[signal]);
        }

        Opcode::SendMatchReady => {
            if let Some(player) = state.players.get_mut(player_index) {
                player.match_ready = true;
            }
            let (match_index, slot) = match state.players.get(player_index) {
                Some(p) => (p.active_match, p.match_slot),
                None => return,
            };
            if let (Some(index), Some(slot)) = (match_index, slot) {
                if let Some(m) = state.matches.get_mut(index) {
                    m.ready[slot as usize] = true;
                }
            }
        }

        Opcode::PlayerInfoSimple => {
            let match_index = state.players.get(player_index).and_then(|p| p.active_match);
            let mut out = Vec::with_capacity(4 * 13);
            if let Some(index) = match_index {
                if let Some(m) = state.matches.get(index) {
                    for slot in 1..=4 {
                        let mut name = [0u8; 13];
                        let user_id = m.players[slot];
                        if user_id != 0 {
                            let digits = user_id.to_string();
                            let bytes = digits.as_bytes();
                            name[..bytes.len().min(13)].copy_from_slice(&bytes[..bytes.len().min(13)]);
                        }
                        out.extend_from_slice(&name);
                    }
                }
            }
            if out.is_empty() {
                out = vec![0u8; 4 * 13];
            }
            reply(state, player_index, &out);
        }

        Opcode::Breather => {}

        Opcode::SetMtu => {
            if let Some(player) = state.players.get_mut(player_index) {
                player.mtu = u16::from_be_bytes([args[0], args[1]]);
            }
        }

        Opcode::CheckMtu => reply(state, player_index, &[Opcode::CheckMtu as u8]),

        Opcode::ExchangeIp => {
            let requested_slot = args.first().copied().unwrap_or(0) as u32;
            let target = state.players.iter().find(|(idx, _)| idx.slot() == requested_slot).map(|(idx, _)| idx);
            let allowed = match (target, state.players.get(player_index)) {
                (Some(target_idx), Some(_)) => state
                    .players
                    .get(target_idx)
                    .map(|p| p.subscribed.get(&player_index.slot()).copied().unwrap_or(0) & crate::player::SUBSCRIBE_IP_SHARE != 0)
                    .unwrap_or(false),
                _ => false,
            };
            let target_ip = if allowed { target.and_then(|idx| state.players.get(idx)).map(|p| p.ip) } else { None };
            match target_ip {
                Some(ip) => {
                    let mut out = vec![1u8];
                    if let std::net::IpAddr::V4(v4) = ip {
                        out.extend_from_slice(&v4.octets());
                    } else {
                        out.extend_from_slice(&[0, 0, 0, 0]);
                    }
                    reply(state, player_index, &out);
                }
                None => reply(state, player_index, &[0u8]),
            }
        }

        Opcode::JoinRoom => {
            let room_slot = args.first().copied().unwrap_or(0) as u32;
            let target = state.rooms.iter().find(|(idx, _)| idx.slot() == room_slot).map(|(idx, _)| idx);
            if let Some(room_index) = target {
                state.leave_room(player_index);
                let joined = if let Some(room) = state.rooms.get_mut(room_index) {
                    if !room.is_full() {
                        room.players.push(player_index);
                        true
                    } else {
                        false
                    }
                } else {
                    false
                };
                if joined {
                    if let Some(player) = state.players.get_mut(player_index) {
                        player.room = Some(room_index);
                    }
                    reply(state, player_index, &[0u8]);
                    return;
                }
            }
            reply(state, player_index, &[1u8]);
        }

        Opcode::HostUnusedRoom => {
            let room_index = state.rooms.insert(Room::new(player_index));
            match room_index {
                Some(index) => {
                    if let Some(player) = state.players.get_mut(player_index) {
                        player.room = Some(index);
                    }
                    reply(state, player_index, &[(index.slot() + 1) as u8]);
                }
                None => reply(state, player_index, &[0u8]),
            }
        }

        Opcode::KickPlayer => {
            let room_index = state.players.get(player_index).and_then(|p| p.room);
            let is_owner = room_index
                .and_then(|idx| state.rooms.get(idx))
                .and_then(|r| r.owner())
                .map(|owner| owner == player_index)
                .unwrap_or(false);
            if !is_owner {
                if let Some(player) = state.players.get_mut(player_index) {
                    player.begin_disconnect();
                }
                return;
            }
            let target_slot = args.first().copied().unwrap_or(0) as u32;
            let target = state.players.iter().find(|(idx, _)| idx.slot() == target_slot).map(|(idx, _)| idx);
            if let Some(target_index) = target {
                if let Some(room_index) = room_index {
                    if let Some(room) = state.rooms.get_mut(room_index) {
                        room.kick(target_index);
                    }
                }
                if let Some(target_player) = state.players.get_mut(target_index) {
                    target_player.room = None;
                    target_player.begin_disconnect();
                }
            }
        }

        Opcode::SetRoomPassword => {
            let room_index = state.players.get(player_index).and_then(|p| p.room);
            if let Some(room) = room_index.and_then(|idx| state.rooms.get_mut(idx)) {
                let mut password = [0u8; crate::room::MAX_ROOM_PASSWORD_LEN];
                let len = args.len().min(password.len());
                password[..len].copy_from_slice(&args[..len]);
                room.password = Some(password);
            }
        }

        Opcode::SetRoomMaxPlayers => {
            let room_index = state.players.get(player_index).and_then(|p| p.room);
            if let Some(room) = room_index.and_then(|idx| state.rooms.get_mut(idx)) {
                room.max_players = args.first().copied().unwrap_or(room.max_players);
            }
        }

        Opcode::GetActiveRooms => {
            let mut bitmap = vec![0u8; (crate::server::MAX_ROOMS + 7) / 8];
            for (index, _) in state.rooms.iter() {
                let slot = index.slot() as usize;
                bitmap[slot / 8] |= 1 << (slot % 8);
            }
            reply(state, player_index, &bitmap);
        }

        Opcode::GetFilteredRooms => {
            let rom_filter = &args[..8.min(args.len())];
            let mut out = Vec::new();
            for (index, room) in state.rooms.iter() {
                let owner_rom = room
                    .owner()
                    .and_then(|owner| state.players.get(owner))
                    .map(|p| p.rom_name)
                    .unwrap_or([0; 8]);
                if rom_filter.is_empty() || owner_rom == rom_filter {
                    out.push((index.slot() + 1) as u8);
                }
            }
            reply(state, player_index, &out);
        }

        Opcode::SubscribePlayer => {
            let target_slot = args.first().copied().unwrap_or(0) as u32;
            let mask = args.get(1).copied().unwrap_or(0);
            if let Some(player) = state.players.get_mut(player_index) {
                player.subscribed.insert(target_slot, mask);
            }
        }

        Opcode::Broadcast => {
            let payload = &args[1..];
            let Some(room_index) = state.players.get(player_index).and_then(|p| p.room) else { return };
            let Some(room) = state.rooms.get(room_index) else { return };
            let recipients: Vec<Index<Player>> = room.players.clone();
            for recipient in recipients {
                let subscribed = state
                    .players
                    .get(recipient)
                    .map(|p| p.subscribed.get(&player_index.slot()).copied().unwrap_or(0) & crate::player::SUBSCRIBE_BROADCAST != 0)
                    .unwrap_or(false);
                if subscribed {
                    if let Some(target) = state.players.get_mut(recipient) {
                        target.outbound.extend(payload.iter().copied());
                    }
                }
            }
        }

        Opcode::Unicast => {
            let target_slot = args[0] as u32;
            let payload = &args[2..];
            let target = state.players.iter().find(|(idx, _)| idx.slot() == target_slot).map(|(idx, _)| idx);
            if let Some(target_index) = target {
                let subscribed = state
                    .players
                    .get(target_index)
                    .map(|p| p.subscribed.get(&player_index.slot()).copied().unwrap_or(0) & crate::player::SUBSCRIBE_UNICAST != 0)
                    .unwrap_or(false);
                if subscribed {
                    if let Some(target_player) = state.players.get_mut(target_index) {
                        target_player.outbound.extend(payload.iter().copied());
                    }
                }
            }
        }

        Opcode::PingRequest => {
            let mut out = vec![Opcode::PingRequest as u8];
            out.extend_from_slice(args);
            reply(state, player_index, &out);
        }

        Opcode::SetTimer => {
            let j = args[0] as usize;
            let value = u32::from_be_bytes([0, args[1], args[2], args[3]]);
            let timer_state = args[4];
            let ok = state.players.get_mut(player_index).map(|p| p.set_timer(j, value, timer_state)).unwrap_or(false);
            if !ok {
                if let Some(player) = state.players.get_mut(player_index) {
                    player.begin_disconnect();
                }
            }
        }

        Opcode::GetFileChunk => {
            let tunnel_id = args[0];
            let request = args[1..4].to_vec();
            let staged = match state.players.get_mut(player_index) {
                Some(player) => match player.tunnels.get_mut(&tunnel_id) {
                    Some(tunnel) => {
                        tunnel.queue_to_service(&request);
                        player.awaiting =
                            Some(AsyncState::Awaiting { service_id: tunnel_id, opcode: Opcode::GetFileChunk as u8, request });
                        true
                    }
                    None => false,
                },
                None => false,
            };
            if !staged {
                // No such tunnel open — nothing to await.
                reply(state, player_index, &[0xFF]);
            }
        }

        Opcode::StartService => {
            let service_id = args.first().copied().unwrap_or(0);
            if let Some(player) = state.players.get_mut(player_index) {
                player.tunnels.entry(service_id).or_insert_with(|| Tunnel::new(service_id));
            }
            // The actual AF_UNIX connect + tunnel LOGIN frame is performed
            // by the runner, which polls for tunnels with `backend_online
            // == false` once per tick (spec.md §4.3.3 `START_SERVICE`).
        }

        Opcode::FlushBuffer => {
            if let Some(player) = state.players.get_mut(player_index) {
                player.inbound.clear();
                player.outbound.clear();
            }
        }

        Opcode::Disconnect => {
            if let Some(player) = state.players.get_mut(player_index) {
                player.begin_disconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use std::net::Ipv4Addr;

    fn fresh_state() -> RoomState {
        RoomState::new(RoomConfig::default(), uzenet_wire::logging::test_logger())
    }

    fn connected_player(state: &mut RoomState) -> Index<Player> {
        let mut player = Player::new(1, std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        player.state = PlayerState::Connected;
        state.players.insert(player).unwrap()
    }

    #[test]
    fn rom_identify_consumes_eight_bytes() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().inbound.extend([Opcode::RomIdentify as u8]);
        state.players.get_mut(index).unwrap().inbound.extend(*b"MEGATR00");
        drive(&mut state, index);
        assert_eq!(&state.players.get(index).unwrap().rom_name, b"MEGATR00");
    }

    #[test]
    fn incomplete_argument_resumes_next_tick() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().inbound.extend([Opcode::RomIdentify as u8, b'M', b'E']);
        drive(&mut state, index);
        assert!(state.players.get(index).unwrap().pending_command.is_some());

        state.players.get_mut(index).unwrap().inbound.extend(*b"GATR00");
        drive(&mut state, index);
        assert_eq!(&state.players.get(index).unwrap().rom_name, b"MEGATR00");
        assert!(state.players.get(index).unwrap().pending_command.is_none());
    }

    #[test]
    fn unknown_opcode_disconnects() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().inbound.push_back(250);
        drive(&mut state, index);
        assert_eq!(state.players.get(index).unwrap().state, PlayerState::Disconnecting);
    }

    #[test]
    fn check_rsvp_returns_zero_with_no_matches() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().inbound.push_back(Opcode::CheckRsvp as u8);
        drive(&mut state, index);
        assert_eq!(state.players.get(index).unwrap().outbound.back(), Some(&0));
    }

    #[test]
    fn tunnel_framed_bytes_route_to_service_queue_not_dispatch() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().tunnels.insert(3, Tunnel::new(3));
        // 0xF3, length 2, payload "hi"
        state.players.get_mut(index).unwrap().inbound.extend([0xF3, 2, b'h', b'i']);
        drive(&mut state, index);
        let tunnel = &state.players.get(index).unwrap().tunnels[&3];
        assert!(tunnel.has_queued_to_service());
    }

    #[test]
    fn tunnel_frame_to_unopened_tunnel_is_dropped() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().inbound.extend([0xF5, 1, b'x']);
        drive(&mut state, index);
        assert_eq!(state.players.get(index).unwrap().state, PlayerState::Connected);
        assert!(state.players.get(index).unwrap().tunnels.get(&5).is_none());
    }

    #[test]
    fn get_file_chunk_suspends_interpreter_until_completion() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().tunnels.insert(1, Tunnel::new(1));
        state.players.get_mut(index).unwrap().inbound.extend([Opcode::GetFileChunk as u8, 1, 0, 0, 0]);
        // A second command queued behind it must not run until resumed.
        state.players.get_mut(index).unwrap().inbound.push_back(Opcode::Breather as u8);
        drive(&mut state, index);
        assert!(state.players.get(index).unwrap().awaiting.is_some());
        assert!(!state.players.get(index).unwrap().inbound.is_empty());

        assert!(complete_async(&mut state, index, 1, &[0xAB]));
        assert!(state.players.get(index).unwrap().awaiting.is_none());
        assert_eq!(state.players.get(index).unwrap().outbound.back(), Some(&0xAB));

        drive(&mut state, index);
        assert!(state.players.get(index).unwrap().inbound.is_empty());
    }

    #[test]
    fn flush_tunnel_slots_emits_framed_bytes_once_per_tick() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        {
            let player = state.players.get_mut(index).unwrap();
            let mut tunnel = Tunnel::new(2);
            tunnel.push(vec![9, 9]);
            tunnel.push(vec![7]);
            player.tunnels.insert(2, tunnel);
        }
        flush_tunnel_slots(&mut state, index);
        let out: Vec<u8> = state.players.get(index).unwrap().outbound.iter().copied().collect();
        assert_eq!(out, vec![0xF2, 2, 9, 9]);
    }

    #[test]
    fn host_unused_room_makes_player_owner() {
        let mut state = fresh_state();
        let index = connected_player(&mut state);
        state.players.get_mut(index).unwrap().inbound.push_back(Opcode::HostUnusedRoom as u8);
        drive(&mut state, index);
        let room_index = state.players.get(index).unwrap().room.unwrap();
        assert_eq!(state.rooms.get(room_index).unwrap().owner(), Some(index));
    }
}
