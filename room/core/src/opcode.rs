//! Client command opcodes. Numeric values are taken from `uns.h`'s
//! `COMMAND_*` table where they don't collide with anything else; the
//! matchmaking opcodes (`UN_CMD_ROM_IDENTIFY` .. `UN_CMD_PLAYER_INFO_SIMPLE`)
//! occupy 32-40 in the original source, directly colliding with
//! `COMMAND_FILLER_DATA`/`COMMAND_CHECK_MTU`/`COMMAND_EXCHANGE_IP`/etc. in the
//! same byte range — two incompatible opcode tables sharing one numeric
//! space. We renumber the matchmaking group into 64-72, out of the way of
//! every `COMMAND_*` value actually used below (documented in DESIGN.md).

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    Disconnect = 2,
    HostUnusedRoom = 6,
    GetFileChunk = 12,
    SetTimer = 17,
    PingRequest = 19,
    Unicast = 21,
    Broadcast = 22,
    SetRoomPassword = 23,
    SubscribePlayer = 24,
    KickPlayer = 25,
    JoinRoom = 26,
    GetActiveRooms = 27,
    GetFilteredRooms = 28,
    SetRoomMaxPlayers = 29,
    Breather = 30,
    SetMtu = 31,
    CheckMtu = 33,
    ExchangeIp = 34,
    FlushBuffer = 40,
    StartService = 128,

    RomIdentify = 64,
    FontSpecCommon = 65,
    FontSpecify = 66,
    CheckRsvp = 67,
    JoinMatch = 68,
    ReqMatchSimple = 69,
    CheckMatchReady = 70,
    SendMatchReady = 71,
    PlayerInfoSimple = 72,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match value {
            2 => Disconnect,
            6 => HostUnusedRoom,
            12 => GetFileChunk,
            17 => SetTimer,
            19 => PingRequest,
            21 => Unicast,
            22 => Broadcast,
            23 => SetRoomPassword,
            24 => SubscribePlayer,
            25 => KickPlayer,
            26 => JoinRoom,
            27 => GetActiveRooms,
            28 => GetFilteredRooms,
            29 => SetRoomMaxPlayers,
            30 => Breather,
            31 => SetMtu,
            33 => CheckMtu,
            34 => ExchangeIp,
            40 => FlushBuffer,
            128 => StartService,
            64 => RomIdentify,
            65 => FontSpecCommon,
            66 => FontSpecify,
            67 => CheckRsvp,
            68 => JoinMatch,
            69 => ReqMatchSimple,
            70 => CheckMatchReady,
            71 => SendMatchReady,
            72 => PlayerInfoSimple,
            _ => return None,
        })
    }

    /// Number of additional argument bytes this opcode always consumes,
    /// if fixed. `None` means variable / opcode-specific (e.g. `BROADCAST`'s
    /// length-prefixed payload, or tunnel frame bytes).
    pub fn fixed_arg_len(self) -> Option<usize> {
        use Opcode::*;
        match self {
            Disconnect | HostUnusedRoom | CheckRsvp | ReqMatchSimple | CheckMatchReady
            | SendMatchReady | PlayerInfoSimple | FlushBuffer | Breather | GetActiveRooms => Some(0),
            JoinMatch | KickPlayer | JoinRoom | SetRoomPassword | SetRoomMaxPlayers
            | SubscribePlayer | ExchangeIp | StartService => Some(1),
            SetMtu | PingRequest => Some(2),
            SetTimer => Some(6),
            RomIdentify => Some(8),
            FontSpecCommon => Some(0),
            FontSpecify => Some(96),
            GetFileChunk => Some(4),
            GetFilteredRooms | CheckMtu | Unicast | Broadcast => None,
        }
    }
}

pub const COMMAND_DISCONNECT_BYTE: u8 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matchmaking_range_does_not_collide_with_command_range() {
        for value in 32u8..=40 {
            assert!(Opcode::from_u8(value).is_none() || value == 33 || value == 34 || value == 40);
        }
        assert_eq!(Opcode::from_u8(64), Some(Opcode::RomIdentify));
        assert_eq!(Opcode::from_u8(33), Some(Opcode::CheckMtu));
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert!(Opcode::from_u8(200).is_none());
    }
}
