//! Square/move encoding shared by client and server messages. Squares are
//! `0..63` with file in the low 3 bits and rank in the high 3.

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Promo {
    None = 0,
    Queen = 1,
    Rook = 2,
    Bishop = 3,
    Knight = 4,
}

impl Promo {
    pub fn from_u8(value: u8) -> Option<Promo> {
        match value {
            0 => Some(Promo::None),
            1 => Some(Promo::Queen),
            2 => Some(Promo::Rook),
            3 => Some(Promo::Bishop),
            4 => Some(Promo::Knight),
            _ => None,
        }
    }

    fn to_letter(self) -> Option<char> {
        match self {
            Promo::None => None,
            Promo::Queen => Some('q'),
            Promo::Rook => Some('r'),
            Promo::Bishop => Some('b'),
            Promo::Knight => Some('n'),
        }
    }
}

#[inline]
pub fn sq_from_file_rank(file: u8, rank: u8) -> u8 {
    file + rank * 8
}

#[inline]
pub fn sq_to_file_rank(sq: u8) -> (u8, u8) {
    (sq & 7, sq >> 3)
}

/// Encodes `(from_sq, to_sq, promo)` as a UCI string, e.g. `"e2e4"` or
/// `"e7e8q"`.
pub fn move_to_uci(from_sq: u8, to_sq: u8, promo: Promo) -> String {
    let (ff, fr) = sq_to_file_rank(from_sq);
    let (tf, tr) = sq_to_file_rank(to_sq);

    let mut out = String::with_capacity(5);
    out.push((b'a' + ff) as char);
    out.push((b'1' + fr) as char);
    out.push((b'a' + tf) as char);
    out.push((b'1' + tr) as char);

    if let Some(letter) = promo.to_letter() {
        out.push(letter);
    }

    out
}

/// Decodes a UCI string into `(from_sq, to_sq, promo)`. Square bytes outside
/// `a-h`/`1-8` fail the decode. An unrecognized promotion letter (anything
/// other than `q/r/b/n`) does NOT fail the decode — it silently falls back
/// to `Promo::None`, matching the original reference behavior.
pub fn uci_to_move(uci: &str) -> Option<(u8, u8, Promo)> {
    let bytes = uci.as_bytes();
    if bytes.len() < 4 {
        return None;
    }

    let valid_file = |b: u8| (b'a'..=b'h').contains(&b);
    let valid_rank = |b: u8| (b'1'..=b'8').contains(&b);

    if !valid_file(bytes[0]) || !valid_rank(bytes[1]) || !valid_file(bytes[2]) || !valid_rank(bytes[3]) {
        return None;
    }

    let ff = bytes[0] - b'a';
    let fr = bytes[1] - b'1';
    let tf = bytes[2] - b'a';
    let tr = bytes[3] - b'1';

    let promo = match bytes.get(4) {
        Some(b'q') => Promo::Queen,
        Some(b'r') => Promo::Rook,
        Some(b'b') => Promo::Bishop,
        Some(b'n') => Promo::Knight,
        _ => Promo::None,
    };

    Some((sq_from_file_rank(ff, fr), sq_from_file_rank(tf, tr), promo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_e2e4() {
        let from = sq_from_file_rank(4, 1);
        let to = sq_from_file_rank(4, 3);
        let uci = move_to_uci(from, to, Promo::None);
        assert_eq!(uci, "e2e4");

        let (decoded_from, decoded_to, promo) = uci_to_move(&uci).unwrap();
        assert_eq!(decoded_from, from);
        assert_eq!(decoded_to, to);
        assert_eq!(promo, Promo::None);
    }

    #[test]
    fn round_trip_promotion() {
        let from = sq_from_file_rank(4, 6);
        let to = sq_from_file_rank(4, 7);
        let uci = move_to_uci(from, to, Promo::Queen);
        assert_eq!(uci, "e7e8q");

        let (_, _, promo) = uci_to_move(&uci).unwrap();
        assert_eq!(promo, Promo::Queen);
    }

    #[test]
    fn out_of_range_square_bytes_fail_decode() {
        assert!(uci_to_move("i2e4").is_none());
        assert!(uci_to_move("e9e4").is_none());
        assert!(uci_to_move("e2").is_none());
    }

    #[test]
    fn unrecognized_promotion_letter_defaults_to_none() {
        let (_, _, promo) = uci_to_move("e7e8x").unwrap();
        assert_eq!(promo, Promo::None);
    }
}
