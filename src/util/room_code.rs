//! Room code generation

use rand::Rng;

pub const ROOM_CODE_LENGTH: usize = 6;
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random room code. Callers check for collisions.
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Generate a code not accepted by `taken`, retrying on collision
pub fn generate_unique_room_code(taken: impl Fn(&str) -> bool) -> String {
    loop {
        let code = generate_room_code();
        if !taken(&code) {
            return code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn code_shape() {
        let code = generate_room_code();
        assert_eq!(code.len(), ROOM_CODE_LENGTH);
        assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn retries_until_free() {
        let attempts = Cell::new(0);
        let code = generate_unique_room_code(|_| {
            attempts.set(attempts.get() + 1);
            attempts.get() < 3
        });
        assert_eq!(attempts.get(), 3);
        assert_eq!(code.len(), ROOM_CODE_LENGTH);
    }
}
