use uuid::Uuid;

const ID_LEN: usize = 16;

/// Generate a 16-hex-char session identifier.
///
/// The entropy source is a v4 UUID; degenerate draws (all nibbles equal,
/// which only a broken RNG produces) are rejected and redrawn so that IDs
/// stay collision-resistant even on misconfigured systems.
pub fn generate_session_id() -> String {
    loop {
        let raw = Uuid::new_v4().simple().to_string();
        let candidate = &raw[..ID_LEN];
        if is_sufficiently_random(candidate) {
            return candidate.to_string();
        }
    }
}

fn is_sufficiently_random(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    chars.any(|c| c != first)
}
