//! DeepSeek proof-of-work solver.
//!
//! The source loads a WASM module (`DeepSeekHashV1`) once at start-up and
//! calls into it per challenge. There is no WASM runtime in this workspace;
//! the hash construction below is a native reimplementation of the same
//! algorithm (SHA3-256 over `salt_challenge_nonce`, difficulty expressed as
//! a minimum count of leading zero bits) treated as the "external native
//! library" the design notes call for — `solve` is the single
//! entrypoint the adapter calls, matching the signature
//! `solve(algorithm, challenge, salt, difficulty, expire_at) -> u64|none`.

use base64::Engine;
use serde::Serialize;
use sha3::{Digest, Sha3_256};

const SUPPORTED_ALGORITHM: &str = "DeepSeekHashV1";
/// Upper bound on nonces tried before giving up — keeps a misbehaving
/// challenge from spinning forever; real difficulties resolve in a few
/// thousand iterations at most.
const MAX_ATTEMPTS: u64 = 10_000_000;

#[derive(Debug, Clone)]
pub struct PowChallenge {
    pub algorithm: String,
    pub challenge: String,
    pub salt: String,
    pub difficulty: u32,
    pub expire_at: i64,
    pub signature: String,
}

#[derive(Serialize)]
struct PowAnswerPayload<'a> {
    algorithm: &'a str,
    challenge: &'a str,
    salt: &'a str,
    answer: u64,
    signature: &'a str,
    target_path: &'static str,
}

/// Counts leading zero bits across a byte slice (treated as a big-endian
/// bit string), the difficulty metric the vendor's hash target uses.
fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut count = 0;
    for b in bytes {
        if *b == 0 {
            count += 8;
            continue;
        }
        count += b.leading_zeros();
        break;
    }
    count
}

fn meets_difficulty(challenge: &str, salt: &str, nonce: u64, difficulty: u32) -> bool {
    let mut hasher = Sha3_256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"_");
    hasher.update(challenge.as_bytes());
    hasher.update(b"_");
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();
    leading_zero_bits(&digest) >= difficulty
}

/// Finds the smallest nonce whose hash meets `challenge.difficulty`, or
/// `None` if exhausted without success or the algorithm is unrecognized
///.
pub fn solve(challenge: &PowChallenge) -> Option<u64> {
    if challenge.algorithm != SUPPORTED_ALGORITHM {
        return None;
    }
    (0..MAX_ATTEMPTS).find(|&nonce| meets_difficulty(&challenge.challenge, &challenge.salt, nonce, challenge.difficulty))
}

/// Renders the solved answer into the `X-Ds-Pow-Response` header value:
/// `base64(json({algorithm, challenge, salt, answer, signature, target_path}))`.
pub fn encode_response(challenge: &PowChallenge, answer: u64) -> String {
    let payload = PowAnswerPayload {
        algorithm: &challenge.algorithm,
        challenge: &challenge.challenge,
        salt: &challenge.salt,
        answer,
        signature: &challenge.signature,
        target_path: "/api/v0/chat/completion",
    };
    let json = serde_json::to_string(&payload).expect("pow answer payload is always serializable");
    base64::engine::general_purpose::STANDARD.encode(json)
}

/// Convenience wrapper: solves and encodes in one call, or `None` when the
/// challenge can't be satisfied (unsupported algorithm, or exhausted budget).
pub fn solve_and_encode(challenge: &PowChallenge) -> Option<String> {
    let answer = solve(challenge)?;
    Some(encode_response(challenge, answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_difficulty_solves_immediately() {
        let challenge = PowChallenge {
            algorithm: SUPPORTED_ALGORITHM.to_string(),
            challenge: "c".to_string(),
            salt: "s".to_string(),
            difficulty: 0,
            expire_at: 0,
            signature: "sig".to_string(),
        };
        let answer = solve(&challenge);
        assert!(answer.is_some());
    }

    #[test]
    fn unsupported_algorithm_returns_none() {
        let challenge = PowChallenge {
            algorithm: "Other".to_string(),
            challenge: "c".to_string(),
            salt: "s".to_string(),
            difficulty: 1,
            expire_at: 0,
            signature: "sig".to_string(),
        };
        assert!(solve(&challenge).is_none());
    }

    #[test]
    fn encoded_response_is_valid_base64_json() {
        let challenge = PowChallenge {
            algorithm: SUPPORTED_ALGORITHM.to_string(),
            challenge: "c".to_string(),
            salt: "s".to_string(),
            difficulty: 0,
            expire_at: 0,
            signature: "sig".to_string(),
        };
        let encoded = solve_and_encode(&challenge).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["algorithm"], "DeepSeekHashV1");
        assert_eq!(value["target_path"], "/api/v0/chat/completion");
    }

    #[test]
    fn difficulty_eight_requires_a_leading_zero_byte() {
        let challenge = PowChallenge {
            algorithm: SUPPORTED_ALGORITHM.to_string(),
            challenge: "hello".to_string(),
            salt: "salt".to_string(),
            difficulty: 8,
            expire_at: 0,
            signature: "sig".to_string(),
        };
        let nonce = solve(&challenge).expect("should find a nonce within budget");
        assert!(meets_difficulty(&challenge.challenge, &challenge.salt, nonce, 8));
    }
}
